use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use malice_vt::client::http_client::{create_proxied_client, create_shared_client};
use malice_vt::config::Config;
use malice_vt::error::VtError;
use malice_vt::model::Artifact;
use malice_vt::reports::{self, OutputMode};
use malice_vt::resolver::Resolver;
use malice_vt::sinks::elasticsearch::ElasticsearchSink;
use malice_vt::sinks::webhook::WebhookSink;
use malice_vt::sinks::{PluginResult, ResultSink, deliver_all};

const EXIT_SUCCESS: u8 = 0;

/// Exit code for a resolution that ended without a verdict
const EXIT_INCONCLUSIVE: u8 = 2;

#[derive(Parser)]
#[command(name = "malice-vt")]
#[command(about = "Malice VirusTotal Plugin", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as Markdown table
    #[arg(short, long, global = true)]
    table: bool,

    /// POST results to the Malice webhook endpoint
    #[arg(short, long, global = true)]
    post: bool,

    /// VirusTotal API key [env: MALICE_VT_API]
    #[arg(long, global = true)]
    api: Option<String>,

    /// Elasticsearch address for Malice to store results [env: MALICE_ELASTICSEARCH]
    #[arg(long, global = true)]
    elasticsearch: Option<String>,

    /// Malice webhook endpoint [env: MALICE_ENDPOINT]
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Proxy for the Malice webhook endpoint [env: MALICE_PROXY]
    #[arg(short = 'x', long, global = true)]
    proxy: Option<String>,

    /// Identifier for stored and posted results, defaults to the hash [env: MALICE_SCANID]
    #[arg(long, global = true)]
    scan_id: Option<String>,

    /// Wall-clock bound for the whole resolution, in seconds [env: MALICE_TIMEOUT]
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload binary to VirusTotal for scanning
    #[command(alias = "s")]
    Scan {
        /// File to upload to VirusTotal
        file: PathBuf,
    },
    /// Get file hash scan report
    #[command(alias = "l")]
    Lookup {
        /// MD5/SHA1/SHA256 hash of file
        hash: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env();

    if let Some(api) = &cli.api {
        config.service.api_key = Some(api.clone());
    }
    if let Some(url) = &cli.elasticsearch {
        config.sinks.elasticsearch = Some(url.clone());
    }
    if let Some(url) = &cli.endpoint {
        config.sinks.webhook = Some(url.clone());
    }
    if let Some(proxy) = &cli.proxy {
        config.sinks.proxy = Some(proxy.clone());
    }
    if let Some(id) = &cli.scan_id {
        config.sinks.scan_id = Some(id.clone());
    }
    if let Some(secs) = cli.timeout {
        config.output.total_timeout_secs = Some(secs);
    }
    if cli.table {
        config.output.mode = OutputMode::Table;
    }

    config.validate_urls()?;
    Ok(config)
}

/// Exit code for a failed resolution that still counts as an outcome
fn inconclusive_exit(err: &VtError) -> Option<u8> {
    err.kind().is_inconclusive().then_some(EXIT_INCONCLUSIVE)
}

/// Id under which results are stored and posted
fn result_id(config: &Config, artifact: &Artifact) -> String {
    config
        .sinks
        .scan_id
        .clone()
        .unwrap_or_else(|| artifact.default_id().to_string())
}

/// Webhook endpoint when `--post` is set, `None` to print instead
fn post_target(post: bool, config: &Config) -> anyhow::Result<Option<&str>> {
    if !post {
        return Ok(None);
    }
    let endpoint = config
        .sinks
        .webhook
        .as_deref()
        .context("--post requires a webhook endpoint (--endpoint or MALICE_ENDPOINT)")?;
    Ok(Some(endpoint))
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = build_config(&cli)?;
    let post_to = post_target(cli.post, &config)?;
    let request_timeout = Duration::from_secs(config.service.request_timeout_secs);
    let client = create_shared_client(request_timeout)?;

    // Key and input problems surface here, before any request is sent
    let resolver = Resolver::from_config(&config, Arc::clone(&client))?;
    let artifact = match &cli.command {
        Commands::Scan { file } => Artifact::from_path(file).await?,
        Commands::Lookup { hash } => Artifact::from_hash(hash)?,
    };

    let report = match resolver.resolve(&artifact).await {
        Ok(report) => report,
        Err(e) => match inconclusive_exit(&e) {
            Some(code) => {
                eprintln!("No verdict available yet ({}): {e}", e.kind().as_str());
                return Ok(code);
            }
            None => return Err(e.into()),
        },
    };

    let result = PluginResult::new(result_id(&config, &artifact), report);

    let mut storage: Vec<Box<dyn ResultSink>> = Vec::new();
    if let Some(url) = &config.sinks.elasticsearch {
        storage.push(Box::new(ElasticsearchSink::new(Arc::clone(&client), url)));
    }
    deliver_all(&storage, &result).await?;

    match post_to {
        Some(endpoint) => {
            let webhook_client = match &config.sinks.proxy {
                Some(proxy) => create_proxied_client(request_timeout, proxy)?,
                None => Arc::clone(&client),
            };
            let webhook: Vec<Box<dyn ResultSink>> =
                vec![Box::new(WebhookSink::new(webhook_client, endpoint))];
            deliver_all(&webhook, &result).await?;
        }
        None => println!("{}", reports::render(&result.data, config.output.mode)?),
    }
    Ok(EXIT_SUCCESS)
}
