//! Malice VirusTotal plugin
//!
//! This crate submits files or file hashes to the VirusTotal public API,
//! waits for the multi-engine report while respecting the API quota, and
//! normalizes the result into a stable [`model::ScanReport`].

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod reports;
pub mod resolver;
pub mod sinks;
