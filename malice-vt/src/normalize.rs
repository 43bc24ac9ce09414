//! Raw report normalization
//!
//! The v2 report endpoint returns a flat JSON object whose `scans` member maps
//! engine names to per-engine verdicts. This module decodes that payload
//! against an explicit schema and turns it into a [`ScanReport`].
//!
//! ## Schema rules
//!
//! - `response_code` is required; everything else is optional
//! - `null` strings become empty strings
//! - each engine entry must carry a boolean `detected`
//! - type mismatches are rejected with [`VtError::Protocol`]
//!
//! The canonical camelCase names emitted by [`ScanReport`]'s `Serialize`
//! impl are accepted as aliases, so a serialized report normalizes back to
//! an equal value.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};

use crate::error::VtError;
use crate::model::{EngineResult, ScanReport};

#[derive(Debug, Deserialize)]
struct RawReport {
    #[serde(alias = "responseCode")]
    response_code: i64,
    #[serde(default, deserialize_with = "null_as_empty")]
    resource: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    permalink: String,
    #[serde(default, alias = "scanID", deserialize_with = "null_as_empty")]
    scan_id: String,
    #[serde(default, alias = "scanDate", deserialize_with = "null_as_empty")]
    scan_date: String,
    #[serde(default, alias = "verboseMessage", deserialize_with = "null_as_empty")]
    verbose_msg: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    md5: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    sha1: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    sha256: String,
    #[serde(default)]
    positives: Option<u32>,
    #[serde(default)]
    total: Option<u32>,
    #[serde(default, alias = "engineResults")]
    scans: Option<BTreeMap<String, RawEngine>>,
}

#[derive(Debug, Deserialize)]
struct RawEngine {
    detected: bool,
    #[serde(default, alias = "engineVersion", deserialize_with = "null_as_empty")]
    version: String,
    #[serde(default, alias = "signature", deserialize_with = "null_as_empty")]
    result: String,
    #[serde(default, alias = "updateDate", deserialize_with = "null_as_empty")]
    update: String,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Decode and normalize a raw report body
pub fn normalize(raw: &[u8]) -> Result<ScanReport, VtError> {
    let raw: RawReport = serde_json::from_slice(raw)?;
    Ok(from_raw(raw))
}

/// Normalize an already-parsed JSON value
pub fn normalize_value(value: serde_json::Value) -> Result<ScanReport, VtError> {
    let raw: RawReport = serde_json::from_value(value)?;
    Ok(from_raw(raw))
}

fn from_raw(raw: RawReport) -> ScanReport {
    // Engine verdicts only mean something on a finished report
    let engine_results: BTreeMap<String, EngineResult> = if raw.response_code == ScanReport::READY
    {
        raw.scans
            .unwrap_or_default()
            .into_iter()
            .map(|(name, engine)| {
                let result = EngineResult {
                    engine_name: name.clone(),
                    detected: engine.detected,
                    signature: engine.result,
                    engine_version: engine.version,
                    update_date: engine.update,
                };
                (name, result)
            })
            .collect()
    } else {
        BTreeMap::new()
    };

    let total_engines = engine_results.len() as u32;
    let positive_engines = engine_results.values().filter(|e| e.detected).count() as u32;

    if let (Some(positives), Some(total)) = (raw.positives, raw.total)
        && !engine_results.is_empty()
        && (positives != positive_engines || total != total_engines)
    {
        tracing::warn!(
            "Upstream counters for {} ({}/{}) disagree with engine results ({}/{}), using engine results",
            raw.resource,
            positives,
            total,
            positive_engines,
            total_engines
        );
    }

    ScanReport {
        resource: raw.resource,
        permalink: raw.permalink,
        response_code: raw.response_code,
        scan_id: raw.scan_id,
        scan_date: raw.scan_date,
        verbose_message: raw.verbose_msg,
        md5: raw.md5,
        sha1: raw.sha1,
        sha256: raw.sha256,
        total_engines,
        positive_engines,
        engine_results,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn engines(verdicts: &[(&str, bool)]) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = verdicts
            .iter()
            .map(|(name, detected)| {
                let signature = if *detected {
                    json!("EICAR-Test-File")
                } else {
                    json!(null)
                };
                (
                    name.to_string(),
                    json!({
                        "detected": detected,
                        "version": "1.0",
                        "result": signature,
                        "update": "20240101"
                    }),
                )
            })
            .collect();
        serde_json::Value::Object(map)
    }

    #[test]
    fn test_normalize_ready_report() {
        let body = json!({
            "response_code": 1,
            "verbose_msg": "Scan finished, information embedded",
            "resource": "44d88612fea8a8f36de82e1278abb02f",
            "scan_id": "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f-1700000000",
            "scan_date": "2024-01-01 12:00:00",
            "permalink": "https://www.virustotal.com/file/275a/analysis/1700000000/",
            "md5": "44d88612fea8a8f36de82e1278abb02f",
            "sha1": "3395856ce81f2b7382dee72602f798b642f14140",
            "sha256": "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f",
            "positives": 2,
            "total": 3,
            "scans": engines(&[("Avast", true), ("ClamAV", true), ("Zillya", false)])
        });

        let report = normalize(body.to_string().as_bytes()).unwrap();

        assert!(report.is_ready());
        assert_eq!(report.total_engines, 3);
        assert_eq!(report.positive_engines, 2);
        assert_eq!(report.verbose_message, "Scan finished, information embedded");
        let clamav = &report.engine_results["ClamAV"];
        assert_eq!(clamav.engine_name, "ClamAV");
        assert_eq!(clamav.signature, "EICAR-Test-File");
        assert_eq!(clamav.engine_version, "1.0");
        assert_eq!(clamav.update_date, "20240101");
        assert_eq!(report.engine_results["Zillya"].signature, "");
    }

    #[test]
    fn test_counters_come_from_engine_map() {
        // Upstream claims 10/10 but only one engine actually detected
        let body = json!({
            "response_code": 1,
            "positives": 10,
            "total": 10,
            "scans": engines(&[("A", true), ("B", false)])
        });

        let report = normalize_value(body).unwrap();
        assert_eq!(report.positive_engines, 1);
        assert_eq!(report.total_engines, 2);
    }

    #[test]
    fn test_counter_invariant_over_many_maps() {
        // Walk every subset of a 6-engine map
        let names = ["A", "B", "C", "D", "E", "F"];
        for mask in 0u32..(1 << names.len()) {
            let verdicts: Vec<(&str, bool)> = names
                .iter()
                .enumerate()
                .map(|(i, n)| (*n, mask & (1 << i) != 0))
                .collect();
            let report = normalize_value(json!({
                "response_code": 1,
                "scans": engines(&verdicts)
            }))
            .unwrap();

            assert_eq!(report.positive_engines, mask.count_ones());
            assert_eq!(
                report.positive_engines as usize,
                report.engine_results.values().filter(|e| e.detected).count()
            );
            assert!(report.positive_engines <= report.total_engines);
            assert_eq!(report.total_engines, names.len() as u32);
        }
    }

    #[test]
    fn test_not_found_never_populates_engines() {
        let body = json!({
            "response_code": 0,
            "resource": "0000000000000000000000000000000000000000000000000000000000000000",
            "verbose_msg": "The requested resource is not among the finished, queued or pending scans",
            "scans": engines(&[("A", true)])
        });

        let report = normalize_value(body).unwrap();
        assert!(report.is_not_found());
        assert!(report.engine_results.is_empty());
        assert_eq!(report.total_engines, 0);
        assert_eq!(report.positive_engines, 0);
        assert_eq!(report.permalink, "");
        assert_eq!(report.md5, "");
    }

    #[test]
    fn test_missing_response_code_is_protocol_error() {
        let err = normalize(br#"{"resource": "abc"}"#).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ProtocolError);
    }

    #[test]
    fn test_shape_mismatch_is_rejected() {
        let body = json!({
            "response_code": 1,
            "scans": { "A": { "detected": "yes" } }
        });
        assert!(normalize_value(body).is_err());

        let body = json!({ "response_code": "1" });
        assert!(normalize_value(body).is_err());

        assert!(normalize(b"<html>quota</html>").is_err());
        assert!(normalize(b"").is_err());
    }

    #[test]
    fn test_null_strings_default_to_empty() {
        let body = json!({
            "response_code": 1,
            "permalink": null,
            "scan_date": null,
            "scans": { "A": { "detected": false, "version": null, "result": null, "update": null } }
        });

        let report = normalize_value(body).unwrap();
        assert_eq!(report.permalink, "");
        assert_eq!(report.scan_date, "");
        assert_eq!(report.engine_results["A"].engine_version, "");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let body = json!({
            "response_code": 1,
            "resource": "44d88612fea8a8f36de82e1278abb02f",
            "scan_id": "scan-1",
            "scan_date": "2024-01-01 12:00:00",
            "verbose_msg": "Scan finished",
            "permalink": "https://www.virustotal.com/file/x/analysis/1/",
            "md5": "44d88612fea8a8f36de82e1278abb02f",
            "sha1": "3395856ce81f2b7382dee72602f798b642f14140",
            "sha256": "275a021bbfb6489e54d471899f7db9d1663fc695ec2fe2a2c4538aabf651fd0f",
            "scans": engines(&[("A", true), ("B", false), ("C", true)])
        });

        let first = normalize_value(body).unwrap();
        let reserialized = serde_json::to_vec(&first).unwrap();
        let second = normalize(&reserialized).unwrap();
        assert_eq!(first, second);

        let not_found = normalize_value(json!({ "response_code": 0 })).unwrap();
        let again = normalize(&serde_json::to_vec(&not_found).unwrap()).unwrap();
        assert_eq!(not_found, again);
    }
}
