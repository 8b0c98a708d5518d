use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One probe attempt against one target, as persisted to the measurement log.
///
/// Timing fields are seconds since probe start as reported by the probe.
/// Anything the probe did not (or could not) report stays `None` and is
/// written as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub remote_ip: Option<String>,
    #[serde(default)]
    pub http_code: Option<u16>,
    #[serde(default)]
    pub time_namelookup: Option<f64>,
    #[serde(default)]
    pub time_connect: Option<f64>,
    #[serde(default)]
    pub time_appconnect: Option<f64>,
    /// `time_connect - time_namelookup`, clamped at zero.
    #[serde(default)]
    pub tcp_connect_time: Option<f64>,
    #[serde(default)]
    pub headers: BTreeMap<String, Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Measurement {
    /// Empty record: every metric null, every captured header present as null.
    pub fn new(url: &str, timestamp: DateTime<Utc>, capture_headers: &[String]) -> Self {
        Self {
            timestamp,
            url: url.to_string(),
            remote_ip: None,
            http_code: None,
            time_namelookup: None,
            time_connect: None,
            time_appconnect: None,
            tcp_connect_time: None,
            headers: capture_headers.iter().map(|h| (h.clone(), None)).collect(),
            error: None,
        }
    }

    /// A probe counts as failed when it produced no usable connect timing.
    pub fn is_failure(&self) -> bool {
        self.tcp_connect_time.is_none()
    }
}

/// TCP handshake time excluding DNS. Never negative.
pub fn tcp_connect_time(time_namelookup: Option<f64>, time_connect: Option<f64>) -> Option<f64> {
    match (time_namelookup, time_connect) {
        (Some(lookup), Some(connect)) => Some((connect - lookup).max(0.0)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_all_null() {
        let m = Measurement::new("https://a.example", Utc::now(), &["cf-ray".to_string(), "Server".to_string()]);
        assert_eq!(m.url, "https://a.example");
        assert!(m.remote_ip.is_none() && m.http_code.is_none() && m.tcp_connect_time.is_none());
        assert_eq!(m.headers.len(), 2);
        assert!(m.headers.values().all(Option::is_none));
        assert!(m.is_failure());
    }

    #[test]
    fn test_tcp_connect_time() {
        let t = tcp_connect_time(Some(0.012), Some(0.045)).unwrap();
        assert!((t - 0.033).abs() < 1e-12);
        assert_eq!(tcp_connect_time(Some(0.050), Some(0.040)), Some(0.0));
        assert_eq!(tcp_connect_time(None, Some(0.040)), None);
        assert_eq!(tcp_connect_time(Some(0.010), None), None);
    }

    #[test]
    fn test_serialized_shape() {
        let m = Measurement::new("https://a.example", Utc::now(), &["cf-ray".to_string()]);
        let value: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert!(value["tcp_connect_time"].is_null());
        assert!(value["headers"]["cf-ray"].is_null());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_read_ignores_unknown_and_missing_fields() {
        let line = r#"{"timestamp":"2025-01-01T00:00:00.000Z","url":"https://a.example","tcp_connect_time":0.02,"probe_host":"box-1"}"#;
        let m: Measurement = serde_json::from_str(line).unwrap();
        assert_eq!(m.tcp_connect_time, Some(0.02));
        assert!(m.headers.is_empty());
        assert!(m.error.is_none());
    }
}
