use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, GaugeVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::path::Path;

use crate::measurement::Measurement;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static PROBE_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("probe_total", "Probe attempts by outcome");
    let ctr = IntCounterVec::new(opts, &["outcome"]).expect("valid probe_total opts");
    REGISTRY.register(Box::new(ctr.clone())).expect("probe_total registered once");
    ctr
});

static TCP_CONNECT_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("probe_tcp_connect_seconds", "Last observed TCP handshake time, DNS excluded");
    let gauge = GaugeVec::new(opts, &["target"]).expect("valid probe_tcp_connect_seconds opts");
    REGISTRY.register(Box::new(gauge.clone())).expect("probe_tcp_connect_seconds registered once");
    gauge
});

pub fn observe_measurement(m: &Measurement) {
    match m.tcp_connect_time {
        Some(secs) => {
            PROBE_COUNTER.with_label_values(&["ok"]).inc();
            TCP_CONNECT_GAUGE.with_label_values(&[m.url.as_str()]).set(secs);
        }
        None => PROBE_COUNTER.with_label_values(&["error"]).inc(),
    }
}

pub fn encode_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Writes the exposition for a textfile collector. Written to a temp file and
/// renamed so scrapers never see a half-written file.
pub async fn write_textfile(path: &Path) -> Result<()> {
    let body = encode_text()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, body).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_observe_and_write_textfile() {
        let mut ok = Measurement::new("https://metrics.example", Utc::now(), &[]);
        ok.tcp_connect_time = Some(0.025);
        observe_measurement(&ok);
        observe_measurement(&Measurement::new("https://down.example", Utc::now(), &[]));

        let text = encode_text().unwrap();
        assert!(text.contains("probe_total{outcome=\"ok\"}"));
        assert!(text.contains("probe_total{outcome=\"error\"}"));
        assert!(text.contains("probe_tcp_connect_seconds{target=\"https://metrics.example\"} 0.025"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connect_latency.prom");
        write_textfile(&path).await.unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("probe_total"));
        assert!(!dir.path().join("connect_latency.prom.tmp").exists());
    }
}
