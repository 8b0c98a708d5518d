use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::measurement::Measurement;
use crate::metrics::observe_measurement;
use crate::parser::parse_probe_output;
use crate::prober::Prober;
use crate::store::MeasurementStore;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Targets never started because a shutdown was requested.
    pub skipped: usize,
}

/// Bounded worker pool over one batch of targets.
///
/// At most `concurrency` probes are in flight. Whenever one finishes the next
/// pending target starts immediately. Each target is attempted exactly once.
pub struct Scheduler<P: Prober> {
    prober: Arc<P>,
    store: Arc<MeasurementStore>,
    capture_headers: Arc<Vec<String>>,
    concurrency: usize,
}

impl<P: Prober> Scheduler<P> {
    pub fn new(prober: P, store: MeasurementStore, capture_headers: Vec<String>, concurrency: usize) -> Self {
        Self {
            prober: Arc::new(prober),
            store: Arc::new(store),
            capture_headers: Arc::new(capture_headers),
            concurrency: concurrency.max(1),
        }
    }

    /// Runs every target to completion. A `true` on `shutdown` stops new
    /// dispatches; in-flight probes still finish and are persisted.
    ///
    /// Only persistence failures are returned as errors, after in-flight work settles.
    pub async fn run(&self, targets: Vec<String>, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let mut pending: VecDeque<String> = targets.into();
        let mut in_flight: JoinSet<Result<Measurement>> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut stopping = *shutdown.borrow();
        let mut watching = true;
        let mut fatal: Option<anyhow::Error> = None;

        loop {
            while !stopping && in_flight.len() < self.concurrency {
                let Some(url) = pending.pop_front() else { break };
                summary.attempted += 1;
                self.dispatch(&mut in_flight, url);
            }

            if in_flight.is_empty() {
                break;
            }

            tokio::select! {
                joined = in_flight.join_next() => {
                    let Some(joined) = joined else { continue };
                    match joined.map_err(|e| anyhow!("probe task failed: {e}")).and_then(|r| r) {
                        Ok(m) if m.is_failure() => summary.failed += 1,
                        Ok(_) => summary.succeeded += 1,
                        Err(e) => {
                            error!("stopping run: {:#}", e);
                            stopping = true;
                            fatal.get_or_insert(e);
                        }
                    }
                }
                changed = shutdown.changed(), if watching && !stopping => {
                    match changed {
                        Ok(()) if *shutdown.borrow() => {
                            warn!("shutdown requested, waiting for {} in-flight probes", in_flight.len());
                            stopping = true;
                        }
                        Ok(()) => {}
                        Err(_) => watching = false,
                    }
                }
            }
        }

        summary.skipped = pending.len();
        match fatal {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    fn dispatch(&self, in_flight: &mut JoinSet<Result<Measurement>>, url: String) {
        let prober = self.prober.clone();
        let store = self.store.clone();
        let capture_headers = self.capture_headers.clone();
        in_flight.spawn(async move {
            let output = prober.probe(&url).await;
            let measurement = parse_probe_output(&url, &capture_headers, &output);
            store.append(&measurement).await?;
            observe_measurement(&measurement);
            report(&measurement);
            Ok(measurement)
        });
    }
}

fn report(m: &Measurement) {
    let tcp = m
        .tcp_connect_time
        .map(|t| format!("{t}s"))
        .unwrap_or_else(|| "ERR".to_string());
    let ip = m.remote_ip.as_deref().unwrap_or("");
    let code = m.http_code.map(|c| c.to_string()).unwrap_or_default();
    match &m.error {
        Some(e) => warn!("{} -> {} {} {} ({})", m.url, tcp, ip, code, e),
        None => info!("{} -> {} {} {}", m.url, tcp, ip, code),
    }
}
