use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::{info, warn};

use crate::measurement::Measurement;

const TABLE_WIDTH: usize = 80;
const URL_WIDTH: usize = 50;

/// Per-URL summary of TCP connect time.
#[derive(Debug, Clone, PartialEq)]
pub struct StatResult {
    pub url: String,
    /// Mean in whole milliseconds.
    pub average: u64,
    /// Coefficient of variation in percent, two decimals.
    pub standard_deviation: f64,
    pub count: usize,
}

/// Reads the measurement log. Lines that do not parse are skipped.
pub async fn read_measurements(path: &Path) -> Result<Vec<Measurement>> {
    if !path.exists() {
        bail!("Measurement log not found: {}", path.display());
    }
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Cannot read {}", path.display()))?;
    Ok(parse_log(&data))
}

fn parse_log(data: &str) -> Vec<Measurement> {
    data.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(n, line)| match serde_json::from_str::<Measurement>(line) {
            Ok(m) => Some(m),
            Err(e) => {
                warn!("Skipping invalid line {}: {}", n + 1, e);
                None
            }
        })
        .collect()
}

/// Groups by URL, ignores records without a TCP connect time, and orders the
/// result by descending average.
pub fn aggregate(records: &[Measurement]) -> Vec<StatResult> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: HashMap<&str, Vec<f64>> = HashMap::new();
    for m in records {
        let Some(t) = m.tcp_connect_time else { continue };
        groups
            .entry(m.url.as_str())
            .or_insert_with(|| {
                order.push(m.url.as_str());
                Vec::new()
            })
            .push(t);
    }

    let mut results: Vec<StatResult> = order
        .into_iter()
        .filter_map(|url| groups.get(url).map(|times| summarize(url, times)))
        .collect();
    results.sort_by(|a, b| b.average.cmp(&a.average));
    results
}

fn summarize(url: &str, times: &[f64]) -> StatResult {
    let n = times.len() as f64;
    let mean = times.iter().sum::<f64>() / n;
    let variance = times.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    let cv = if mean > 0.0 { variance.sqrt() / mean * 100.0 } else { 0.0 };
    StatResult {
        url: url.to_string(),
        average: (mean * 1000.0).round() as u64,
        standard_deviation: (cv * 100.0).round() / 100.0,
        count: times.len(),
    }
}

fn truncate_url(url: &str) -> String {
    if url.chars().count() > URL_WIDTH - 3 {
        let head: String = url.chars().take(URL_WIDTH - 6).collect();
        format!("{head}...")
    } else {
        url.to_string()
    }
}

pub fn render_table(results: &[StatResult]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nTCP Connect Time Statistics by URL");
    let _ = writeln!(out, "{}", "=".repeat(TABLE_WIDTH));
    let _ = writeln!(out, "{:<50}{:>12}{:>12}{:>8}", "URL", "Average (ms)", "Std Dev (%)", "Count");
    let _ = writeln!(out, "{}", "-".repeat(TABLE_WIDTH));
    for r in results {
        let _ = writeln!(
            out,
            "{:<50}{:>12}{:>12.2}{:>8}",
            truncate_url(&r.url),
            r.average,
            r.standard_deviation,
            r.count
        );
    }
    let _ = writeln!(out, "{}", "-".repeat(TABLE_WIDTH));
    let _ = writeln!(out, "Total URLs: {}", results.len());
    let _ = write!(out, "{}", "=".repeat(TABLE_WIDTH));
    out
}

fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub fn render_csv(results: &[StatResult]) -> String {
    let mut lines = vec!["URL,Average (ms),Standard Deviation (%),Count".to_string()];
    lines.extend(results.iter().map(|r| {
        format!("{},{},{},{}", csv_escape(&r.url), r.average, r.standard_deviation, r.count)
    }));
    lines.join("\n")
}

/// Full analysis pass: read, aggregate, print the table, write the CSV.
pub async fn run(input: &Path, csv_path: &Path) -> Result<Vec<StatResult>> {
    info!("Reading measurements from {}", input.display());
    let measurements = read_measurements(input).await?;
    if measurements.is_empty() {
        bail!("No valid measurements found in {}", input.display());
    }
    info!("Found {} measurements", measurements.len());

    let results = aggregate(&measurements);
    if results.is_empty() {
        bail!("No measurements with valid tcp_connect_time found");
    }

    println!("{}", render_table(&results));

    tokio::fs::write(csv_path, render_csv(&results))
        .await
        .with_context(|| format!("Cannot write {}", csv_path.display()))?;
    info!("Results written to {}", csv_path.display());
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample(url: &str, tcp: Option<f64>) -> Measurement {
        let mut m = Measurement::new(url, Utc::now(), &[]);
        m.tcp_connect_time = tcp;
        m
    }

    #[test]
    fn test_mean_and_coefficient_of_variation() {
        let records = vec![sample("A", Some(0.010)), sample("A", Some(0.020)), sample("A", Some(0.030))];
        let results = aggregate(&records);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "A");
        assert_eq!(results[0].average, 20);
        assert_eq!(results[0].count, 3);
        assert!((results[0].standard_deviation - 40.82).abs() < 1e-9);
    }

    #[test]
    fn test_null_only_urls_excluded() {
        let records = vec![
            sample("A", None),
            sample("A", None),
            sample("B", Some(0.015)),
            sample("B", None),
        ];
        let results = aggregate(&records);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].url, "B");
        assert_eq!(results[0].count, 1);
        assert_eq!(results[0].standard_deviation, 0.0);
    }

    #[test]
    fn test_descending_order() {
        let records = vec![sample("fifty", Some(0.050)), sample("ten", Some(0.010)), sample("thirty", Some(0.030))];
        let averages: Vec<u64> = aggregate(&records).iter().map(|r| r.average).collect();
        assert_eq!(averages, vec![50, 30, 10]);
    }

    #[test]
    fn test_zero_mean_does_not_produce_nan() {
        let results = aggregate(&[sample("A", Some(0.0)), sample("A", Some(0.0))]);
        assert_eq!(results[0].average, 0);
        assert_eq!(results[0].standard_deviation, 0.0);
    }

    #[test]
    fn test_parse_log_skips_bad_lines() {
        let good = serde_json::to_string(&sample("A", Some(0.02))).unwrap();
        let data = format!("{good}\nnot json\n\n{{\"url\": 5}}\n{good}\n");
        assert_eq!(parse_log(&data).len(), 2);
    }

    #[test]
    fn test_render_table() {
        let long = format!("https://{}.example/", "x".repeat(60));
        let results = vec![
            StatResult { url: "https://a.example".into(), average: 20, standard_deviation: 40.82, count: 3 },
            StatResult { url: long, average: 5, standard_deviation: 0.0, count: 1 },
        ];
        let table = render_table(&results);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines[1], "TCP Connect Time Statistics by URL");
        assert_eq!(lines[2].len(), 80);
        assert_eq!(lines[3].len(), 82);
        assert_eq!(lines[5], format!("{:<50}{:>12}{:>12}{:>8}", "https://a.example", "20", "40.82", "3"));
        assert!(lines[6].starts_with(&format!("https://{}...", "x".repeat(36))));
        assert!(lines[6].contains("0.00"));
        assert_eq!(lines[8], "Total URLs: 2");
    }

    #[test]
    fn test_render_csv() {
        let results = vec![
            StatResult { url: "https://a.example/?q=1,2".into(), average: 20, standard_deviation: 40.82, count: 3 },
            StatResult { url: "https://b.example".into(), average: 7, standard_deviation: 0.0, count: 1 },
        ];
        assert_eq!(
            render_csv(&results),
            "URL,Average (ms),Standard Deviation (%),Count\n\"https://a.example/?q=1,2\",20,40.82,3\nhttps://b.example,7,0,1"
        );
    }

    #[tokio::test]
    async fn test_run_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("measurements.jsonl");
        let csv = dir.path().join("measurements.csv");
        let lines: Vec<String> = [sample("A", Some(0.010)), sample("A", Some(0.030)), sample("B", Some(0.050))]
            .iter()
            .map(|m| serde_json::to_string(m).unwrap())
            .collect();
        std::fs::write(&log, lines.join("\n") + "\n").unwrap();

        let results = run(&log, &csv).await.unwrap();
        assert_eq!(results[0].url, "B");
        let written = std::fs::read_to_string(&csv).unwrap();
        assert_eq!(written.lines().count(), 3);
        assert!(written.lines().nth(1).unwrap().starts_with("B,50,0,1"));
    }

    #[tokio::test]
    async fn test_run_fails_without_valid_data() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("out.csv");
        assert!(run(&dir.path().join("missing.jsonl"), &csv).await.is_err());

        let log = dir.path().join("measurements.jsonl");
        std::fs::write(&log, "garbage\n").unwrap();
        assert!(run(&log, &csv).await.is_err());

        std::fs::write(&log, serde_json::to_string(&sample("A", None)).unwrap()).unwrap();
        assert!(run(&log, &csv).await.is_err());
        assert!(!csv.exists());
    }
}
