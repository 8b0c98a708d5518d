//! Turns the text a probe printed (header blocks followed by one metrics
//! footer line) into a [`Measurement`]. Parsing is total: whatever the input,
//! a complete record comes back, with unresolvable fields left null.

use std::collections::HashMap;

use crate::measurement::{tcp_connect_time, Measurement};
use crate::prober::ProbeOutput;

pub const METRICS_MARKER: &str = "CURLMETRICS:";

#[derive(Debug)]
struct Metrics {
    time_namelookup: f64,
    time_connect: f64,
    time_appconnect: f64,
    remote_ip: Option<String>,
    http_code: Option<u16>,
}

impl Metrics {
    fn connected(&self) -> bool {
        self.http_code.is_some() && self.time_connect > 0.0
    }
}

pub fn parse_probe_output(url: &str, capture_headers: &[String], output: &ProbeOutput) -> Measurement {
    let mut measurement = Measurement::new(url, output.completed_at, capture_headers);
    let raw = output.stdout.as_str();

    let (header_section, metrics) = match raw.rfind(METRICS_MARKER) {
        Some(idx) => {
            let line = raw[idx + METRICS_MARKER.len()..].lines().next().unwrap_or("");
            (&raw[..idx], parse_metrics_line(line))
        }
        None => (raw, None),
    };
    // A failed curl still prints its footer, zeroed out; that is not a measurement.
    let metrics = metrics.filter(|m| output.error.is_none() || m.connected());

    match metrics {
        Some(m) => {
            measurement.time_namelookup = Some(m.time_namelookup);
            measurement.time_connect = Some(m.time_connect);
            measurement.time_appconnect = Some(m.time_appconnect);
            measurement.remote_ip = m.remote_ip;
            measurement.http_code = m.http_code;
            measurement.tcp_connect_time = tcp_connect_time(measurement.time_namelookup, measurement.time_connect);
        }
        None => {
            measurement.error = Some(match &output.error {
                Some(e) => e.to_string(),
                None if raw.contains(METRICS_MARKER) => "malformed metrics footer".to_string(),
                None => "no metrics footer in probe output".to_string(),
            });
        }
    }

    let header_map = parse_header_block(last_header_block(header_section));
    for (name, value) in measurement.headers.iter_mut() {
        *value = header_map.get(&name.to_lowercase()).cloned();
    }

    measurement
}

/// `time_namelookup=..;time_connect=..;time_appconnect=..;remote_ip=..;http_code=..`
/// in that order. Trailing extra fields are ignored.
fn parse_metrics_line(line: &str) -> Option<Metrics> {
    let mut fields = line.trim_end_matches('\r').split(';');

    let time_namelookup = parse_seconds(next_field(&mut fields, "time_namelookup")?)?;
    let time_connect = parse_seconds(next_field(&mut fields, "time_connect")?)?;
    let time_appconnect = parse_seconds(next_field(&mut fields, "time_appconnect")?)?;
    let remote_ip = next_field(&mut fields, "remote_ip")?;
    let http_code = next_field(&mut fields, "http_code")?;

    if http_code.is_empty() || !http_code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some(Metrics {
        time_namelookup,
        time_connect,
        time_appconnect,
        remote_ip: (!remote_ip.is_empty()).then(|| remote_ip.to_string()),
        // curl reports 000 when no response arrived
        http_code: http_code.parse::<u16>().ok().filter(|c| *c != 0),
    })
}

fn next_field<'a>(fields: &mut impl Iterator<Item = &'a str>, key: &str) -> Option<&'a str> {
    let (k, v) = fields.next()?.split_once('=')?;
    (k == key).then_some(v)
}

fn parse_seconds(value: &str) -> Option<f64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    value.parse::<f64>().ok()
}

/// Redirect chains print one header block per hop; only the last one
/// describes the final response.
fn last_header_block(section: &str) -> Vec<&str> {
    let mut blocks: Vec<Vec<&str>> = vec![Vec::new()];
    for line in section.lines() {
        let line = line.trim();
        if line.is_empty() {
            if blocks.last().is_some_and(|b| !b.is_empty()) {
                blocks.push(Vec::new());
            }
        } else if let Some(block) = blocks.last_mut() {
            block.push(line);
        }
    }
    blocks.into_iter().rev().find(|b| !b.is_empty()).unwrap_or_default()
}

/// Lower-cased name -> value. Repeats are comma-joined in encounter order.
fn parse_header_block(lines: Vec<&str>) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else { continue };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        map.entry(name.to_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    map
}
