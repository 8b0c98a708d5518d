use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};

use super::{ProbeError, ProbeOutput, Prober};
use crate::config::ProbeConfig;
use crate::parser::METRICS_MARKER;

// Wall-clock guard on top of curl's own --max-time.
const KILL_GRACE: Duration = Duration::from_secs(1);

pub struct CurlProber {
    curl_path: String,
    timeout_secs: u64,
    follow_redirects: bool,
    head_only: bool,
}

impl CurlProber {
    pub fn from_config(config: &ProbeConfig) -> Self {
        Self {
            curl_path: config.curl_path.clone(),
            timeout_secs: config.timeout_secs,
            follow_redirects: config.follow_redirects,
            head_only: config.method.eq_ignore_ascii_case("HEAD"),
        }
    }

    fn write_out_format() -> String {
        format!(
            "{METRICS_MARKER}time_namelookup=%{{time_namelookup}};time_connect=%{{time_connect}};\
             time_appconnect=%{{time_appconnect}};remote_ip=%{{remote_ip}};http_code=%{{http_code}}\\n"
        )
    }

    pub fn args(&self, url: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if self.follow_redirects {
            args.push("-L".into());
        }
        args.push("-sS".into());
        if self.head_only {
            args.push("-I".into());
        } else {
            // headers to stdout, body discarded
            args.extend(["-D", "-", "-o", "/dev/null"].map(String::from));
        }
        args.push("--max-time".into());
        args.push(self.timeout_secs.to_string());
        args.push("-w".into());
        args.push(Self::write_out_format());
        args.push(url.to_string());
        args
    }

    async fn run(&self, url: &str) -> ProbeOutput {
        let mut cmd = Command::new(&self.curl_path);
        cmd.args(self.args(url))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return ProbeOutput::new(String::new(), Some(ProbeError::Spawn(e))),
        };

        let limit = Duration::from_secs(self.timeout_secs) + KILL_GRACE;
        match timeout(limit, child.wait_with_output()).await {
            Err(_) => ProbeOutput::new(String::new(), Some(ProbeError::Timeout(self.timeout_secs))),
            Ok(Err(e)) => ProbeOutput::new(String::new(), Some(ProbeError::Wait(e))),
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                let error = if output.status.success() {
                    None
                } else {
                    Some(ProbeError::Exit {
                        status: output.status.to_string(),
                        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
                    })
                };
                ProbeOutput::new(stdout, error)
            }
        }
    }
}

impl Prober for CurlProber {
    fn probe(&self, url: &str) -> impl std::future::Future<Output = ProbeOutput> + Send {
        self.run(url)
    }
}
