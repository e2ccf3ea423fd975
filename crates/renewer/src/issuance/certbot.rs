use std::ffi::{OsStr, OsString};
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, trace, warn};

use certkeeper_config::CertbotConfig;

use super::{ChallengeType, IssuanceRequest, Issuer};
use crate::errors::IssuanceError;

/// Bytes of stderr kept in [`IssuanceError::Exited`]
const STDERR_TAIL: usize = 4096;

/// Issues certificates by running `certbot certonly`.
///
/// DNS-01 is solved by the configured certbot DNS plugin; credentials for
/// it come from certbot's own environment.
///
/// certbot locks its config, work and logs directories for the whole
/// process, and every record of a run shares them. Invocations therefore
/// run one at a time; concurrent callers (and clones) queue on `running`.
#[derive(Debug, Clone)]
pub struct CertbotIssuer {
    binary: PathBuf,
    dns_plugin: String,
    extra_args: Vec<String>,
    running: Arc<Mutex<()>>,
}

impl CertbotIssuer {
    pub fn new(config: &CertbotConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            dns_plugin: config.dns_plugin.trim_start_matches('-').to_string(),
            extra_args: config.extra_args.clone(),
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Command line for one request, without the program name
    pub fn args(&self, request: &IssuanceRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["certonly".into()];

        if request.non_interactive {
            args.push("--non-interactive".into());
        }
        if request.agree_tos {
            args.push("--agree-tos".into());
        }

        let paths = [
            ("--config-dir", request.config_dir.as_os_str()),
            ("--work-dir", request.work_dir.as_os_str()),
            ("--logs-dir", request.logs_dir.as_os_str()),
        ];
        push_pairs(&mut args, &paths);
        push_pairs(
            &mut args,
            &[
                ("--email", OsStr::new(&request.contact_email)),
                ("--server", OsStr::new(request.directory_url.as_str())),
            ],
        );

        match request.challenge {
            ChallengeType::Dns01 => args.push(format!("--{}", self.dns_plugin).into()),
        }

        push_pairs(
            &mut args,
            &[
                ("--csr", request.csr_path.as_os_str()),
                ("--cert-path", request.cert_path.as_os_str()),
                ("--key-path", request.key_path.as_os_str()),
                ("--chain-path", request.chain_path.as_os_str()),
                ("--fullchain-path", request.fullchain_path.as_os_str()),
            ],
        );

        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

fn push_pairs(args: &mut Vec<OsString>, pairs: &[(&str, &OsStr)]) {
    for (flag, value) in pairs {
        args.push(OsString::from(*flag));
        args.push(value.to_os_string());
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= STDERR_TAIL {
        return text.to_string();
    }

    let mut start = text.len() - STDERR_TAIL;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}

fn describe(status: ExitStatus) -> String {
    match status.code() {
        Some(code) => format!("status {}", code),
        None => status.to_string(),
    }
}

#[async_trait]
impl Issuer for CertbotIssuer {
    fn name(&self) -> &'static str {
        "certbot"
    }

    async fn issue(&self, request: &IssuanceRequest) -> Result<(), IssuanceError> {
        let queued = Instant::now();
        let _running = self.running.lock().await;
        trace!(waited_ms = queued.elapsed().as_millis() as u64, "Acquired certbot");

        let started = Instant::now();
        let args = self.args(request);
        trace!(binary = %self.binary.display(), args = ?args, "Running certbot");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| IssuanceError::Spawn {
                program: self.binary.clone(),
                source,
            })?;

        let elapsed_ms = started.elapsed().as_millis() as u64;

        if !output.status.success() {
            let stderr = stderr_tail(&output.stderr);
            warn!(
                status = %describe(output.status),
                elapsed_ms = elapsed_ms,
                "certbot failed"
            );
            return Err(IssuanceError::Exited {
                status: describe(output.status),
                stderr,
            });
        }

        debug!(stdout = %String::from_utf8_lossy(&output.stdout).trim(), "certbot output");

        match tokio::fs::try_exists(&request.cert_path).await {
            Ok(true) => {}
            _ => return Err(IssuanceError::MissingCertificate(request.cert_path.clone())),
        }

        info!(
            cert_path = %request.cert_path.display(),
            elapsed_ms = elapsed_ms,
            "certbot issued certificate"
        );
        Ok(())
    }
}
