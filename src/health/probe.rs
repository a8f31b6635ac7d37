use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use super::types::{HealthConfig, ProbeType};
use crate::constants::{PROBE_FAILURE_COMMAND, PROBE_FAILURE_HTTP};
use crate::process::{launcher, ProcessRecord};

/// Run the configured probe against a live record
///
/// Returns `Err` with a fixed description on failure.
pub async fn run_probe(
    config: &HealthConfig,
    record: &ProcessRecord,
    timeout: Duration,
) -> Result<(), &'static str> {
    match config.probe_type {
        ProbeType::Disabled => Ok(()),
        ProbeType::Http => {
            let port = config.port.or(record.streamlit_port).ok_or(PROBE_FAILURE_HTTP)?;
            if http_probe(port, timeout).await {
                Ok(())
            } else {
                Err(PROBE_FAILURE_HTTP)
            }
        }
        ProbeType::Command => {
            if command_probe(&config.probe_command, &record.working_dir, timeout).await {
                Ok(())
            } else {
                Err(PROBE_FAILURE_COMMAND)
            }
        }
    }
}

/// Connect, send a minimal request and read one byte before `timeout`
///
/// A reachability check, not an HTTP correctness check.
pub async fn http_probe(port: u16, timeout: Duration) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;
        stream
            .write_all(b"GET / HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n")
            .await?;
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await?;
        Ok::<_, std::io::Error>(())
    };
    matches!(tokio::time::timeout(timeout, attempt).await, Ok(Ok(())))
}

/// Run `command` inside the agent's environment; healthy iff it exits 0 in time
pub async fn command_probe(command: &str, working_dir: &Path, timeout: Duration) -> bool {
    if command.trim().is_empty() {
        return false;
    }
    let std_command = match launcher::shell_command(command, working_dir) {
        Ok(cmd) => cmd,
        Err(_) => return false,
    };

    let mut cmd = tokio::process::Command::from(std_command);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    matches!(
        tokio::time::timeout(timeout, cmd.status()).await,
        Ok(Ok(status)) if status.success()
    )
}
