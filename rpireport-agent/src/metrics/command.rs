//! External command helpers for the collectors

use anyhow::{anyhow, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as AsyncCommand;
use tracing::debug;

pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// Runs `program args...` and returns stdout on a zero exit status
pub async fn run(program: &str, args: &[&str]) -> Result<String> {
    run_with_timeout(program, args, COMMAND_TIMEOUT).await
}

pub async fn run_with_timeout(program: &str, args: &[&str], timeout: Duration) -> Result<String> {
    let output = tokio::time::timeout(
        timeout,
        AsyncCommand::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output(),
    )
    .await
    .with_context(|| format!("{} timed out", program))?
    .with_context(|| format!("failed to execute {}", program))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!(
            "{} exited with {}: {}",
            program,
            output.status.code().unwrap_or(-1),
            stderr.trim()
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Like [`run`] but logs and swallows failures
pub async fn stdout_of(program: &str, args: &[&str]) -> Option<String> {
    match run(program, args).await {
        Ok(stdout) => Some(stdout),
        Err(e) => {
            debug!("Command {} {:?} unavailable: {:#}", program, args, e);
            None
        }
    }
}
