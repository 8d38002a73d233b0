//! Bounded execution of supervisor and task commands

use anyhow::{Context, Result};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// Run `argv` to completion, failing on spawn errors or timeout
///
/// The child is killed if the timeout fires. A non-zero exit status is
/// returned as-is; use [`run_checked`] when it should be an error.
pub async fn run(argv: &[String], timeout: Duration) -> Result<Output> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow::anyhow!("Cannot run an empty command"))?;

    debug!("Running command: {}", argv_line(argv));

    let child = Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(timeout, child).await {
        Ok(output) => output.with_context(|| format!("Failed to run `{}`", argv_line(argv))),
        Err(_) => Err(anyhow::anyhow!(
            "`{}` timed out after {}s",
            argv_line(argv),
            timeout.as_secs()
        )),
    }
}

/// Run `argv` and require a zero exit status
pub async fn run_checked(argv: &[String], timeout: Duration) -> Result<Output> {
    let output = run(argv, timeout).await?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "`{}` exited with {}: {}",
            argv_line(argv),
            output
                .status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string()),
            stderr.trim()
        );
    }
    Ok(output)
}

/// Replace `{service}` in every argument
pub fn render(template: &[String], service: &str) -> Vec<String> {
    template
        .iter()
        .map(|arg| arg.replace(crate::config::SERVICE_PLACEHOLDER, service))
        .collect()
}

/// Shell-style rendering of an argv for logs and errors
pub fn argv_line(argv: &[String]) -> String {
    argv.join(" ")
}
