use std::process::Stdio;

use tokio::process::Command;

use crate::error::CollectorError;

/// Run `program` and return its stdout. A missing binary or non-zero exit is
/// `SourceUnavailable`.
pub async fn run(program: &str, args: &[&str]) -> Result<String, CollectorError> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|err| CollectorError::unavailable(format!("{}: {}", program, err)))?;

    if !output.status.success() {
        return Err(CollectorError::unavailable(format!(
            "{} exited with {}",
            program, output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
