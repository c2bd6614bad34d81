//! WC-016: Local execution transport.

use super::ExecOutput;
use std::io::Write;
use std::process::{Command, Stdio};

/// Execute a script locally via `bash -s`, passing `args` as `$1..`.
/// Uses bash (not sh/dash) because generated scripts use `[[` and `pipefail`.
pub fn exec_local(script: &str, args: &[&str]) -> Result<ExecOutput, String> {
    let mut child = bash_stdin(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    if let Some(ref mut stdin) = child.stdin {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let output = child
        .wait_with_output()
        .map_err(|e| format!("wait error: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Same as [`exec_local`] with output going straight to the terminal.
/// Returns the exit code.
pub fn run_local(script: &str, args: &[&str]) -> Result<i32, String> {
    let mut child = bash_stdin(args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    // Drop stdin after writing so bash sees EOF.
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(script.as_bytes())
            .map_err(|e| format!("stdin write error: {}", e))?;
    }

    let status = child.wait().map_err(|e| format!("wait error: {}", e))?;
    Ok(status.code().unwrap_or(-1))
}

/// Parse `script` with `bash -n` without running it.
pub fn check_syntax(script: &str) -> Result<ExecOutput, String> {
    let mut file = tempfile::NamedTempFile::new().map_err(|e| format!("cannot create temp file: {}", e))?;
    file.write_all(script.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| format!("cannot write temp file: {}", e))?;

    let output = Command::new("bash")
        .arg("-n")
        .arg(file.path())
        .output()
        .map_err(|e| format!("failed to spawn bash: {}", e))?;

    Ok(ExecOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

fn bash_stdin(args: &[&str]) -> Command {
    let mut cmd = Command::new("bash");
    cmd.arg("-s").arg("--").args(args).stdin(Stdio::piped());
    cmd
}
