//! WC-017: Container execution transport.
//!
//! Runs a rendered cli script inside a worker container through the `docker`
//! binary. Output is streamed line by line while the container runs. The
//! container and the mounted script file are removed on every exit path.

use crate::core::types::Docker;
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

/// Image used when neither the windfile nor the environment names one.
pub const DEFAULT_WORKER_IMAGE: &str = "ghcr.io/windc/worker:latest";

/// Environment variable overriding the worker image.
pub const WORKER_IMAGE_ENV: &str = "WINDC_WORKER_IMAGE";

/// Result of one container run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub container: String,
    pub image: String,
    pub exit_code: i32,
    /// Log lines streamed
    pub lines: usize,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Pick the worker image: pipeline docker, then `WINDC_WORKER_IMAGE`, then
/// the default.
pub fn worker_image(pipeline: Option<&Docker>) -> String {
    resolve_image(pipeline, std::env::var(WORKER_IMAGE_ENV).ok())
}

fn resolve_image(pipeline: Option<&Docker>, env: Option<String>) -> String {
    match (pipeline, env) {
        (Some(docker), _) => docker.reference(),
        (None, Some(image)) if !image.trim().is_empty() => image,
        _ => DEFAULT_WORKER_IMAGE.to_string(),
    }
}

/// Container name derived from the script, phase and process.
pub fn container_name(script: &str, phase: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(script.as_bytes());
    hasher.update(b"\0");
    hasher.update(phase.as_bytes());
    hasher.update(b"\0");
    hasher.update(&std::process::id().to_le_bytes());
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    hasher.update(&nanos.to_le_bytes());
    let hex = hasher.finalize().to_hex();
    format!("windc-{}", &hex.as_str()[..12])
}

/// Removes the container when dropped.
struct ContainerGuard {
    name: String,
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        let removed = Command::new("docker")
            .args(["rm", "-f", &self.name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = removed {
            tracing::warn!(container = self.name.as_str(), "cannot remove container: {}", e);
        }
    }
}

/// Run `script` in `image` as `bash /entrypoint.sh <phase>`, handing every
/// log line to `on_line`.
pub fn run_in_container(
    script: &str,
    phase: &str,
    image: &str,
    on_line: &mut dyn FnMut(&str),
) -> Result<RunOutcome, String> {
    let mut file = tempfile::NamedTempFile::new().map_err(|e| format!("cannot create temp file: {}", e))?;
    file.write_all(script.as_bytes())
        .and_then(|_| file.flush())
        .map_err(|e| format!("cannot write temp file: {}", e))?;

    let name = container_name(script, phase);
    let mount = format!("{}:/entrypoint.sh:ro", file.path().display());
    tracing::info!(container = name.as_str(), image, phase, "starting worker container");

    let started = Command::new("docker")
        .args(["run", "-d", "--name", &name, "-v", &mount, image, "bash", "/entrypoint.sh", phase])
        .output()
        .map_err(|e| format!("failed to spawn docker: {}", e))?;
    let _guard = ContainerGuard { name: name.clone() };
    if !started.status.success() {
        return Err(format!(
            "docker run failed: {}",
            String::from_utf8_lossy(&started.stderr).trim()
        ));
    }

    let lines = stream_logs(&name, on_line)?;

    let waited = Command::new("docker")
        .args(["wait", &name])
        .output()
        .map_err(|e| format!("failed to spawn docker: {}", e))?;
    let exit_code = String::from_utf8_lossy(&waited.stdout)
        .trim()
        .parse::<i32>()
        .map_err(|e| format!("unexpected docker wait output: {}", e))?;

    tracing::info!(container = name.as_str(), exit_code, lines, "worker container finished");
    Ok(RunOutcome {
        container: name,
        image: image.to_string(),
        exit_code,
        lines,
    })
}

/// Follow container logs until the stream ends.
fn stream_logs(name: &str, on_line: &mut dyn FnMut(&str)) -> Result<usize, String> {
    let mut child = Command::new("docker")
        .args(["logs", "-f", name])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn docker logs: {}", e))?;

    // Container stderr arrives on the logs process' stderr.
    let stderr = child.stderr.take();
    let errors = std::thread::spawn(move || {
        if let Some(stderr) = stderr {
            for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                eprintln!("{}", line);
            }
        }
    });

    let mut count = 0;
    if let Some(stdout) = child.stdout.take() {
        for line in BufReader::new(stdout).lines() {
            let line = line.map_err(|e| format!("log stream error: {}", e))?;
            on_line(&line);
            count += 1;
        }
    }

    child.wait().map_err(|e| format!("wait error: {}", e))?;
    if errors.join().is_err() {
        tracing::warn!(container = name, "stderr reader panicked");
    }
    Ok(count)
}
