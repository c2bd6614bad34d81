//! WC-016/017: Transport: run rendered cli scripts locally or in a worker
//! container.

pub mod docker;
pub mod local;

/// Output from executing a script.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Where a rendered cli script runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runner {
    /// `bash` on this host
    Local,
    /// A worker container started through the `docker` binary
    Container { image: String },
}

/// Run a rendered cli script for `phase`, streaming its output to the
/// terminal. Returns the script's exit code.
pub fn run_script(script: &str, phase: &str, runner: &Runner) -> Result<i32, String> {
    match runner {
        Runner::Local => local::run_local(script, &[phase]),
        Runner::Container { image } => {
            let outcome = docker::run_in_container(script, phase, image, &mut |line| println!("{}", line))?;
            Ok(outcome.exit_code)
        }
    }
}
