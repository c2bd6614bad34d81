//! WC-012: Shell rendering helpers shared by the backends.
//!
//! The cli script, Jenkins `sh` steps and Bamboo script tasks all carry
//! bash. Quoting, interpolation bookkeeping, lifecycle guards and the
//! container wrapper are built the same way for each of them.

use crate::core::resolver::EnvContext;
use crate::core::types::{Action, ActionKind, Docker, Environment, Lifecycle, Parameters};

/// Heredoc delimiter for container-wrapped bodies.
pub const HEREDOC: &str = "WINDC_EOF";

/// Double-quote `value` for bash. `$` is kept live so runtime variables
/// still expand.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

/// Single-quote `value` for bash; nothing inside expands.
pub fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Interpolation state while rendering one output.
///
/// Values resolve against everything exported so far. Undefined names are
/// kept literal, collected, and logged once per occurrence with the unit
/// they appeared in.
#[derive(Debug, Clone, Default)]
pub struct Interpolator {
    context: EnvContext,
    unresolved: Vec<String>,
}

impl Interpolator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Child scope for one action: sees the current values, reports back
    /// through [`absorb`](Self::absorb).
    pub fn fork(&self) -> Self {
        Self {
            context: self.context.clone(),
            unresolved: Vec::new(),
        }
    }

    pub fn absorb(&mut self, child: Interpolator) {
        self.unresolved.extend(child.unresolved);
    }

    pub fn into_unresolved(self) -> Vec<String> {
        self.unresolved
    }

    /// Resolve an environment map in order, adding each entry to the scope.
    pub fn environment(&mut self, env: &Environment, origin: &str) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        let resolved = self.context.extend_env(env, &mut missing);
        self.report(missing, origin);
        resolved
    }

    /// Resolve a parameter map in order, adding each entry to the scope.
    pub fn parameters(&mut self, params: &Parameters, origin: &str) -> Vec<(String, String)> {
        let mut missing = Vec::new();
        let resolved = self.context.extend_params(params, &mut missing);
        self.report(missing, origin);
        resolved
    }

    /// Interpolate one piece of text.
    pub fn text(&mut self, text: &str, origin: &str) -> String {
        let out = self.context.interpolate(text);
        self.report(out.unresolved, origin);
        out.text
    }

    fn report(&mut self, missing: Vec<String>, origin: &str) {
        for name in missing {
            tracing::warn!(unit = origin, variable = name.as_str(), "undefined variable left unexpanded");
            self.unresolved.push(name);
        }
    }
}

/// Lines that end the current unit with `leave` (`return 0` or `exit 0`)
/// when `phase_var` names an excluded phase.
pub fn lifecycle_guards(name: &str, exclude: &[Lifecycle], phase_var: &str, leave: &str) -> Vec<String> {
    exclude
        .iter()
        .flat_map(|phase| {
            [
                format!("if [[ \"${{{}}}\" == \"{}\" ]]; then", phase_var, phase),
                format!("  echo {}", single_quote(&format!("{} is excluded during {}", name, phase))),
                format!("  {}", leave),
                "fi".to_string(),
            ]
        })
        .collect()
}

/// `NAME="value"` export lines.
pub fn export_lines(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(k, v)| format!("export {}={}", k, quote(v)))
        .collect()
}

/// `NAME="value"` shell variable assignments.
pub fn assignment_lines(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, quote(v)))
        .collect()
}

/// Shell command running a file action's body.
pub fn source_file(file: &str) -> String {
    if file.starts_with('/') || file.starts_with("./") || file.starts_with("../") {
        format!(". {}", quote(file))
    } else {
        format!(". {}", quote(&format!("./{}", file)))
    }
}

/// Body lines of a concrete action. Platform actions have no shell body.
pub fn body_lines(action: &Action, interp: &mut Interpolator) -> Vec<String> {
    match &action.kind {
        ActionKind::Script { script } => script
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| interp.text(l, &action.name))
            .collect(),
        ActionKind::File { file } => {
            let file = interp.text(file, &action.name);
            vec![source_file(&file)]
        }
        ActionKind::Platform { .. } | ActionKind::External { .. } => Vec::new(),
    }
}

/// The container an action overrides the pipeline with, if any.
pub fn docker_override<'a>(action: &'a Action, pipeline: Option<&Docker>) -> Option<&'a Docker> {
    action
        .settings
        .docker
        .as_ref()
        .filter(|d| Some(*d) != pipeline)
}

/// Wrap `inner` in `docker run ... bash -s` fed by a quoted heredoc.
/// `forward` names host variables passed into the container.
pub fn docker_wrap(docker: &Docker, forward: &[String], inner: &[String]) -> Vec<String> {
    let mut cmd = vec![
        "docker run --rm -i".to_string(),
        "-v \"$(pwd)\":\"$(pwd)\"".to_string(),
        "-w \"$(pwd)\"".to_string(),
    ];
    for name in forward {
        cmd.push(format!("-e {}", name));
    }
    for volume in &docker.volumes {
        cmd.push(format!("-v {}", quote(volume)));
    }
    cmd.extend(docker.parameters.iter().cloned());
    cmd.push(docker.reference());
    cmd.push(format!("bash -s <<'{}'", HEREDOC));

    let mut lines = vec![cmd.join(" ")];
    lines.push("set -e".to_string());
    lines.extend(inner.iter().cloned());
    lines.push(HEREDOC.to_string());
    lines
}

/// Indent every non-empty line by `width` spaces.
pub fn indent(lines: &[String], width: usize) -> Vec<String> {
    let pad = " ".repeat(width);
    lines
        .iter()
        .map(|l| if l.is_empty() { String::new() } else { format!("{}{}", pad, l) })
        .collect()
}
