//! WC-013: Local-runner backend: a self-contained bash script.
//!
//! Layout: prefix (shebang, strict mode, pipeline exports), one clone unit
//! per repository, one unit per action, the `windc_always` trap handler
//! when any action must always run, then `main`. The script takes the
//! lifecycle phase as `$1`.

use super::shell::{self, Interpolator};
use crate::core::codegen::{select_steps, Backend, Rendered, Step};
use crate::core::error::{GenerationError, SyntaxCheckWarning};
use crate::core::provenance::Provenance;
use crate::core::types::{ActionKind, Target, WindFile};
use crate::transport::local;
use std::collections::HashSet;

const ALWAYS_UNIT: &str = "windc_always";
const MAIN_UNIT: &str = "main";
const PHASE_VAR: &str = "_windc_lifecycle";
const UNIT_PHASE_VAR: &str = "_windc_phase";

/// Renders windfiles into bash scripts for local runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct CliBackend;

impl Backend for CliBackend {
    fn target(&self) -> Target {
        Target::Cli
    }

    fn render(&self, windfile: &WindFile, provenance: &Provenance) -> Result<Rendered, GenerationError> {
        let steps = select_steps(windfile, provenance, Target::Cli)?;
        let mut interp = Interpolator::new();
        let mut units: HashSet<String> = [ALWAYS_UNIT, MAIN_UNIT].iter().map(|s| s.to_string()).collect();
        let mut claim = |name: &str| -> Result<(), GenerationError> {
            if units.insert(name.to_string()) {
                Ok(())
            } else {
                Err(GenerationError::NameClash { name: name.to_string() })
            }
        };

        let mut out = vec!["#!/usr/bin/env bash".to_string(), "set -eo pipefail".to_string()];
        let globals = interp.environment(&windfile.environment, "<pipeline>");
        out.extend(shell::export_lines(&globals));
        let global_names: Vec<String> = globals.into_iter().map(|(k, _)| k).collect();

        let mut calls = Vec::new();
        let mut always = Vec::new();

        for (name, repo) in &windfile.repositories {
            let unit = format!("clone_{}", name);
            claim(&unit)?;
            out.push(String::new());
            out.push(format!("# repository {}", name));
            out.push(format!("{} () {{", unit));
            out.push(format!("  echo {}", shell::single_quote(&format!("cloning {}", name))));
            out.push(format!(
                "  git clone {} --branch {} {}",
                shell::quote(&interp.text(&repo.url, &unit)),
                shell::quote(&interp.text(&repo.branch, &unit)),
                shell::quote(&interp.text(&repo.path, &unit)),
            ));
            out.push("}".to_string());
            calls.push(unit);
        }

        for step in &steps {
            if step.platform {
                tracing::info!(action = step.name, "platform action has no shell form, skipping");
                continue;
            }
            claim(step.name)?;
            out.push(String::new());
            out.extend(render_unit(step, windfile, &global_names, &mut interp));
            if step.action.run_always() {
                always.push(step.name.to_string());
            } else {
                calls.push(step.name.to_string());
            }
        }

        if !always.is_empty() {
            out.push(String::new());
            out.extend(render_always(&always));
        }

        out.push(String::new());
        out.push(format!("{} () {{", MAIN_UNIT));
        out.push(format!("  {}=\"${{1:-}}\"", PHASE_VAR));
        if !always.is_empty() {
            out.push(format!("  trap {} EXIT", ALWAYS_UNIT));
        }
        for call in &calls {
            out.push(format!("  {} \"${{{}}}\"", call, PHASE_VAR));
        }
        if calls.is_empty() {
            out.push("  :".to_string());
        }
        out.push("}".to_string());
        out.push(String::new());
        out.push(format!("{} \"$@\"", MAIN_UNIT));

        let mut text = out.join("\n");
        text.push('\n');
        tracing::debug!(units = calls.len() + always.len(), "cli script rendered");
        Ok(Rendered::new(Target::Cli, text, interp.into_unresolved()))
    }

    fn check(&self, text: &str) -> Option<SyntaxCheckWarning> {
        let warning = |exit_code, stdout, stderr| SyntaxCheckWarning {
            target: Target::Cli,
            exit_code,
            stdout,
            stderr,
        };
        match local::check_syntax(text) {
            Ok(out) if out.success() => None,
            Ok(out) => Some(warning(out.exit_code, out.stdout, out.stderr)),
            Err(e) => Some(warning(-1, String::new(), e)),
        }
    }
}

/// One action as a subshell function so its exports stay local.
fn render_unit(step: &Step<'_>, windfile: &WindFile, global_names: &[String], interp: &mut Interpolator) -> Vec<String> {
    let action = step.action;
    let mut scope = interp.fork();

    let mut lines = vec![
        format!("# step {}", step.name),
        format!(
            "# generated from {} ({})",
            step.record.original_name, step.record.original_kind
        ),
        format!("{} () (", step.name),
    ];

    let mut body = Vec::new();
    if !action.settings.exclude_during.is_empty() {
        body.push(format!("{}=\"${{1:-}}\"", UNIT_PHASE_VAR));
        body.extend(shell::lifecycle_guards(
            step.name,
            &action.settings.exclude_during,
            UNIT_PHASE_VAR,
            "exit 0",
        ));
    }
    body.push("set -e".to_string());
    body.push(format!("echo {}", shell::single_quote(&format!("executing {}", step.name))));

    let env = scope.environment(&action.settings.environment, step.name);
    body.extend(shell::export_lines(&env));

    let mut inner = shell::assignment_lines(&scope.parameters(&action.settings.parameters, step.name));
    if let Some(workdir) = &action.settings.workdir {
        inner.push(format!("cd {}", shell::quote(&scope.text(workdir, step.name))));
    }
    inner.extend(shell::body_lines(action, &mut scope));
    if matches!(action.kind, ActionKind::Script { .. }) && inner.is_empty() {
        inner.push(":".to_string());
    }

    lines.extend(shell::indent(&body, 2));
    match shell::docker_override(action, windfile.metadata.docker.as_ref()) {
        Some(docker) => {
            let mut forward = global_names.to_vec();
            forward.extend(env.into_iter().map(|(k, _)| k));
            let wrapped = shell::docker_wrap(docker, &forward, &inner);
            // The heredoc body and terminator must stay at column 0.
            if let Some((command, rest)) = wrapped.split_first() {
                lines.push(format!("  {}", command));
                lines.extend(rest.iter().cloned());
            }
        }
        None => lines.extend(shell::indent(&inner, 2)),
    }
    lines.push(")".to_string());

    interp.absorb(scope);
    lines
}

/// EXIT trap: run every always unit, keep the first failure.
fn render_always(always: &[String]) -> Vec<String> {
    let mut lines = vec![
        "# actions that run even after a failure".to_string(),
        format!("{} () {{", ALWAYS_UNIT),
        "  local _windc_status=$?".to_string(),
        "  local _windc_rc=0".to_string(),
        "  set +e".to_string(),
    ];
    for unit in always {
        lines.push(format!("  {} \"${{{}}}\"", unit, PHASE_VAR));
        lines.push("  _windc_rc=$?".to_string());
        lines.push(
            "  if [[ ${_windc_status} -eq 0 && ${_windc_rc} -ne 0 ]]; then _windc_status=${_windc_rc}; fi"
                .to_string(),
        );
    }
    lines.push("  exit ${_windc_status}".to_string());
    lines.push("}".to_string());
    lines
}
