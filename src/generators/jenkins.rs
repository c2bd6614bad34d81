//! WC-014: Jenkins backend: declarative `Jenkinsfile`.
//!
//! Each action becomes a stage; lifecycle exclusions become `when` guards
//! on the `current_lifecycle` build parameter. Platform actions are native
//! Jenkins steps. Actions that must always run go to `post { always }`.

use super::shell::{self, Interpolator};
use crate::core::codegen::{select_steps, Backend, Rendered, Step};
use crate::core::error::GenerationError;
use crate::core::provenance::Provenance;
use crate::core::types::{ActionKind, Docker, GitCredentials, Lifecycle, Target, WindFile};

const PHASE_PARAM: &str = "current_lifecycle";
const DEFAULT_REPORTS: &str = "**/test-reports/*.xml";

/// Renders windfiles into declarative Jenkins pipelines.
#[derive(Debug, Clone, Copy, Default)]
pub struct JenkinsBackend;

impl Backend for JenkinsBackend {
    fn target(&self) -> Target {
        Target::Jenkins
    }

    fn render(&self, windfile: &WindFile, provenance: &Provenance) -> Result<Rendered, GenerationError> {
        let steps = select_steps(windfile, provenance, Target::Jenkins)?;
        let mut interp = Interpolator::new();

        let mut pipeline = Vec::new();
        match &windfile.metadata.docker {
            Some(docker) => pipeline.extend(block("agent", block("docker", docker_agent(docker, false)))),
            None => pipeline.push("agent any".to_string()),
        }
        pipeline.extend(block(
            "parameters",
            vec![format!(
                "string(name: {}, defaultValue: '', description: 'lifecycle phase of this run')",
                groovy_str(PHASE_PARAM)
            )],
        ));

        let globals = interp.environment(&windfile.environment, "<pipeline>");
        if !globals.is_empty() {
            pipeline.extend(block("environment", environment_entries(&globals)));
        }

        let mut stages = Vec::new();
        for (name, repo) in &windfile.repositories {
            let origin = format!("checkout {}", name);
            let mut git = format!(
                "git url: {}, branch: {}",
                groovy_str(&interp.text(&repo.url, &origin)),
                groovy_str(&interp.text(&repo.branch, &origin))
            );
            match &windfile.metadata.git_credentials {
                Some(GitCredentials::Id(id)) => git.push_str(&format!(", credentialsId: {}", groovy_str(id))),
                Some(GitCredentials::Basic { .. }) => {
                    return Err(GenerationError::InvalidMetadata {
                        target: Target::Jenkins,
                        field: "gitCredentials".to_string(),
                        message: "Jenkins needs a credentials id, not a username/password pair".to_string(),
                    })
                }
                None => {}
            }
            let path = interp.text(&repo.path, &origin);
            stages.extend(block(
                &format!("stage({})", groovy_str(&origin)),
                block("steps", block(&format!("dir({})", groovy_str(&path)), vec![git])),
            ));
        }

        let mut always = Vec::new();
        for step in &steps {
            if step.action.run_always() {
                always.extend(render_post_action(step, windfile, &mut interp));
            } else {
                stages.extend(render_stage(step, windfile, &mut interp));
            }
        }
        pipeline.extend(block("stages", stages));
        if !always.is_empty() {
            pipeline.extend(block("post", block("always", block("script", always))));
        }

        let mut out = vec![
            format!("// {}", windfile.metadata.name),
            format!("// generated by windc from api {}", windfile.api),
        ];
        out.extend(block("pipeline", pipeline));
        let mut text = out.join("\n");
        text.push('\n');
        Ok(Rendered::new(Target::Jenkins, text, interp.into_unresolved()))
    }
}

fn render_stage(step: &Step<'_>, windfile: &WindFile, interp: &mut Interpolator) -> Vec<String> {
    let action = step.action;
    let mut scope = interp.fork();
    let mut inner = vec![origin_comment(step)];

    let exclude = &action.settings.exclude_during;
    if !exclude.is_empty() {
        let conditions: Vec<String> = exclude
            .iter()
            .map(|p| format!("not {{ expression {{ params.{} == {} }} }}", PHASE_PARAM, groovy_str(&p.to_string())))
            .collect();
        if conditions.len() == 1 {
            inner.extend(block("when", conditions));
        } else {
            inner.extend(block("when", block("allOf", conditions)));
        }
    }

    if let Some(docker) = shell::docker_override(action, windfile.metadata.docker.as_ref()) {
        inner.extend(block("agent", block("docker", docker_agent(docker, true))));
    }

    let env = scope.environment(&action.settings.environment, step.name);
    if !env.is_empty() {
        inner.extend(block("environment", environment_entries(&env)));
    }

    inner.extend(block("steps", action_steps(step, &mut scope)));
    interp.absorb(scope);
    block(&format!("stage({})", groovy_str(step.name)), inner)
}

/// Scripted form of an action inside `post { always { script { ... } } }`.
fn render_post_action(step: &Step<'_>, windfile: &WindFile, interp: &mut Interpolator) -> Vec<String> {
    let action = step.action;
    let mut scope = interp.fork();

    let env = scope.environment(&action.settings.environment, step.name);
    let mut body = action_steps(step, &mut scope);
    if let Some(docker) = shell::docker_override(action, windfile.metadata.docker.as_ref()) {
        let args = docker_args(docker);
        let head = if args.is_empty() {
            format!("docker.image({}).inside", groovy_str(&docker.reference()))
        } else {
            format!("docker.image({}).inside({})", groovy_str(&docker.reference()), groovy_str(&args))
        };
        body = block(&head, body);
    }
    if !env.is_empty() {
        let list: Vec<String> = env
            .iter()
            .map(|(k, v)| groovy_str(&format!("{}={}", k, v)))
            .collect();
        body = block(&format!("withEnv([{}])", list.join(", ")), body);
    }
    let exclude = &action.settings.exclude_during;
    if !exclude.is_empty() {
        body = block(&format!("if ({})", post_condition(exclude)), body);
    }
    interp.absorb(scope);

    let mut lines = vec![origin_comment(step)];
    lines.extend(body);
    lines
}

/// Steps performing the action itself, wrapped in `dir()` for a workdir.
fn action_steps(step: &Step<'_>, scope: &mut Interpolator) -> Vec<String> {
    let action = step.action;
    let mut lines = match &action.kind {
        ActionKind::Platform { file, function, kind } => {
            let file = file.as_ref().map(|f| scope.text(f, step.name));
            if kind.as_deref() == Some("junit") {
                vec![format!("junit {}", groovy_str(file.as_deref().unwrap_or(DEFAULT_REPORTS)))]
            } else {
                match file {
                    Some(file) => block(
                        "script",
                        vec![
                            format!("def action = load {}", groovy_str(&file)),
                            format!("action.{}()", function),
                        ],
                    ),
                    None => block("script", vec![format!("{}()", function)]),
                }
            }
        }
        ActionKind::Script { .. } | ActionKind::File { .. } | ActionKind::External { .. } => {
            let mut content = vec!["set -e".to_string()];
            content.extend(shell::assignment_lines(
                &scope.parameters(&action.settings.parameters, step.name),
            ));
            content.extend(shell::body_lines(action, scope));
            sh_step(&content)
        }
    };
    if let Some(workdir) = &action.settings.workdir {
        let workdir = scope.text(workdir, step.name);
        lines = block(&format!("dir({})", groovy_str(&workdir)), lines);
    }
    lines
}

/// `sh '''...'''` with bash as interpreter.
fn sh_step(content: &[String]) -> Vec<String> {
    let mut lines = vec!["sh '''#!/usr/bin/env bash".to_string()];
    lines.extend(content.iter().map(|l| escape_triple(l)));
    lines.push("'''".to_string());
    lines
}

fn origin_comment(step: &Step<'_>) -> String {
    format!(
        "// step {}: generated from {} ({})",
        step.name, step.record.original_name, step.record.original_kind
    )
}

fn post_condition(exclude: &[Lifecycle]) -> String {
    exclude
        .iter()
        .map(|p| format!("params.{} != {}", PHASE_PARAM, groovy_str(&p.to_string())))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn docker_agent(docker: &Docker, reuse_node: bool) -> Vec<String> {
    let mut lines = vec![format!("image {}", groovy_str(&docker.reference()))];
    let args = docker_args(docker);
    if !args.is_empty() {
        lines.push(format!("args {}", groovy_str(&args)));
    }
    if reuse_node {
        lines.push("reuseNode true".to_string());
    }
    lines
}

fn docker_args(docker: &Docker) -> String {
    docker
        .volumes
        .iter()
        .map(|v| format!("-v {}", v))
        .chain(docker.parameters.iter().cloned())
        .collect::<Vec<_>>()
        .join(" ")
}

fn environment_entries(pairs: &[(String, String)]) -> Vec<String> {
    pairs
        .iter()
        .map(|(k, v)| format!("{} = {}", k, groovy_str(v)))
        .collect()
}

fn block(head: &str, inner: Vec<String>) -> Vec<String> {
    let mut lines = vec![format!("{} {{", head)];
    lines.extend(shell::indent(&inner, 2));
    lines.push("}".to_string());
    lines
}

/// Single-quoted Groovy string (no interpolation).
fn groovy_str(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Escape a line for a `'''` Groovy string.
fn escape_triple(line: &str) -> String {
    line.replace('\\', "\\\\").replace("'''", "\\'\\'\\'")
}
