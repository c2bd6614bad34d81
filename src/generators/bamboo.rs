//! WC-015: Bamboo backend: YAML specs, version 2.
//!
//! One stage with one job. Actions become script tasks in the job; actions
//! that must always run become final tasks. The lifecycle phase arrives as
//! the `lifecycle_stage` plan variable (`$bamboo_lifecycle_stage` in tasks).

use super::shell::{self, Interpolator};
use crate::core::codegen::{select_steps, Backend, Rendered, Step};
use crate::core::error::{GenerationError, SyntaxCheckWarning};
use crate::core::provenance::Provenance;
use crate::core::types::{ActionKind, Docker, GitCredentials, Target, WindFile};
use serde_yaml_ng::{Mapping, Value};

const STAGE: &str = "Default Stage";
const JOB: &str = "Default Job";
const JOB_KEY: &str = "JOB1";
const PHASE_VAR: &str = "lifecycle_stage";
const DEFAULT_REPORTS: &str = "**/test-reports/*.xml";

/// Renders windfiles into Bamboo YAML specs.
#[derive(Debug, Clone, Copy, Default)]
pub struct BambooBackend;

impl Backend for BambooBackend {
    fn target(&self) -> Target {
        Target::Bamboo
    }

    fn render(&self, windfile: &WindFile, provenance: &Provenance) -> Result<Rendered, GenerationError> {
        let (project, plan) = plan_keys(windfile.metadata.id.as_deref())?;
        let steps = select_steps(windfile, provenance, Target::Bamboo)?;
        let mut interp = Interpolator::new();
        let globals = interp.environment(&windfile.environment, "<pipeline>");

        let mut tasks = Vec::new();
        let mut final_tasks = Vec::new();
        let mut repositories = Vec::new();

        for (name, repo) in &windfile.repositories {
            let mut entry = vec![
                ("type", Value::from("git")),
                ("url", Value::from(interp.text(&repo.url, name))),
                ("branch", Value::from(interp.text(&repo.branch, name))),
            ];
            match &windfile.metadata.git_credentials {
                Some(GitCredentials::Id(id)) => entry.push(("shared-credentials", Value::from(id.as_str()))),
                Some(GitCredentials::Basic { .. }) => {
                    return Err(GenerationError::InvalidMetadata {
                        target: Target::Bamboo,
                        field: "gitCredentials".to_string(),
                        message: "Bamboo needs a shared credentials id, not a username/password pair"
                            .to_string(),
                    })
                }
                None => {}
            }
            repositories.push(single(name, map(entry)));
            tasks.push(single(
                "checkout",
                map(vec![
                    ("repository", Value::from(name.as_str())),
                    ("path", Value::from(interp.text(&repo.path, name))),
                    ("force-clean-build", Value::Bool(false)),
                ]),
            ));
        }

        for step in &steps {
            let task = if step.platform {
                match platform_task(step, &mut interp) {
                    Some(task) => task,
                    None => {
                        tracing::info!(action = step.name, "platform action has no Bamboo form, skipping");
                        continue;
                    }
                }
            } else {
                script_task(step, windfile, &globals, &mut interp)
            };
            if step.action.run_always() {
                final_tasks.push(task);
            } else {
                tasks.push(task);
            }
        }

        let mut job = vec![("key", Value::from(JOB_KEY))];
        if let Some(docker) = &windfile.metadata.docker {
            job.push(("docker", docker_spec(docker)));
        }
        job.push(("tasks", Value::Sequence(tasks)));
        if !final_tasks.is_empty() {
            job.push(("final-tasks", Value::Sequence(final_tasks)));
        }

        let mut variables = Mapping::new();
        variables.insert(Value::from(PHASE_VAR), Value::from(""));

        let mut root = vec![
            ("version", Value::from(2)),
            (
                "plan",
                map(vec![
                    ("project-key", Value::from(project)),
                    ("key", Value::from(plan)),
                    ("name", Value::from(windfile.metadata.name.as_str())),
                ]),
            ),
            (
                "stages",
                Value::Sequence(vec![single(
                    STAGE,
                    map(vec![
                        ("manual", Value::Bool(false)),
                        ("final", Value::Bool(false)),
                        ("jobs", Value::Sequence(vec![Value::from(JOB)])),
                    ]),
                )]),
            ),
            (JOB, map(job)),
        ];
        if !repositories.is_empty() {
            root.push(("repositories", Value::Sequence(repositories)));
        }
        root.push(("variables", Value::Mapping(variables)));

        let text = serde_yaml_ng::to_string(&map(root)).map_err(|e| GenerationError::InvalidMetadata {
            target: Target::Bamboo,
            field: "metadata".to_string(),
            message: format!("cannot serialize plan: {}", e),
        })?;
        Ok(Rendered::new(Target::Bamboo, format!("---\n{}", text), interp.into_unresolved()))
    }

    fn check(&self, text: &str) -> Option<SyntaxCheckWarning> {
        match serde_yaml_ng::from_str::<Value>(text) {
            Ok(Value::Mapping(_)) => None,
            Ok(_) => Some(SyntaxCheckWarning {
                target: Target::Bamboo,
                exit_code: 1,
                stdout: String::new(),
                stderr: "plan is not a mapping".to_string(),
            }),
            Err(e) => Some(SyntaxCheckWarning {
                target: Target::Bamboo,
                exit_code: 1,
                stdout: String::new(),
                stderr: e.to_string(),
            }),
        }
    }
}

/// Split `PROJECT-PLAN` into Bamboo project and plan keys.
fn plan_keys(id: Option<&str>) -> Result<(String, String), GenerationError> {
    let invalid = |message: String| GenerationError::InvalidMetadata {
        target: Target::Bamboo,
        field: "metadata.id".to_string(),
        message,
    };
    let id = id.ok_or_else(|| invalid("a PROJECT-PLAN id is required".to_string()))?;
    let valid_key = |k: &str| {
        k.chars().next().is_some_and(|c| c.is_ascii_uppercase())
            && k.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
    };
    match id.split_once('-') {
        Some((project, plan)) if valid_key(project) && valid_key(plan) => {
            Ok((project.to_string(), plan.to_string()))
        }
        _ => Err(invalid(format!("'{}' is not of the form PROJECT-PLAN", id))),
    }
}

fn script_task(
    step: &Step<'_>,
    windfile: &WindFile,
    globals: &[(String, String)],
    interp: &mut Interpolator,
) -> Value {
    let action = step.action;
    let mut scope = interp.fork();

    let mut lines = vec!["#!/usr/bin/env bash".to_string()];
    lines.extend(shell::lifecycle_guards(
        step.name,
        &action.settings.exclude_during,
        &format!("bamboo_{}", PHASE_VAR),
        "exit 0",
    ));
    lines.push("set -e".to_string());
    lines.extend(shell::export_lines(globals));
    let env = scope.environment(&action.settings.environment, step.name);
    lines.extend(shell::export_lines(&env));

    let mut inner = shell::assignment_lines(&scope.parameters(&action.settings.parameters, step.name));
    if let Some(workdir) = &action.settings.workdir {
        inner.push(format!("cd {}", shell::quote(&scope.text(workdir, step.name))));
    }
    inner.extend(shell::body_lines(action, &mut scope));

    match shell::docker_override(action, windfile.metadata.docker.as_ref()) {
        Some(docker) => {
            let forward: Vec<String> = globals.iter().chain(&env).map(|(k, _)| k.clone()).collect();
            lines.extend(shell::docker_wrap(docker, &forward, &inner));
        }
        None => lines.extend(inner),
    }
    interp.absorb(scope);

    let mut script = lines.join("\n");
    script.push('\n');
    single(
        "script",
        map(vec![
            ("interpreter", Value::from("SHELL")),
            ("scripts", Value::Sequence(vec![Value::from(script)])),
            ("description", Value::from(description(step))),
        ]),
    )
}

/// Native task for a platform action; only JUnit reports have one.
fn platform_task(step: &Step<'_>, interp: &mut Interpolator) -> Option<Value> {
    let ActionKind::Platform { file, kind, .. } = &step.action.kind else {
        return None;
    };
    if kind.as_deref() != Some("junit") {
        return None;
    }
    let results = file
        .as_ref()
        .map(|f| interp.text(f, step.name))
        .unwrap_or_else(|| DEFAULT_REPORTS.to_string());
    Some(single(
        "test-parser",
        map(vec![
            ("type", Value::from("junit")),
            ("test-results", Value::Sequence(vec![Value::from(results)])),
            ("description", Value::from(description(step))),
        ]),
    ))
}

fn description(step: &Step<'_>) -> String {
    if step.record.original_name == step.name {
        step.name.to_string()
    } else {
        format!("{} (from {})", step.name, step.record.original_name)
    }
}

fn docker_spec(docker: &Docker) -> Value {
    let mut spec = vec![("image", Value::from(docker.reference()))];
    if !docker.volumes.is_empty() {
        let mut volumes = Mapping::new();
        for volume in &docker.volumes {
            let (host, container) = volume.split_once(':').unwrap_or((volume.as_str(), volume.as_str()));
            volumes.insert(Value::from(host), Value::from(container));
        }
        spec.push(("volumes", Value::Mapping(volumes)));
    }
    if !docker.parameters.is_empty() {
        spec.push(("docker-run-arguments", Value::Sequence(
            docker.parameters.iter().map(|p| Value::from(p.as_str())).collect(),
        )));
    }
    map(spec)
}

fn map(pairs: Vec<(&str, Value)>) -> Value {
    Value::Mapping(pairs.into_iter().map(|(k, v)| (Value::from(k), v)).collect())
}

fn single(key: &str, value: Value) -> Value {
    map(vec![(key, value)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actionfile::NoSource;
    use crate::core::compiler::CompileOptions;
    use crate::core::merger::merge;
    use crate::core::parser::parse_document;
    use crate::core::validator::validate;
    use crate::transport::local::exec_local;

    fn try_render(yaml: &str) -> Result<Rendered, GenerationError> {
        let wf = validate(&parse_document(yaml).unwrap(), &CompileOptions::default()).unwrap();
        let mut prov = Provenance::new();
        let merged = merge(&wf, &NoSource, &mut prov).unwrap();
        BambooBackend.render(&merged, &prov)
    }

    fn render(yaml: &str) -> Value {
        let r = try_render(yaml).unwrap();
        assert!(BambooBackend.check(&r.text).is_none());
        serde_yaml_ng::from_str(&r.text).unwrap()
    }

    const HEADER: &str = "api: v0.0.1\nmetadata: {name: demo, id: PROJ-BUILD, description: d, author: a}\n";

    fn script_of(task: &Value) -> String {
        task["script"]["scripts"][0].as_str().unwrap().to_string()
    }

    #[test]
    fn test_wc015_plan_layout() {
        let plan = render(&format!(
            "{}environment:\n  FOO: \"1\"\nactions:\n  build:\n    script: echo $FOO\n",
            HEADER
        ));
        assert_eq!(plan["version"], Value::from(2));
        assert_eq!(plan["plan"]["project-key"].as_str(), Some("PROJ"));
        assert_eq!(plan["plan"]["key"].as_str(), Some("BUILD"));
        assert_eq!(plan["plan"]["name"].as_str(), Some("demo"));
        assert_eq!(plan["stages"][0][STAGE]["jobs"][0].as_str(), Some(JOB));
        assert_eq!(plan["variables"]["lifecycle_stage"].as_str(), Some(""));

        let tasks = plan[JOB]["tasks"].as_sequence().unwrap();
        assert_eq!(tasks.len(), 1);
        let script = script_of(&tasks[0]);
        assert!(script.starts_with("#!/usr/bin/env bash\n"));
        assert!(script.contains("export FOO=\"1\"\necho $FOO\n"));
        assert_eq!(tasks[0]["script"]["description"].as_str(), Some("build"));
    }

    #[test]
    fn test_wc015_plan_key_required() {
        let err = try_render("api: v1\nmetadata: {name: n, description: d, author: a}\nactions:\n  a: {script: ls}\n")
            .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidMetadata { ref field, .. } if field == "metadata.id"));
    }

    #[test]
    fn test_wc015_plan_key_format() {
        assert!(plan_keys(Some("proj-build")).is_err());
        assert!(plan_keys(Some("PROJ")).is_err());
        assert!(plan_keys(Some("PROJ-")).is_err());
        assert_eq!(
            plan_keys(Some("AB1-PLAN2")).unwrap(),
            ("AB1".to_string(), "PLAN2".to_string())
        );
    }

    #[test]
    fn test_wc015_job_docker_and_repositories() {
        let plan = render(
            "api: v1\nmetadata:\n  name: n\n  id: P-Q\n  description: d\n  author: a\n  gitCredentials: bitbucket\n  docker: {image: rust, volumes: [\"/cache:/root/.cargo\"]}\nrepositories:\n  app: {url: \"https://example.com/app.git\", branch: main, path: src}\nactions:\n  a: {script: ls}\n",
        );
        assert_eq!(plan[JOB]["docker"]["image"].as_str(), Some("rust:latest"));
        assert_eq!(plan[JOB]["docker"]["volumes"]["/cache"].as_str(), Some("/root/.cargo"));
        assert_eq!(plan["repositories"][0]["app"]["url"].as_str(), Some("https://example.com/app.git"));
        assert_eq!(plan["repositories"][0]["app"]["shared-credentials"].as_str(), Some("bitbucket"));
        let checkout = &plan[JOB]["tasks"][0]["checkout"];
        assert_eq!(checkout["repository"].as_str(), Some("app"));
        assert_eq!(checkout["path"].as_str(), Some("src"));
    }

    #[test]
    fn test_wc015_lifecycle_guard_runs() {
        let plan = render(&format!(
            "{}actions:\n  build:\n    script: echo BODY-RAN\n    excludeDuring: [preparation]\n",
            HEADER
        ));
        let script = script_of(&plan[JOB]["tasks"][0]);
        assert!(script.contains("if [[ \"${bamboo_lifecycle_stage}\" == \"preparation\" ]]; then"));

        let skipped = exec_local(&format!("export bamboo_lifecycle_stage=preparation\n{}", script), &[]).unwrap();
        assert!(skipped.success());
        assert!(!skipped.stdout.contains("BODY-RAN"));
        let ran = exec_local(&format!("export bamboo_lifecycle_stage=evaluation\n{}", script), &[]).unwrap();
        assert!(ran.stdout.contains("BODY-RAN"));
    }

    #[test]
    fn test_wc015_final_tasks_and_junit() {
        let plan = render(&format!(
            "{}actions:\n  build:\n    script: make\n  cleanup:\n    script: rm -rf out\n    runAlways: true\n  report:\n    kind: junit\n    file: target/reports/*.xml\n    runAlways: true\n  groovy:\n    file: x.groovy\n    function: go\n",
            HEADER
        ));
        let tasks = plan[JOB]["tasks"].as_sequence().unwrap();
        assert_eq!(tasks.len(), 1);
        let finals = plan[JOB]["final-tasks"].as_sequence().unwrap();
        assert_eq!(finals.len(), 2);
        assert!(script_of(&finals[0]).contains("rm -rf out"));
        assert_eq!(finals[1]["test-parser"]["type"].as_str(), Some("junit"));
        assert_eq!(
            finals[1]["test-parser"]["test-results"][0].as_str(),
            Some("target/reports/*.xml")
        );
    }

    #[test]
    fn test_wc015_docker_override_wraps_script() {
        let plan = render(&format!(
            "{}environment:\n  FOO: x\nactions:\n  build:\n    script: make\n    docker: {{image: alpine}}\n",
            HEADER
        ));
        let script = script_of(&plan[JOB]["tasks"][0]);
        assert!(script.contains("-e FOO alpine:latest bash -s <<'WINDC_EOF'\nset -e\nmake\nWINDC_EOF\n"));
    }

    #[test]
    fn test_wc015_basic_credentials_rejected() {
        let err = try_render(
            "api: v1\nmetadata:\n  name: n\n  id: P-Q\n  description: d\n  author: a\n  gitCredentials: {username: u, password: p}\nrepositories:\n  app: {url: u, branch: b, path: p}\nactions:\n  a: {script: ls}\n",
        )
        .unwrap_err();
        assert!(matches!(err, GenerationError::InvalidMetadata { target: Target::Bamboo, .. }));
    }

    #[test]
    fn test_wc015_check_rejects_broken_yaml() {
        let w = BambooBackend.check("plan: [unclosed").unwrap();
        assert_eq!(w.target, Target::Bamboo);
        assert!(BambooBackend.check("- just\n- a list\n").is_some());
    }
}
