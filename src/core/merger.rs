//! WC-008: External action flattening.
//!
//! Every `use:` action is replaced, in place, by the steps of the actionfile
//! it references. Spliced steps are namespaced `<reference>_<step>` (nested
//! chains repeat the scheme) and inherit the use-site settings layered over
//! their own. Concrete actions pass through untouched, so merging a merged
//! windfile changes nothing.

use super::actionfile::ActionSource;
use super::error::{CompileError, MergeError};
use super::provenance::{Provenance, ProvenanceRecord};
use super::types::*;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Flatten all external actions of `windfile`, recording provenance for
/// every final action name.
pub fn merge(
    windfile: &WindFile,
    source: &dyn ActionSource,
    provenance: &mut Provenance,
) -> Result<WindFile, CompileError> {
    // Direct names are claimed before any splicing so that clashes fail the
    // same way whatever the declaration order.
    let reserved: HashSet<String> = windfile
        .actions
        .iter()
        .filter(|(_, a)| !a.is_external())
        .map(|(n, _)| n.clone())
        .collect();

    let mut splicer = Splicer {
        windfile,
        source,
        reserved,
        out: IndexMap::with_capacity(windfile.actions.len()),
        provenance,
    };

    for (name, action) in &windfile.actions {
        if action.is_external() {
            let mut chain = Vec::new();
            splicer.expand(name, name, action, &mut chain)?;
        } else {
            splicer
                .provenance
                .record(name.clone(), ProvenanceRecord::direct(name, action.tag()));
            splicer.out.insert(name.clone(), action.clone());
        }
    }

    tracing::info!(
        declared = windfile.actions.len(),
        merged = splicer.out.len(),
        "merge complete"
    );

    Ok(WindFile {
        actions: splicer.out,
        ..windfile.clone()
    })
}

struct Splicer<'a> {
    windfile: &'a WindFile,
    source: &'a dyn ActionSource,
    reserved: HashSet<String>,
    out: IndexMap<String, Action>,
    provenance: &'a mut Provenance,
}

impl Splicer<'_> {
    /// Splice the definition referenced by `site` under `prefix`.
    /// `root` is the windfile action the expansion started from.
    fn expand(
        &mut self,
        root: &str,
        prefix: &str,
        site: &Action,
        chain: &mut Vec<String>,
    ) -> Result<(), CompileError> {
        let ActionKind::External { reference } = &site.kind else {
            return Ok(());
        };

        if chain.contains(reference) {
            let mut cycle = chain.clone();
            cycle.push(reference.clone());
            return Err(MergeError::Cycle {
                action: root.to_string(),
                chain: cycle.join(" -> "),
            }
            .into());
        }

        let definition = self
            .source
            .fetch(reference)
            .map_err(|reason| MergeError::Unresolved {
                action: root.to_string(),
                reference: reference.clone(),
                reason,
            })?;

        tracing::debug!(
            action = root,
            reference = reference.as_str(),
            steps = definition.steps.len(),
            "splicing actionfile"
        );

        chain.push(reference.clone());
        for (step_name, step) in &definition.steps {
            let final_name = format!("{}_{}", prefix, step_name);
            let settings = layer(
                &site.settings,
                &step.settings,
                &definition.environment,
                self.windfile,
            );
            let spliced = Action {
                name: final_name.clone(),
                settings,
                kind: step.kind.clone(),
            };

            if spliced.is_external() {
                self.expand(root, &final_name, &spliced, chain)?;
                continue;
            }

            self.claim(&final_name, reference)?;
            self.provenance.record(
                final_name.clone(),
                ProvenanceRecord {
                    original_name: root.to_string(),
                    original_kind: ActionKindTag::External,
                    resolved_kind: spliced.tag(),
                    chain: chain.clone(),
                },
            );
            self.out.insert(final_name, spliced);
        }
        chain.pop();
        Ok(())
    }

    fn claim(&self, name: &str, reference: &str) -> Result<(), CompileError> {
        let existing = if self.reserved.contains(name) {
            Some(format!("{} (declared in the windfile)", name))
        } else if self.out.contains_key(name) {
            Some(
                self.provenance
                    .describe(name)
                    .unwrap_or_else(|| name.to_string()),
            )
        } else {
            None
        };
        match existing {
            Some(existing) => Err(MergeError::NameCollision {
                name: name.to_string(),
                reference: reference.to_string(),
                existing,
            }
            .into()),
            None => Ok(()),
        }
    }
}

/// Combine use-site settings with a step definition.
fn layer(
    site: &ActionSettings,
    step: &ActionSettings,
    definition_env: &Environment,
    windfile: &WindFile,
) -> ActionSettings {
    let mut environment = definition_env.clone();
    for (k, v) in &step.environment {
        environment.insert(k.clone(), v.clone());
    }
    // The windfile export already covers these; it wins over the definition.
    environment.retain(|k, _| !windfile.environment.contains_key(k));
    for (k, v) in &site.environment {
        environment.insert(k.clone(), v.clone());
    }

    let docker = match (&site.docker, &windfile.metadata.docker) {
        (Some(d), _) => Some(d.clone()),
        (None, Some(_)) => None,
        (None, None) => step.docker.clone(),
    };

    let mut exclude_during = Vec::with_capacity(site.exclude_during.len() + step.exclude_during.len());
    for phase in site.exclude_during.iter().chain(&step.exclude_during) {
        if !exclude_during.contains(phase) {
            exclude_during.push(*phase);
        }
    }

    ActionSettings {
        parameters: merge_parameters(&step.parameters, &site.parameters),
        environment,
        platform: site.platform.or(step.platform),
        docker,
        run_always: site.run_always.or(step.run_always),
        workdir: site.workdir.clone().or_else(|| step.workdir.clone()),
        exclude_during,
    }
}

/// Deep merge: keys of `over` win, nested objects merge recursively.
pub fn merge_parameters(base: &Parameters, over: &Parameters) -> Parameters {
    let mut merged = base.clone();
    for (key, value) in over {
        let combined = match (merged.get(key), value) {
            (Some(serde_json::Value::Object(b)), serde_json::Value::Object(o)) => {
                serde_json::Value::Object(merge_objects(b, o))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

fn merge_objects(
    base: &serde_json::Map<String, serde_json::Value>,
    over: &serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let mut merged = base.clone();
    for (key, value) in over {
        let combined = match (merged.get(key), value) {
            (Some(serde_json::Value::Object(b)), serde_json::Value::Object(o)) => {
                serde_json::Value::Object(merge_objects(b, o))
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::actionfile::{ActionFile, MemorySource, NoSource};
    use crate::core::compiler::CompileOptions;
    use crate::core::parser::parse_document;
    use crate::core::validator::{validate, validate_actionfile};
    use proptest::prelude::*;

    fn windfile(yaml: &str) -> WindFile {
        validate(&parse_document(yaml).unwrap(), &CompileOptions::default()).unwrap()
    }

    fn actionfile(yaml: &str) -> ActionFile {
        validate_actionfile(&parse_document(yaml).unwrap(), &CompileOptions::default()).unwrap()
    }

    fn names(wf: &WindFile) -> Vec<String> {
        wf.actions.keys().cloned().collect()
    }

    const HEADER: &str = "api: v0.0.1\nmetadata: {name: t, description: d, author: a}\n";

    fn lint_file() -> ActionFile {
        actionfile(
            r#"
api: v0.0.1
metadata: {name: lint, description: d, author: a}
environment:
  LEVEL: normal
  SHARED: from-definition
  DEF_ONLY: yes-def
steps:
  fmt:
    script: cargo fmt --check
    environment:
      LEVEL: step
      STEP_ONLY: s
    parameters:
      opts: {color: never, jobs: 1}
    excludeDuring: [evaluation, preparation]
    workdir: step-dir
  clippy:
    script: cargo clippy
    docker: {image: rust, tag: "1.88"}
"#,
        )
    }

    #[test]
    fn test_wc008_direct_actions_copied() {
        let wf = windfile(&format!(
            "{}actions:\n  build: {{script: make}}\n  test: {{file: t.sh}}\n",
            HEADER
        ));
        let mut prov = Provenance::new();
        let merged = merge(&wf, &NoSource, &mut prov).unwrap();
        assert_eq!(merged, wf);
        assert_eq!(prov.len(), 2);
        assert!(!prov.was_external("build"));
    }

    #[test]
    fn test_wc008_splice_in_place() {
        let wf = windfile(&format!(
            "{}actions:\n  setup: {{script: env}}\n  lint: {{use: lint}}\n  build: {{script: make}}\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let mut prov = Provenance::new();
        let merged = merge(&wf, &source, &mut prov).unwrap();
        assert_eq!(names(&merged), vec!["setup", "lint_fmt", "lint_clippy", "build"]);
        assert!(!merged.has_external_actions());
        let rec = prov.get("lint_fmt").unwrap();
        assert_eq!(rec.original_name, "lint");
        assert_eq!(rec.original_kind, ActionKindTag::External);
        assert_eq!(rec.resolved_kind, ActionKindTag::Script);
        assert_eq!(rec.chain, vec!["lint"]);
        assert_eq!(merged.actions["lint_fmt"].name, "lint_fmt");
    }

    #[test]
    fn test_wc008_environment_precedence() {
        let wf = windfile(&format!(
            "{}environment:\n  SHARED: from-windfile\nactions:\n  lint:\n    use: lint\n    environment:\n      LEVEL: site\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let merged = merge(&wf, &source, &mut Provenance::new()).unwrap();
        let env = &merged.actions["lint_fmt"].settings.environment;
        assert_eq!(env["LEVEL"], EnvValue::from("site"));
        assert_eq!(env["STEP_ONLY"], EnvValue::from("s"));
        assert_eq!(env["DEF_ONLY"], EnvValue::from("yes-def"));
        assert!(!env.contains_key("SHARED"));

        let env = &merged.actions["lint_clippy"].settings.environment;
        assert_eq!(env["LEVEL"], EnvValue::from("site"));
        assert!(!env.contains_key("STEP_ONLY"));
    }

    #[test]
    fn test_wc008_step_env_over_definition_env() {
        let wf = windfile(&format!("{}actions:\n  lint: {{use: lint}}\n", HEADER));
        let source = MemorySource::new().with("lint", lint_file());
        let merged = merge(&wf, &source, &mut Provenance::new()).unwrap();
        assert_eq!(
            merged.actions["lint_fmt"].settings.environment["LEVEL"],
            EnvValue::from("step")
        );
        assert_eq!(
            merged.actions["lint_clippy"].settings.environment["LEVEL"],
            EnvValue::from("normal")
        );
    }

    #[test]
    fn test_wc008_docker_precedence() {
        let source = MemorySource::new().with("lint", lint_file());

        let plain = windfile(&format!("{}actions:\n  lint: {{use: lint}}\n", HEADER));
        let merged = merge(&plain, &source, &mut Provenance::new()).unwrap();
        assert_eq!(
            merged.actions["lint_clippy"].settings.docker.as_ref().unwrap().reference(),
            "rust:1.88"
        );

        let pipeline = windfile(
            "api: v1\nmetadata: {name: t, description: d, author: a, docker: {image: debian}}\nactions:\n  lint: {use: lint}\n",
        );
        let merged = merge(&pipeline, &source, &mut Provenance::new()).unwrap();
        assert!(merged.actions["lint_clippy"].settings.docker.is_none());

        let site = windfile(&format!(
            "{}actions:\n  lint:\n    use: lint\n    docker: {{image: alpine}}\n",
            HEADER
        ));
        let merged = merge(&site, &source, &mut Provenance::new()).unwrap();
        assert_eq!(
            merged.actions["lint_clippy"].settings.docker.as_ref().unwrap().reference(),
            "alpine:latest"
        );
    }

    #[test]
    fn test_wc008_scalar_settings_and_exclusions() {
        let wf = windfile(&format!(
            "{}actions:\n  lint:\n    use: lint\n    runAlways: true\n    excludeDuring: [preparation, working_time]\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let merged = merge(&wf, &source, &mut Provenance::new()).unwrap();
        let fmt = &merged.actions["lint_fmt"].settings;
        assert_eq!(fmt.run_always, Some(true));
        assert_eq!(fmt.workdir.as_deref(), Some("step-dir"));
        assert_eq!(
            fmt.exclude_during,
            vec![Lifecycle::Preparation, Lifecycle::WorkingTime, Lifecycle::Evaluation]
        );
    }

    #[test]
    fn test_wc008_parameters_deep_merge() {
        let wf = windfile(&format!(
            "{}actions:\n  lint:\n    use: lint\n    parameters:\n      opts: {{jobs: 4}}\n      extra: x\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let merged = merge(&wf, &source, &mut Provenance::new()).unwrap();
        let params = &merged.actions["lint_fmt"].settings.parameters;
        assert_eq!(params["opts"], serde_json::json!({"color": "never", "jobs": 4}));
        assert_eq!(params["extra"], serde_json::json!("x"));
    }

    #[test]
    fn test_wc008_nested_chain() {
        let outer = actionfile(
            "api: v1\nmetadata: {name: ci, description: d, author: a}\nsteps:\n  prep: {script: echo prep}\n  lint: {use: lint}\n",
        );
        let source = MemorySource::new()
            .with("ci", outer)
            .with("lint", lint_file());
        let wf = windfile(&format!("{}actions:\n  ci: {{use: ci}}\n", HEADER));
        let mut prov = Provenance::new();
        let merged = merge(&wf, &source, &mut prov).unwrap();
        assert_eq!(names(&merged), vec!["ci_prep", "ci_lint_fmt", "ci_lint_clippy"]);
        assert_eq!(prov.get("ci_lint_fmt").unwrap().chain, vec!["ci", "lint"]);
        assert_eq!(prov.get("ci_prep").unwrap().chain, vec!["ci"]);
        assert_eq!(prov.original_name_of("ci_lint_clippy"), Some("ci"));
    }

    #[test]
    fn test_wc008_self_cycle() {
        let looping = actionfile(
            "api: v1\nmetadata: {name: l, description: d, author: a}\nsteps:\n  again: {use: loop}\n",
        );
        let source = MemorySource::new().with("loop", looping);
        let wf = windfile(&format!("{}actions:\n  x: {{use: loop}}\n", HEADER));
        let err = merge(&wf, &source, &mut Provenance::new()).unwrap_err();
        assert_eq!(
            err,
            CompileError::Merge(MergeError::Cycle {
                action: "x".into(),
                chain: "loop -> loop".into()
            })
        );
    }

    #[test]
    fn test_wc008_indirect_cycle() {
        let a = actionfile("api: v1\nmetadata: {name: a, description: d, author: a}\nsteps:\n  s: {use: b}\n");
        let b = actionfile("api: v1\nmetadata: {name: b, description: d, author: a}\nsteps:\n  s: {use: a}\n");
        let source = MemorySource::new().with("a", a).with("b", b);
        let wf = windfile(&format!("{}actions:\n  x: {{use: a}}\n", HEADER));
        match merge(&wf, &source, &mut Provenance::new()) {
            Err(CompileError::Merge(MergeError::Cycle { chain, .. })) => {
                assert_eq!(chain, "a -> b -> a")
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_wc008_diamond_allowed() {
        let wf = windfile(&format!(
            "{}actions:\n  first: {{use: lint}}\n  second: {{use: lint}}\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let merged = merge(&wf, &source, &mut Provenance::new()).unwrap();
        assert_eq!(
            names(&merged),
            vec!["first_fmt", "first_clippy", "second_fmt", "second_clippy"]
        );
    }

    #[test]
    fn test_wc008_unresolved_reference() {
        let wf = windfile(&format!("{}actions:\n  x: {{use: ghost}}\n", HEADER));
        let err = merge(&wf, &MemorySource::new(), &mut Provenance::new()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::Merge(MergeError::Unresolved { ref action, ref reference, .. })
                if action == "x" && reference == "ghost"
        ));
    }

    #[test]
    fn test_wc008_collision_with_direct_action() {
        // Declared after the reference, still detected.
        let wf = windfile(&format!(
            "{}actions:\n  lint: {{use: lint}}\n  lint_fmt: {{script: echo mine}}\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        match merge(&wf, &source, &mut Provenance::new()) {
            Err(CompileError::Merge(MergeError::NameCollision { name, reference, .. })) => {
                assert_eq!(name, "lint_fmt");
                assert_eq!(reference, "lint");
            }
            other => panic!("expected collision, got {:?}", other),
        }
    }

    #[test]
    fn test_wc008_collision_between_splices() {
        let one = actionfile("api: v1\nmetadata: {name: o, description: d, author: a}\nsteps:\n  b_c: {script: echo 1}\n");
        let two = actionfile("api: v1\nmetadata: {name: t, description: d, author: a}\nsteps:\n  c: {script: echo 2}\n");
        let source = MemorySource::new().with("one", one).with("two", two);
        let wf = windfile(&format!(
            "{}actions:\n  a: {{use: one}}\n  a_b: {{use: two}}\n",
            HEADER
        ));
        let err = merge(&wf, &source, &mut Provenance::new()).unwrap_err();
        assert!(err.to_string().contains("a_b_c"));
    }

    #[test]
    fn test_wc008_merge_is_idempotent_after_splice() {
        let wf = windfile(&format!(
            "{}actions:\n  lint: {{use: lint}}\n  build: {{script: make}}\n",
            HEADER
        ));
        let source = MemorySource::new().with("lint", lint_file());
        let once = merge(&wf, &source, &mut Provenance::new()).unwrap();
        let twice = merge(&once, &NoSource, &mut Provenance::new()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_wc008_tokens_untouched() {
        let wf = windfile(&format!(
            "{}environment:\n  A: x\nactions:\n  s: {{script: \"echo ${{A}} ${{B}}\"}}\n",
            HEADER
        ));
        let merged = merge(&wf, &NoSource, &mut Provenance::new()).unwrap();
        match &merged.actions["s"].kind {
            ActionKind::Script { script } => assert_eq!(script, "echo ${A} ${B}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_wc008_direct_merge_idempotent(
            bodies in proptest::collection::vec("[a-z ]{0,16}", 1..6),
            always in proptest::collection::vec(any::<bool>(), 6),
        ) {
            let mut yaml = format!("{}actions:\n", HEADER);
            for (i, body) in bodies.iter().enumerate() {
                yaml.push_str(&format!(
                    "  step{}:\n    script: \"echo {}\"\n    runAlways: {}\n",
                    i, body, always[i]
                ));
            }
            let wf = windfile(&yaml);
            let once = merge(&wf, &NoSource, &mut Provenance::new()).unwrap();
            let twice = merge(&once, &NoSource, &mut Provenance::new()).unwrap();
            prop_assert_eq!(&once, &wf);
            prop_assert_eq!(once, twice);
        }
    }
}
