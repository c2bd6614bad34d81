//! WC-006: Windfile and actionfile validation.
//!
//! Turns a raw document into a typed `WindFile` (or `ActionFile`). Every map
//! in the grammar is closed: unknown keys are rejected, never ignored.
//!
//! Action variants are discriminated by key presence, in this order:
//! `use` → external, `script` → script, `function`/`kind` → platform,
//! `file` → file. Keys that belong to another variant are then reported as
//! unknown fields of the chosen one.

use super::actionfile::{ActionFile, ActionMetadata};
use super::compiler::CompileOptions;
use super::error::CompileError;
use super::types::*;
use indexmap::IndexMap;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashSet;
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").expect("static name pattern"));

const WINDFILE_KEYS: &[&str] = &["api", "metadata", "environment", "repositories", "actions"];
const ACTIONFILE_KEYS: &[&str] = &["api", "metadata", "environment", "steps"];

/// Keys consumed by variant payloads; everything else must be a shared setting.
const VARIANT_KEYS: &[&str] = &["use", "script", "function", "kind", "file"];

/// Validate a windfile document.
pub fn validate(raw: &Value, options: &CompileOptions) -> Result<WindFile, CompileError> {
    let root = as_mapping(raw, "<root>")?;
    check_keys(root, WINDFILE_KEYS, "")?;

    let api = required_string(root, "api", "")?;
    let metadata: Metadata = validate_metadata_value(required(root, "metadata", "")?, options)?;
    let environment = validate_environment(root.get("environment"), "environment")?;
    let repositories = validate_repositories(root.get("repositories"))?;
    let actions = validate_actions(required(root, "actions", "")?, "actions")?;

    tracing::debug!(
        name = %metadata.name,
        actions = actions.len(),
        repositories = repositories.len(),
        "windfile validated"
    );

    Ok(WindFile {
        api,
        metadata,
        environment,
        repositories,
        actions,
    })
}

/// Validate an actionfile document (the unit an external reference resolves to).
pub fn validate_actionfile(raw: &Value, options: &CompileOptions) -> Result<ActionFile, CompileError> {
    let root = as_mapping(raw, "<root>")?;
    check_keys(root, ACTIONFILE_KEYS, "")?;

    let api = required_string(root, "api", "")?;
    let metadata: ActionMetadata = validate_metadata_value(required(root, "metadata", "")?, options)?;
    let environment = validate_environment(root.get("environment"), "environment")?;
    let steps = validate_actions(required(root, "steps", "")?, "steps")?;

    Ok(ActionFile {
        api,
        metadata,
        environment,
        steps,
    })
}

// ============================================================================
// Metadata
// ============================================================================

fn validate_metadata_value<T: DeserializeOwned>(
    value: &Value,
    options: &CompileOptions,
) -> Result<T, CompileError> {
    let map = as_mapping(value, "metadata")?;
    check_author(map.get("author"))?;
    check_targets(map.get("targets"), options)?;
    deserialize(value, "metadata")
}

fn check_author(author: Option<&Value>) -> Result<(), CompileError> {
    let path = "metadata.author";
    match author {
        // serde reports the missing field
        None => Ok(()),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(CompileError::semantic(path, "author must not be empty"))
        }
        Some(Value::String(_)) => Ok(()),
        Some(v @ Value::Mapping(_)) => {
            let contact: ContactData = serde_yaml_ng::from_value(v.clone()).map_err(|e| {
                CompileError::semantic(path, format!("invalid contact data: {}", e))
            })?;
            if contact.name.trim().is_empty() {
                return Err(CompileError::semantic(path, "contact name must not be empty"));
            }
            Ok(())
        }
        Some(_) => Err(CompileError::semantic(
            path,
            "author must be a name or contact data with a name",
        )),
    }
}

fn check_targets(targets: Option<&Value>, options: &CompileOptions) -> Result<(), CompileError> {
    let Some(Value::Sequence(items)) = targets else {
        return Ok(());
    };
    for (i, item) in items.iter().enumerate() {
        let path = format!("metadata.targets[{}]", i);
        let name = item
            .as_str()
            .ok_or_else(|| CompileError::schema(&path, "target must be a string"))?;
        let target: Target = name
            .parse()
            .map_err(|e: String| CompileError::semantic(&path, e))?;
        if !options.supported_targets.contains(&target) {
            return Err(CompileError::semantic(
                &path,
                format!("target '{}' is not supported by this build", target),
            ));
        }
    }
    Ok(())
}

// ============================================================================
// Environment and repositories
// ============================================================================

fn validate_environment(value: Option<&Value>, path: &str) -> Result<Environment, CompileError> {
    let mut env = Environment::new();
    let Some(value) = value else {
        return Ok(env);
    };
    let map = as_mapping(value, path)?;
    for (key, val) in map {
        let name = key_str(key, path)?;
        let field = format!("{}.{}", path, name);
        let scalar = match val {
            Value::String(s) => EnvValue::Text(s.clone()),
            Value::Bool(b) => EnvValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => EnvValue::Integer(i),
                None => EnvValue::Float(n.as_f64().unwrap_or_default()),
            },
            _ => {
                return Err(CompileError::schema(
                    field,
                    "expected a string, number or boolean",
                ))
            }
        };
        env.insert(name.to_string(), scalar);
    }
    Ok(env)
}

fn validate_repositories(value: Option<&Value>) -> Result<IndexMap<String, Repository>, CompileError> {
    let mut repos = IndexMap::new();
    let Some(value) = value else {
        return Ok(repos);
    };
    let map = as_mapping(value, "repositories")?;
    for (key, val) in map {
        let name = key_str(key, "repositories")?;
        let path = format!("repositories.{}", name);
        check_name(name, &path)?;
        let repo: Repository = deserialize(val, &path)?;
        repos.insert(name.to_string(), repo);
    }
    Ok(repos)
}

// ============================================================================
// Actions
// ============================================================================

fn validate_actions(value: &Value, path: &str) -> Result<IndexMap<String, Action>, CompileError> {
    let map = as_mapping(value, path)?;
    let mut actions = IndexMap::with_capacity(map.len());
    for (key, val) in map {
        let name = key_str(key, path)?;
        let action_path = format!("{}.{}", path, name);
        check_name(name, &action_path)?;
        let action = validate_action(name, val, &action_path)?;
        actions.insert(name.to_string(), action);
    }
    Ok(actions)
}

/// Validate one action mapping.
pub fn validate_action(name: &str, value: &Value, path: &str) -> Result<Action, CompileError> {
    let map = as_mapping(value, path)?;

    if let Some(declared) = map.get("name") {
        let declared = declared
            .as_str()
            .ok_or_else(|| CompileError::schema(format!("{}.name", path), "expected a string"))?;
        if declared != name {
            return Err(CompileError::semantic(
                format!("{}.name", path),
                format!("action declares name '{}' but is keyed as '{}'", declared, name),
            ));
        }
    }

    let (kind, consumed) = discriminate(map, path)?;

    let rest: Mapping = map
        .iter()
        .filter(|(k, _)| {
            k.as_str()
                .is_none_or(|k| k != "name" && !consumed.contains(&k))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    // Scalar check first so nested values get a precise path.
    validate_environment(rest.get("environment"), &format!("{}.environment", path))?;
    let settings: ActionSettings = deserialize(&Value::Mapping(rest), path)?;

    let mut seen = HashSet::new();
    for phase in &settings.exclude_during {
        if !seen.insert(*phase) {
            return Err(CompileError::semantic(
                format!("{}.excludeDuring", path),
                format!("phase '{}' listed more than once", phase),
            ));
        }
    }

    Ok(Action {
        name: name.to_string(),
        settings,
        kind,
    })
}

/// Pick the variant and return the payload keys it consumed.
fn discriminate(map: &Mapping, path: &str) -> Result<(ActionKind, Vec<&'static str>), CompileError> {
    if map.contains_key("use") {
        let reference = string_field(map, "use", path)?.unwrap_or_default();
        if reference.trim().is_empty() {
            return Err(CompileError::schema(format!("{}.use", path), "must not be empty"));
        }
        return Ok((ActionKind::External { reference }, vec!["use"]));
    }
    if map.contains_key("script") {
        let script = string_field(map, "script", path)?.unwrap_or_default();
        return Ok((ActionKind::Script { script }, vec!["script"]));
    }
    if map.contains_key("function") || map.contains_key("kind") {
        let function = string_field(map, "function", path)?.unwrap_or_else(|| "run".to_string());
        if !NAME_PATTERN.is_match(&function) {
            return Err(CompileError::semantic(
                format!("{}.function", path),
                format!("'{}' does not match {}", function, NAME_PATTERN.as_str()),
            ));
        }
        let kind = ActionKind::Platform {
            file: string_field(map, "file", path)?,
            function,
            kind: string_field(map, "kind", path)?,
        };
        return Ok((kind, vec!["function", "kind", "file"]));
    }
    if map.contains_key("file") {
        let file = string_field(map, "file", path)?.unwrap_or_default();
        return Ok((ActionKind::File { file }, vec!["file"]));
    }
    // Fall back on the keys unknown to every variant so typos are named.
    let stray: Vec<_> = map
        .keys()
        .filter_map(Value::as_str)
        .filter(|k| !VARIANT_KEYS.contains(k) && !is_setting_key(k) && *k != "name")
        .collect();
    let hint = if stray.is_empty() {
        String::new()
    } else {
        format!(" (unknown: {})", stray.join(", "))
    };
    Err(CompileError::schema(
        path,
        format!(
            "action must declare one of `script`, `file`, `function`, `kind` or `use`{}",
            hint
        ),
    ))
}

fn is_setting_key(key: &str) -> bool {
    matches!(
        key,
        "parameters"
            | "environment"
            | "platform"
            | "docker"
            | "runAlways"
            | "run_always"
            | "workdir"
            | "excludeDuring"
    )
}

// ============================================================================
// Helpers
// ============================================================================

fn as_mapping<'a>(value: &'a Value, path: &str) -> Result<&'a Mapping, CompileError> {
    value
        .as_mapping()
        .ok_or_else(|| CompileError::schema(path, "expected a mapping"))
}

fn key_str<'a>(key: &'a Value, path: &str) -> Result<&'a str, CompileError> {
    key.as_str()
        .ok_or_else(|| CompileError::schema(path, format!("key {:?} is not a string", key)))
}

fn check_keys(map: &Mapping, allowed: &[&str], path: &str) -> Result<(), CompileError> {
    for key in map.keys() {
        let name = key_str(key, display_path(path))?;
        if !allowed.contains(&name) {
            return Err(CompileError::schema(
                join_path(path, name),
                format!("unknown field `{}`, expected one of {}", name, allowed.join(", ")),
            ));
        }
    }
    Ok(())
}

fn required<'a>(map: &'a Mapping, key: &str, path: &str) -> Result<&'a Value, CompileError> {
    map.get(key)
        .ok_or_else(|| CompileError::schema(display_path(path), format!("missing field `{}`", key)))
}

fn required_string(map: &Mapping, key: &str, path: &str) -> Result<String, CompileError> {
    required(map, key, path)?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| CompileError::schema(join_path(path, key), "expected a string"))
}

fn string_field(map: &Mapping, key: &str, path: &str) -> Result<Option<String>, CompileError> {
    match map.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(CompileError::schema(
            format!("{}.{}", path, key),
            "expected a string",
        )),
    }
}

fn check_name(name: &str, path: &str) -> Result<(), CompileError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(CompileError::schema(
            path,
            format!("name '{}' does not match {}", name, NAME_PATTERN.as_str()),
        ))
    }
}

fn deserialize<T: DeserializeOwned>(value: &Value, path: &str) -> Result<T, CompileError> {
    serde_yaml_ng::from_value(value.clone()).map_err(|e| CompileError::schema(path, e.to_string()))
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "<root>"
    } else {
        path
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", path, key)
    }
}
