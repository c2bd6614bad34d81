//! WC-001: Windfile and action schema types.
//!
//! In-memory model of the windfile grammar. Documents are not deserialized
//! straight into `WindFile`; the validator discriminates action variants and
//! builds these values, so every type here only needs to describe the shape.
//! All types serialize back to the document layout.

use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered environment map (name → scalar).
pub type Environment = IndexMap<String, EnvValue>;

/// Ordered parameter map. Values may nest and are deep-merged.
pub type Parameters = IndexMap<String, serde_json::Value>;

// ============================================================================
// Top-level windfile
// ============================================================================

/// Root compiled unit.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct WindFile {
    /// Opaque API version tag (e.g. "v0.0.1")
    pub api: String,

    pub metadata: Metadata,

    /// Pipeline-wide environment, exported before any action runs
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: Environment,

    /// Repositories checked out before the actions
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub repositories: IndexMap<String, Repository>,

    /// Actions in execution order
    pub actions: IndexMap<String, Action>,
}

impl WindFile {
    /// True when any action still references an external definition.
    pub fn has_external_actions(&self) -> bool {
        self.actions.values().any(Action::is_external)
    }
}

/// Windfile metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Metadata {
    pub name: String,

    /// Job id in the target CI system (e.g. `PROJ-PLAN` for Bamboo)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub description: String,

    pub author: Author,

    /// CI platforms able to run this windfile (unset = all)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<Target>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_credentials: Option<GitCredentials>,

    /// Pipeline-level container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<Docker>,

    /// URL notified with the results after every run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_hook: Option<String>,
}

/// Author: a plain name or structured contact data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Contact(ContactData),
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Self::Name(n) => n,
            Self::Contact(c) => &c.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ContactData {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Git credentials: a credential id known to the CI system, or a pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum GitCredentials {
    Id(String),
    Basic { username: String, password: String },
}

/// Repository checked out during the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Repository {
    pub url: String,
    pub branch: String,
    /// Checkout directory relative to the workspace
    pub path: String,
}

// ============================================================================
// Docker
// ============================================================================

/// Container configuration for the pipeline or a single action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct Docker {
    pub image: String,

    #[serde(default = "default_tag")]
    pub tag: String,

    /// `host:container` mounts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,

    /// Extra arguments for the docker daemon, e.g. `--cpus=2`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

fn default_tag() -> String {
    "latest".to_string()
}

impl Docker {
    /// `image:tag` reference.
    pub fn reference(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// One unit of pipeline work.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct Action {
    /// Map key in the enclosing document
    #[serde(skip)]
    pub name: String,

    #[serde(flatten)]
    pub settings: ActionSettings,

    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn new(name: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            name: name.into(),
            settings: ActionSettings::default(),
            kind,
        }
    }

    /// Runs even when earlier actions failed.
    pub fn run_always(&self) -> bool {
        self.settings.run_always.unwrap_or(false)
    }

    pub fn tag(&self) -> ActionKindTag {
        self.kind.tag()
    }

    pub fn is_external(&self) -> bool {
        matches!(self.kind, ActionKind::External { .. })
    }

    /// Whether this action may be rendered for `target`.
    pub fn applies_to(&self, target: Target) -> bool {
        self.settings.platform.is_none_or(|p| p == target)
    }
}

/// Fields shared by every action variant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct ActionSettings {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub parameters: Parameters,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub environment: Environment,

    /// Restrict the action to one target platform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Target>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docker: Option<Docker>,

    #[serde(
        default,
        rename = "runAlways",
        alias = "run_always",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_always: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<String>,

    /// Lifecycle phases during which the action is skipped
    #[serde(default, rename = "excludeDuring", skip_serializing_if = "Vec::is_empty")]
    pub exclude_during: Vec<Lifecycle>,
}

/// Variant payload. Closed set; consumers match exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
#[serde(untagged)]
pub enum ActionKind {
    /// Inline script body
    Script { script: String },
    /// Body stored in an external file
    File { file: String },
    /// Target-specific logic: a platform file plus entry function
    Platform {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        function: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// Reference to a reusable actionfile, resolved at merge time
    External {
        #[serde(rename = "use")]
        reference: String,
    },
}

impl ActionKind {
    pub fn tag(&self) -> ActionKindTag {
        match self {
            Self::Script { .. } => ActionKindTag::Script,
            Self::File { .. } => ActionKindTag::File,
            Self::Platform { .. } => ActionKindTag::Platform,
            Self::External { .. } => ActionKindTag::External,
        }
    }
}

/// Fieldless mirror of [`ActionKind`] for provenance and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKindTag {
    File,
    Script,
    Platform,
    External,
}

impl fmt::Display for ActionKindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Script => write!(f, "script"),
            Self::Platform => write!(f, "platform"),
            Self::External => write!(f, "external"),
        }
    }
}

// ============================================================================
// Enums
// ============================================================================

/// CI platforms a windfile can be compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    Cli,
    Jenkins,
    Bamboo,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Cli, Target::Jenkins, Target::Bamboo];
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "cli"),
            Self::Jenkins => write!(f, "jenkins"),
            Self::Bamboo => write!(f, "bamboo"),
        }
    }
}

impl FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cli" => Ok(Self::Cli),
            "jenkins" => Ok(Self::Jenkins),
            "bamboo" => Ok(Self::Bamboo),
            other => Err(format!("unknown target '{}'", other)),
        }
    }
}

/// Phases of the surrounding process a pipeline may run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    Preparation,
    WorkingTime,
    PostDeadline,
    Evaluation,
    All,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Preparation => write!(f, "preparation"),
            Self::WorkingTime => write!(f, "working_time"),
            Self::PostDeadline => write!(f, "post_deadline"),
            Self::Evaluation => write!(f, "evaluation"),
            Self::All => write!(f, "all"),
        }
    }
}

impl FromStr for Lifecycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preparation" => Ok(Self::Preparation),
            "working_time" => Ok(Self::WorkingTime),
            "post_deadline" => Ok(Self::PostDeadline),
            "evaluation" => Ok(Self::Evaluation),
            "all" => Ok(Self::All),
            other => Err(format!("unknown lifecycle phase '{}'", other)),
        }
    }
}

/// Scalar environment value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EnvValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{}", b),
            Self::Integer(n) => write!(f, "{}", n),
            Self::Float(x) => write!(f, "{}", x),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for EnvValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

/// Render a parameter value as shell text. Scalars print bare, nested
/// values as compact JSON.
pub fn parameter_to_string(val: &serde_json::Value) -> String {
    match val {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wc001_target_roundtrip() {
        for t in Target::ALL {
            assert_eq!(t.to_string().parse::<Target>().unwrap(), t);
        }
        assert!("gitlab".parse::<Target>().is_err());
    }

    #[test]
    fn test_wc001_lifecycle_display() {
        assert_eq!(Lifecycle::WorkingTime.to_string(), "working_time");
        assert_eq!(Lifecycle::PostDeadline.to_string(), "post_deadline");
        assert_eq!("evaluation".parse::<Lifecycle>().unwrap(), Lifecycle::Evaluation);
        assert!("weekend".parse::<Lifecycle>().is_err());
    }

    #[test]
    fn test_wc001_env_value_scalars() {
        let env: Environment = serde_yaml_ng::from_str("A: \"1\"\nB: 2\nC: true\nD: 1.5\n").unwrap();
        assert_eq!(env["A"], EnvValue::Text("1".into()));
        assert_eq!(env["B"], EnvValue::Integer(2));
        assert_eq!(env["C"], EnvValue::Bool(true));
        assert_eq!(env["D"].to_string(), "1.5");
    }

    #[test]
    fn test_wc001_env_value_rejects_mapping() {
        let result: Result<Environment, _> = serde_yaml_ng::from_str("A: {nested: 1}\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_wc001_docker_default_tag() {
        let d: Docker = serde_yaml_ng::from_str("image: rust\n").unwrap();
        assert_eq!(d.tag, "latest");
        assert_eq!(d.reference(), "rust:latest");
    }

    #[test]
    fn test_wc001_docker_unknown_field() {
        let result: Result<Docker, _> = serde_yaml_ng::from_str("image: rust\ncpus: 2\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_wc001_author_variants() {
        let a: Author = serde_yaml_ng::from_str("Jane Doe").unwrap();
        assert_eq!(a.name(), "Jane Doe");
        let c: Author = serde_yaml_ng::from_str("name: Jane\nemail: jane@example.com\n").unwrap();
        assert_eq!(c.name(), "Jane");
    }

    #[test]
    fn test_wc001_action_serializes_flat() {
        let mut action = Action::new(
            "build",
            ActionKind::Script {
                script: "make".into(),
            },
        );
        action.settings.run_always = Some(true);
        action.settings.exclude_during = vec![Lifecycle::Preparation];
        let yaml = serde_yaml_ng::to_string(&action).unwrap();
        assert!(yaml.contains("script: make"));
        assert!(yaml.contains("runAlways: true"));
        assert!(yaml.contains("excludeDuring:"));
        assert!(!yaml.contains("name:"));
    }

    #[test]
    fn test_wc001_external_serializes_use() {
        let action = Action::new(
            "lint",
            ActionKind::External {
                reference: "actions/lint".into(),
            },
        );
        let yaml = serde_yaml_ng::to_string(&action).unwrap();
        assert!(yaml.contains("use: actions/lint"));
        assert!(action.is_external());
        assert_eq!(action.tag(), ActionKindTag::External);
    }

    #[test]
    fn test_wc001_applies_to() {
        let mut action = Action::new("a", ActionKind::Script { script: "true".into() });
        assert!(action.applies_to(Target::Cli));
        action.settings.platform = Some(Target::Jenkins);
        assert!(!action.applies_to(Target::Cli));
        assert!(action.applies_to(Target::Jenkins));
    }

    #[test]
    fn test_wc001_parameter_to_string() {
        assert_eq!(parameter_to_string(&serde_json::json!("x")), "x");
        assert_eq!(parameter_to_string(&serde_json::json!(3)), "3");
        assert_eq!(parameter_to_string(&serde_json::json!(null)), "");
        assert_eq!(parameter_to_string(&serde_json::json!({"a": 1})), "{\"a\":1}");
    }
}
