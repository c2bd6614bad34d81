//! WC-004: `${VAR}` interpolation against an accumulated environment.
//!
//! Generators build the context as they emit exports, so a later value can
//! reference an earlier one. Tokens naming an undefined variable stay in the
//! text untouched and are reported back to the caller; they never collapse
//! to an empty string. `$VAR` and `${VAR:-default}` forms are left for the
//! runtime shell.

use super::types::{parameter_to_string, Environment, Parameters};
use indexmap::IndexMap;
use regex::Regex;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static token pattern"));

/// Resolved variable values visible at one point of the rendered output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvContext {
    values: IndexMap<String, String>,
}

/// Result of interpolating one string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpolated {
    pub text: String,
    /// Names of `${...}` tokens with no value in the context, in order of appearance
    pub unresolved: Vec<String>,
}

impl EnvContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Interpolate `haystack` against this context.
    pub fn interpolate(&self, haystack: &str) -> Interpolated {
        interpolate(haystack, self)
    }

    /// Add every entry of `env`, each interpolated against the context as it
    /// stands. Returns the resolved `(name, value)` pairs in order.
    pub fn extend_env(&mut self, env: &Environment, unresolved: &mut Vec<String>) -> Vec<(String, String)> {
        let mut resolved = Vec::with_capacity(env.len());
        for (name, value) in env {
            let out = self.interpolate(&value.to_string());
            unresolved.extend(out.unresolved);
            self.insert(name.clone(), out.text.clone());
            resolved.push((name.clone(), out.text));
        }
        resolved
    }

    /// Same as [`extend_env`](Self::extend_env) for parameter maps.
    pub fn extend_params(
        &mut self,
        params: &Parameters,
        unresolved: &mut Vec<String>,
    ) -> Vec<(String, String)> {
        let mut resolved = Vec::with_capacity(params.len());
        for (name, value) in params {
            let out = self.interpolate(&parameter_to_string(value));
            unresolved.extend(out.unresolved);
            self.insert(name.clone(), out.text.clone());
            resolved.push((name.clone(), out.text));
        }
        resolved
    }
}

/// Replace every defined `${NAME}` token in `haystack`.
pub fn interpolate(haystack: &str, context: &EnvContext) -> Interpolated {
    let mut unresolved = Vec::new();
    let text = TOKEN
        .replace_all(haystack, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match context.get(name) {
                Some(value) => value.to_string(),
                None => {
                    unresolved.push(name.to_string());
                    caps[0].to_string()
                }
            }
        })
        .into_owned();
    Interpolated { text, unresolved }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::EnvValue;
    use proptest::prelude::*;

    fn ctx(pairs: &[(&str, &str)]) -> EnvContext {
        let mut c = EnvContext::new();
        for (k, v) in pairs {
            c.insert(*k, *v);
        }
        c
    }

    #[test]
    fn test_wc004_replaces_defined() {
        let c = ctx(&[("NAME", "world")]);
        let out = interpolate("hello ${NAME}!", &c);
        assert_eq!(out.text, "hello world!");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_wc004_multiple_tokens() {
        let c = ctx(&[("A", "X"), ("B", "Y")]);
        assert_eq!(interpolate("${A}-${B}-${A}", &c).text, "X-Y-X");
    }

    #[test]
    fn test_wc004_undefined_left_literal_and_reported() {
        let c = ctx(&[("A", "X")]);
        let out = interpolate("${A} ${MISSING} ${ALSO}", &c);
        assert_eq!(out.text, "X ${MISSING} ${ALSO}");
        assert_eq!(out.unresolved, vec!["MISSING", "ALSO"]);
    }

    #[test]
    fn test_wc004_bare_dollar_untouched() {
        let c = ctx(&[("FOO", "1")]);
        let out = interpolate("echo $FOO ${FOO:-x}", &c);
        assert_eq!(out.text, "echo $FOO ${FOO:-x}");
        assert!(out.unresolved.is_empty());
    }

    #[test]
    fn test_wc004_no_recursive_expansion() {
        let c = ctx(&[("A", "${B}"), ("B", "boom")]);
        assert_eq!(interpolate("${A}", &c).text, "${B}");
    }

    #[test]
    fn test_wc004_extend_env_accumulates() {
        let mut env = Environment::new();
        env.insert("BASE".into(), EnvValue::from("/opt"));
        env.insert("BIN".into(), EnvValue::from("${BASE}/bin"));
        env.insert("PORT".into(), EnvValue::Integer(8080));
        let mut c = EnvContext::new();
        let mut unresolved = Vec::new();
        let resolved = c.extend_env(&env, &mut unresolved);
        assert_eq!(resolved[1], ("BIN".to_string(), "/opt/bin".to_string()));
        assert_eq!(resolved[2].1, "8080");
        assert_eq!(c.get("BIN"), Some("/opt/bin"));
        assert!(unresolved.is_empty());
    }

    #[test]
    fn test_wc004_extend_params_reports_unresolved() {
        let mut params = Parameters::new();
        params.insert("TARGET".into(), serde_json::json!("${OUT}/x"));
        let mut c = EnvContext::new();
        let mut unresolved = Vec::new();
        c.extend_params(&params, &mut unresolved);
        assert_eq!(unresolved, vec!["OUT"]);
        assert_eq!(c.get("TARGET"), Some("${OUT}/x"));
    }

    proptest! {
        #[test]
        fn prop_wc004_empty_context_is_identity(s in ".*") {
            let out = interpolate(&s, &EnvContext::new());
            prop_assert_eq!(out.text, s);
        }

        #[test]
        fn prop_wc004_defined_token_never_survives(name in "[A-Z_][A-Z0-9_]{0,8}", value in "[a-z0-9/]{0,12}") {
            let c = ctx(&[(name.as_str(), value.as_str())]);
            let out = interpolate(&format!("pre ${{{}}} post", name), &c);
            prop_assert_eq!(out.text, format!("pre {} post", value));
            prop_assert!(out.unresolved.is_empty());
        }
    }
}
