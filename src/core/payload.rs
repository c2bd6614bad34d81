//! WC-011: Publish payload for handing a merged windfile to a CI server.

use super::types::WindFile;
use serde::{Deserialize, Serialize};

/// Request body understood by the publishing API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishPayload {
    /// Merged windfile as YAML
    pub windfile: String,
    /// CI server base URL
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub token: String,
}

impl PublishPayload {
    pub fn new(
        merged: &WindFile,
        url: impl Into<String>,
        username: Option<String>,
        token: impl Into<String>,
    ) -> Result<Self, String> {
        let windfile = serde_yaml_ng::to_string(merged)
            .map_err(|e| format!("cannot serialize windfile: {}", e))?;
        Ok(Self {
            windfile,
            url: url.into(),
            username,
            token: token.into(),
        })
    }

    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("cannot serialize payload: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::compiler::CompileOptions;
    use crate::core::parser::parse_document;
    use crate::core::validator::validate;

    fn merged() -> WindFile {
        validate(
            &parse_document(
                "api: v0.0.1\nmetadata: {name: n, description: d, author: a}\nactions:\n  build: {script: make, runAlways: true}\n",
            )
            .unwrap(),
            &CompileOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_wc011_payload_json_fields() {
        let p = PublishPayload::new(&merged(), "https://ci.example.com", None, "secret").unwrap();
        let json: serde_json::Value = serde_json::from_str(&p.to_json().unwrap()).unwrap();
        assert_eq!(json["url"], "https://ci.example.com");
        assert_eq!(json["token"], "secret");
        assert!(json.get("username").is_none());
        assert!(json["windfile"].as_str().unwrap().contains("script: make"));
    }

    #[test]
    fn test_wc011_payload_windfile_revalidates() {
        let p = PublishPayload::new(&merged(), "u", Some("jane".into()), "t").unwrap();
        assert_eq!(p.username.as_deref(), Some("jane"));
        let again = validate(&parse_document(&p.windfile).unwrap(), &CompileOptions::default()).unwrap();
        assert_eq!(again, merged());
    }
}
