use agentlens_types::RedactionConfig;
use regex::Regex;
use serde_json::Value;

use crate::{Error, Result};

/// Structural secret masking applied at the parse boundary, before any
/// event leaves a parser. Two filters:
///
/// - key filter: object properties whose key matches the pattern have
///   their string values replaced
/// - value filter: provider-shaped token strings are replaced wherever
///   they appear
///
/// Redacted values are never written back to disk.
#[derive(Debug)]
pub struct Redactor {
    enabled: bool,
    key_re: Regex,
    value_re: Regex,
    replacement: String,
}

impl Redactor {
    pub fn from_config(config: &RedactionConfig) -> Result<Self> {
        let key_re = Regex::new(&config.key_pattern)
            .map_err(|e| Error::Pattern(format!("key_pattern: {}", e)))?;
        let value_re = Regex::new(&config.value_pattern)
            .map_err(|e| Error::Pattern(format!("value_pattern: {}", e)))?;
        Ok(Self {
            enabled: config.always_on,
            key_re,
            value_re,
            replacement: config.replacement.clone(),
        })
    }

    /// Redactor with the built-in default patterns.
    pub fn standard() -> Self {
        Self::from_config(&RedactionConfig::default()).expect("default redaction patterns compile")
    }

    /// Mask provider-shaped tokens inside free text.
    pub fn redact_str(&self, text: &str) -> String {
        if !self.enabled || text.is_empty() {
            return text.to_string();
        }
        self.value_re
            .replace_all(text, self.replacement.as_str())
            .into_owned()
    }

    /// Walk a JSON value in place, applying both filters.
    pub fn redact_value(&self, value: &mut Value) {
        if !self.enabled {
            return;
        }
        self.walk(value, false);
    }

    fn walk(&self, value: &mut Value, key_matched: bool) {
        match value {
            Value::String(s) => {
                if key_matched {
                    *s = self.replacement.clone();
                } else if self.value_re.is_match(s) {
                    *s = self
                        .value_re
                        .replace_all(s, self.replacement.as_str())
                        .into_owned();
                }
            }
            Value::Object(map) => {
                for (key, child) in map.iter_mut() {
                    let matched = self.key_re.is_match(key);
                    self.walk(child, matched);
                }
            }
            Value::Array(items) => {
                for item in items.iter_mut() {
                    self.walk(item, key_matched);
                }
            }
            // Secret-bearing numbers do not exist; bool/null carry nothing
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_filter_masks_string_values() {
        let redactor = Redactor::standard();
        let mut v = json!({
            "api_key": "sk-abc123def456",
            "Authorization": "Bearer xyz",
            "note": "hello"
        });
        redactor.redact_value(&mut v);
        assert_eq!(v["api_key"], "[REDACTED]");
        assert_eq!(v["Authorization"], "[REDACTED]");
        assert_eq!(v["note"], "hello");
    }

    #[test]
    fn test_key_filter_walks_nested_structures() {
        let redactor = Redactor::standard();
        let mut v = json!({
            "payload": {
                "env": { "OPENAI_API_KEY": "sk-verysecretvalue" },
                "items": [ { "session_token": "tok-1" } ]
            }
        });
        redactor.redact_value(&mut v);
        assert_eq!(v["payload"]["env"]["OPENAI_API_KEY"], "[REDACTED]");
        assert_eq!(v["payload"]["items"][0]["session_token"], "[REDACTED]");
    }

    #[test]
    fn test_value_filter_masks_provider_tokens() {
        let redactor = Redactor::standard();
        assert_eq!(
            redactor.redact_str("used sk-abcdefgh1234 to call the api"),
            "used [REDACTED] to call the api"
        );
        // Too short to be a token
        assert_eq!(redactor.redact_str("sk-short"), "sk-short");
    }

    #[test]
    fn test_value_filter_inside_json_strings() {
        let redactor = Redactor::standard();
        let mut v = json!({ "output": "export X=sk-abcdefgh1234\n" });
        redactor.redact_value(&mut v);
        assert_eq!(v["output"], "export X=[REDACTED]\n");
    }

    #[test]
    fn test_disabled_redactor_passes_through() {
        let config = RedactionConfig {
            always_on: false,
            ..Default::default()
        };
        let redactor = Redactor::from_config(&config).unwrap();
        let mut v = json!({ "api_key": "sk-abcdefgh1234" });
        redactor.redact_value(&mut v);
        assert_eq!(v["api_key"], "sk-abcdefgh1234");
    }

    #[test]
    fn test_closure_no_sk_survives() {
        let redactor = Redactor::standard();
        let mut v = json!({
            "a": "sk-0123456789abcdef",
            "b": { "c": ["prefix sk-zzzzzzzzzz suffix"] }
        });
        redactor.redact_value(&mut v);
        let flat = v.to_string();
        assert!(!Regex::new(r"sk-[A-Za-z0-9_-]{8,}").unwrap().is_match(&flat));
    }
}
