// Module: Context
// Per-file variable scope, seeded from variables and secrets, mutated by
// captures.

use std::collections::HashMap;

use serde_json::Value;

/// A value bound in the scope, with its redaction flag.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedValue {
    pub value: Value,
    pub redact: bool,
}

/// Mapping from variable name to captured value.
///
/// Each workflow file gets its own scope; nothing is shared across files.
/// Later bindings win over earlier ones.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    entries: HashMap<String, CapturedValue>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a scope from the merged variables and secrets maps. Secrets
    /// override variables of the same name and are always redact-flagged.
    pub fn seeded(variables: &HashMap<String, String>, secrets: &HashMap<String, String>) -> Self {
        let mut scope = Self::new();
        for (name, value) in variables {
            scope.set(name.clone(), Value::String(value.clone()), false);
        }
        for (name, value) in secrets {
            scope.set(name.clone(), Value::String(value.clone()), true);
        }
        scope
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value, redact: bool) {
        self.entries.insert(name.into(), CapturedValue { value, redact });
    }

    pub fn get(&self, name: &str) -> Option<&CapturedValue> {
        self.entries.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.entries.get(name).map(|entry| &entry.value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// String form of a bound value, as substituted into templates.
    /// Strings render verbatim; other values use their JSON rendering.
    pub fn render(&self, name: &str) -> Option<String> {
        self.entries.get(name).map(|entry| render_value(&entry.value))
    }

    /// String values flagged for redaction, used to build the redactor
    /// needle set for debug dumps. Non-string values are skipped.
    pub fn redactable_strings(&self) -> Vec<String> {
        self.entries
            .values()
            .filter(|entry| entry.redact)
            .filter_map(|entry| match &entry.value {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                _ => None,
            })
            .collect()
    }
}

pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_seeded_secrets_override_variables() {
        let variables = HashMap::from([
            ("host".to_string(), "example.com".to_string()),
            ("token".to_string(), "public".to_string()),
        ]);
        let secrets = HashMap::from([("token".to_string(), "s3cr3t".to_string())]);

        let scope = Scope::seeded(&variables, &secrets);

        assert_eq!(scope.value("host"), Some(&json!("example.com")));
        let token = scope.get("token").unwrap();
        assert_eq!(token.value, json!("s3cr3t"));
        assert!(token.redact);
        assert!(!scope.get("host").unwrap().redact);
    }

    #[test]
    fn test_later_bindings_win() {
        let mut scope = Scope::new();
        scope.set("id", json!(1), false);
        scope.set("id", json!(2), false);
        assert_eq!(scope.value("id"), Some(&json!(2)));
        assert_eq!(scope.len(), 1);
    }

    #[test]
    fn test_render_non_string_values() {
        let mut scope = Scope::new();
        scope.set("count", json!(42), false);
        scope.set("ok", json!(true), false);
        scope.set("name", json!("Alice"), false);
        assert_eq!(scope.render("count").as_deref(), Some("42"));
        assert_eq!(scope.render("ok").as_deref(), Some("true"));
        assert_eq!(scope.render("name").as_deref(), Some("Alice"));
        assert_eq!(scope.render("missing"), None);
    }

    #[test]
    fn test_redactable_strings_skips_non_strings_and_empties() {
        let mut scope = Scope::new();
        scope.set("token", json!("abc"), true);
        scope.set("pin", json!(1234), true);
        scope.set("blank", json!(""), true);
        scope.set("public", json!("visible"), false);

        let needles = scope.redactable_strings();
        assert_eq!(needles, vec!["abc".to_string()]);
    }
}
