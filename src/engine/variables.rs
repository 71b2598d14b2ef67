// ABOUTME: Per-execution variable bindings and `$name` substitution
// ABOUTME: Resolution walks mappings and sequences; unbound references stay literal

use serde_json::{Map, Value};
use std::collections::HashMap;

/// Prefix marking a string as a variable reference
pub const VARIABLE_PREFIX: char = '$';

/// Well-known names bound automatically from action results
pub const MATCH_X: &str = "match_x";
pub const MATCH_Y: &str = "match_y";
pub const MATCH_CONFIDENCE: &str = "match_confidence";
pub const SCREENSHOT: &str = "screenshot";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableContext {
    values: HashMap<String, Value>,
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(initial: &Map<String, Value>) -> Self {
        Self {
            values: initial
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Copy of all bindings, sorted by name
    pub fn snapshot(&self) -> Map<String, Value> {
        let mut names: Vec<&String> = self.values.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| (name.clone(), self.values[name].clone()))
            .collect()
    }

    /// Name referenced by `value`, if it is a `$name` string
    pub fn reference(value: &str) -> Option<&str> {
        value
            .strip_prefix(VARIABLE_PREFIX)
            .filter(|name| !name.is_empty())
    }

    /// Replace `$name` strings with their bound values, recursing through
    /// objects and arrays. Unbound references are left as literal strings.
    pub fn resolve(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => match Self::reference(s).and_then(|name| self.values.get(name)) {
                Some(bound) => bound.clone(),
                None => value.clone(),
            },
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve(v)).collect()),
            Value::Object(map) => Value::Object(self.resolve_map(map)),
            other => other.clone(),
        }
    }

    pub fn resolve_map(&self, map: &Map<String, Value>) -> Map<String, Value> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.resolve(v)))
            .collect()
    }

    /// Resolve a string that may be a `$name` reference. Unbound references
    /// resolve to `None` rather than the literal text.
    pub fn lookup_ref(&self, value: &str) -> Option<Value> {
        match Self::reference(value) {
            Some(name) => self.values.get(name).cloned(),
            None => Some(Value::String(value.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> VariableContext {
        let mut vars = VariableContext::new();
        vars.set("x", json!(120));
        vars.set("name", json!("hero"));
        vars.set("shot", json!({ "screenshot_path": "/tmp/a.png" }));
        vars
    }

    #[test]
    fn test_resolves_nested_structures() {
        let vars = context();
        let params = json!({
            "x": "$x",
            "label": "$name",
            "points": ["$x", 5, { "inner": "$shot" }],
            "flag": true
        });

        assert_eq!(
            vars.resolve(&params),
            json!({
                "x": 120,
                "label": "hero",
                "points": [120, 5, { "inner": { "screenshot_path": "/tmp/a.png" } }],
                "flag": true
            })
        );
    }

    #[test]
    fn test_unbound_reference_stays_literal() {
        let vars = context();
        assert_eq!(vars.resolve(&json!("$missing")), json!("$missing"));
        assert_eq!(vars.resolve(&json!("$")), json!("$"));
        assert_eq!(vars.resolve(&json!("price: $x")), json!("price: $x"));
        assert_eq!(vars.lookup_ref("$missing"), None);
        assert_eq!(vars.lookup_ref("plain.png"), Some(json!("plain.png")));
    }

    #[test]
    fn test_resolution_is_idempotent_without_references() {
        let vars = context();
        let resolved = json!({ "a": [1, 2.5, null], "b": { "c": "text" }, "d": false });
        assert_eq!(vars.resolve(&resolved), resolved);
        assert_eq!(vars.resolve(&vars.resolve(&resolved)), resolved);
    }

    #[test]
    fn test_snapshot_is_sorted() {
        let vars = context();
        let keys: Vec<String> = vars.snapshot().keys().cloned().collect();
        assert_eq!(keys, vec!["name", "shot", "x"]);
    }
}
