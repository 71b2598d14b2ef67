// ABOUTME: Script and library documents plus the parser that loads them
// ABOUTME: Scripts are YAML or JSON; a library bundles groups with their scripts

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

use super::action::ActionNode;
use super::error::{Result, ScriptError, ValidationError};

/// A named action tree with its scheduling metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Group the script is queued into when started from a library
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Script dispatched by the watchdog when this one stalls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_script: Option<String>,
    /// Enqueue on `serve` startup
    #[serde(default)]
    pub autostart: bool,
    /// Initial variable bindings
    #[serde(default)]
    pub variables: Map<String, Value>,
    #[serde(default)]
    pub actions: Vec<ActionNode>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_script: Option<String>,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptLibrary {
    #[serde(default)]
    pub groups: Vec<GroupDefinition>,
    #[serde(default)]
    pub scripts: Vec<ScriptDefinition>,
}

impl ScriptDefinition {
    pub fn new(id: &str, actions: Vec<ActionNode>) -> Self {
        Self {
            id: id.to_string(),
            name: String::new(),
            description: None,
            group: None,
            priority: None,
            max_retries: None,
            exception_script: None,
            autostart: false,
            variables: Map::new(),
            actions,
        }
    }

    /// Name shown in task records; falls back to the id
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Deepest nesting level across the top-level actions
    pub fn max_depth(&self) -> usize {
        self.actions.iter().map(ActionNode::depth).max().unwrap_or(0)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(ScriptError::MissingField("id".to_string()));
        }
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ScriptError::YamlError)
    }
}

impl GroupDefinition {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

impl ScriptLibrary {
    pub fn get_script(&self, id: &str) -> Option<&ScriptDefinition> {
        self.scripts.iter().find(|s| s.id == id)
    }

    pub fn get_group(&self, id: &str) -> Option<&GroupDefinition> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn autostart_scripts(&self) -> impl Iterator<Item = &ScriptDefinition> {
        self.scripts.iter().filter(|s| s.autostart)
    }

    fn validate_structure(&self) -> Result<()> {
        let mut group_ids = HashSet::new();
        for group in &self.groups {
            if group.id.trim().is_empty() {
                return Err(ScriptError::MissingField("groups[].id".to_string()));
            }
            if !group_ids.insert(group.id.as_str()) {
                return Err(ScriptError::ValidationError(
                    ValidationError::DuplicateGroup {
                        group: group.id.clone(),
                    },
                ));
            }
        }

        let mut script_ids = HashSet::new();
        for script in &self.scripts {
            script.validate_structure()?;
            if !script_ids.insert(script.id.as_str()) {
                return Err(ScriptError::ValidationError(
                    ValidationError::DuplicateScript {
                        script: script.id.clone(),
                    },
                ));
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Yaml,
    Json,
}

impl DocumentFormat {
    /// `.json` files are JSON, everything else is read as YAML
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DocumentFormat::Json,
            _ => DocumentFormat::Yaml,
        }
    }
}

pub struct ScriptParser;

impl ScriptParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a single script document from a file
    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<ScriptDefinition> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        self.parse_string(&content, DocumentFormat::from_path(path))
    }

    pub fn parse_string(&self, content: &str, format: DocumentFormat) -> Result<ScriptDefinition> {
        if content.trim().is_empty() {
            return Err(ScriptError::InvalidFormat("document is empty".to_string()));
        }

        let script: ScriptDefinition = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        script.validate_structure()?;
        Ok(script)
    }

    /// Parse a library document (groups plus scripts) from a file
    pub async fn parse_library_file<P: AsRef<Path>>(&self, path: P) -> Result<ScriptLibrary> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).await?;
        self.parse_library_string(&content, DocumentFormat::from_path(path))
    }

    pub fn parse_library_string(
        &self,
        content: &str,
        format: DocumentFormat,
    ) -> Result<ScriptLibrary> {
        let library: ScriptLibrary = match format {
            DocumentFormat::Yaml => serde_yaml::from_str(content)?,
            DocumentFormat::Json => serde_json::from_str(content)?,
        };
        library.validate_structure()?;
        Ok(library)
    }
}

impl Default for ScriptParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    const SCRIPT: &str = r#"
id: daily_login
name: Daily login
group: game_a
priority: 5
max_retries: 2
exception_script: recover
variables:
  attempts: 0
actions:
  - type: plugin_call
    capability: shell
    action: echo
    params:
      message: hello
    store_result: greeting
  - type: wait
    duration: 0.1
"#;

    #[test]
    fn test_parse_yaml_script() {
        let script = ScriptParser::new()
            .parse_string(SCRIPT, DocumentFormat::Yaml)
            .unwrap();

        assert_eq!(script.id, "daily_login");
        assert_eq!(script.display_name(), "Daily login");
        assert_eq!(script.priority, Some(5));
        assert_eq!(script.max_retries, Some(2));
        assert_eq!(script.exception_script.as_deref(), Some("recover"));
        assert_eq!(script.variables.get("attempts"), Some(&Value::from(0)));
        assert_eq!(script.actions.len(), 2);
        assert!(!script.autostart);
    }

    #[test]
    fn test_parse_json_script() {
        let json = r#"{"id": "j", "actions": [{"type": "wait", "duration": 2}]}"#;
        let script = ScriptParser::new()
            .parse_string(json, DocumentFormat::Json)
            .unwrap();
        assert_eq!(script.display_name(), "j");
        assert_eq!(script.max_depth(), 1);
    }

    #[test]
    fn test_missing_id_rejected() {
        let err = ScriptParser::new()
            .parse_string("id: ''\nactions: []\n", DocumentFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ScriptError::MissingField(ref f) if f == "id"));

        let err = ScriptParser::new()
            .parse_string("   ", DocumentFormat::Yaml)
            .unwrap_err();
        assert!(matches!(err, ScriptError::InvalidFormat(_)));
    }

    #[test]
    fn test_library_rejects_duplicates() {
        let yaml = r#"
groups:
  - id: g1
scripts:
  - id: a
    actions: [{ type: wait }]
  - id: a
    actions: [{ type: wait }]
"#;
        let err = ScriptParser::new()
            .parse_library_string(yaml, DocumentFormat::Yaml)
            .unwrap_err();
        assert!(matches!(
            err,
            ScriptError::ValidationError(ValidationError::DuplicateScript { .. })
        ));
    }

    #[tokio::test]
    async fn test_parse_files_by_extension() {
        let mut yaml_file = Builder::new().suffix(".yaml").tempfile().unwrap();
        yaml_file.write_all(SCRIPT.as_bytes()).unwrap();
        let script = ScriptParser::new().parse_file(yaml_file.path()).await.unwrap();
        assert_eq!(script.id, "daily_login");

        let mut lib_file = Builder::new().suffix(".json").tempfile().unwrap();
        lib_file
            .write_all(
                br#"{"groups": [{"id": "g1", "name": "Game"}],
                     "scripts": [{"id": "s", "group": "g1", "autostart": true,
                                  "actions": [{"type": "restart"}]}]}"#,
            )
            .unwrap();
        let library = ScriptParser::new()
            .parse_library_file(lib_file.path())
            .await
            .unwrap();
        assert!(library.get_group("g1").unwrap().enabled);
        assert_eq!(library.autostart_scripts().count(), 1);
    }
}
