// ABOUTME: Static checks over script documents before they are queued
// ABOUTME: Reports unknown capabilities, unsupported kinds, bad references and risky waits

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::action::{seconds, ActionNode, ConditionCheck};
use super::definition::{ScriptDefinition, ScriptLibrary};
use super::error::ValidationError;
use crate::capability::CapabilityInfo;

/// Nesting beyond this depth is legal but almost always a mistake
pub const MAX_RECOMMENDED_DEPTH: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    fn merge(&mut self, other: ValidationReport) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

pub struct ScriptValidator {
    /// Capability name -> advertised actions. `None` skips capability checks.
    capabilities: Option<HashMap<String, Vec<String>>>,
    known_scripts: Option<HashSet<String>>,
    stall_threshold: Option<Duration>,
}

impl ScriptValidator {
    pub fn new() -> Self {
        Self {
            capabilities: None,
            known_scripts: None,
            stall_threshold: None,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<CapabilityInfo>) -> Self {
        self.capabilities = Some(
            capabilities
                .into_iter()
                .map(|info| (info.name, info.actions))
                .collect(),
        );
        self
    }

    /// Script ids that `exception_script` references may point at
    pub fn with_known_scripts<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.known_scripts = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_stall_threshold(mut self, threshold: Duration) -> Self {
        self.stall_threshold = Some(threshold);
        self
    }

    /// Validate a single script
    pub fn validate(&self, script: &ScriptDefinition) -> ValidationReport {
        let mut report = ValidationReport::new();

        if script.actions.is_empty() {
            report.errors.push(ValidationError::EmptyScript {
                script: script.id.clone(),
            });
        }

        if let (Some(exception), Some(known)) = (&script.exception_script, &self.known_scripts) {
            if !known.contains(exception) {
                report.errors.push(ValidationError::UnknownExceptionScript {
                    owner: script.id.clone(),
                    exception_script: exception.clone(),
                });
            }
        }

        let depth = script.max_depth();
        if depth > MAX_RECOMMENDED_DEPTH {
            report.warnings.push(format!(
                "Script '{}' nests actions {} levels deep (recommended maximum {})",
                script.id, depth, MAX_RECOMMENDED_DEPTH
            ));
        }

        for node in &script.actions {
            node.walk(&mut |n| self.check_node(&script.id, n, &mut report));
        }

        report.finish()
    }

    /// Validate every script of a library plus its group/exception references
    pub fn validate_library(&self, library: &ScriptLibrary) -> ValidationReport {
        let script_ids: HashSet<String> = library.scripts.iter().map(|s| s.id.clone()).collect();
        let group_ids: HashSet<&str> = library.groups.iter().map(|g| g.id.as_str()).collect();

        let scoped = ScriptValidator {
            capabilities: self.capabilities.clone(),
            known_scripts: Some(
                self.known_scripts
                    .iter()
                    .flatten()
                    .cloned()
                    .chain(script_ids.iter().cloned())
                    .collect(),
            ),
            stall_threshold: self.stall_threshold,
        };

        let mut report = ValidationReport::new();

        for group in &library.groups {
            if let Some(ref exception) = group.exception_script {
                if !script_ids.contains(exception) {
                    report.errors.push(ValidationError::UnknownExceptionScript {
                        owner: group.id.clone(),
                        exception_script: exception.clone(),
                    });
                }
            }
        }

        for script in &library.scripts {
            if let Some(ref group) = script.group {
                if !group_ids.contains(group.as_str()) {
                    report.errors.push(ValidationError::UnknownGroup {
                        script: script.id.clone(),
                        group: group.clone(),
                    });
                }
            } else if script.autostart {
                report.warnings.push(format!(
                    "Script '{}' is marked autostart but has no group",
                    script.id
                ));
            }
            report.merge(scoped.validate(script));
        }

        report.finish()
    }

    fn check_node(&self, script: &str, node: &ActionNode, report: &mut ValidationReport) {
        match node {
            ActionNode::PluginCall(call) => {
                if call.action.trim().is_empty() {
                    report.errors.push(ValidationError::InvalidAction {
                        script: script.to_string(),
                        reason: format!("plugin_call on '{}' has no action", call.capability),
                    });
                    return;
                }
                self.check_capability(script, &call.capability, &call.action, report);
            }
            ActionNode::Condition(condition) => {
                if let ConditionCheck::TemplateMatch { threshold, .. } = condition.check {
                    check_threshold(script, threshold, report);
                }
            }
            ActionNode::TemplateMatch(action) => {
                check_threshold(script, action.threshold, report);
            }
            ActionNode::Loop(l) => {
                if l.max_iterations == 0 {
                    report.warnings.push(format!(
                        "Script '{}' has a loop with max_iterations 0; its body never runs",
                        script
                    ));
                }
                if let Some(threshold) = self.stall_threshold {
                    if seconds(l.interval) > threshold {
                        report.warnings.push(format!(
                            "Script '{}' has a loop interval of {}s, longer than the stall threshold of {}s",
                            script,
                            l.interval,
                            threshold.as_secs_f64()
                        ));
                    }
                }
            }
            ActionNode::Wait(wait) => {
                if let Some(threshold) = self.stall_threshold {
                    if seconds(wait.duration) > threshold {
                        report.warnings.push(format!(
                            "Script '{}' waits {}s, longer than the stall threshold of {}s; the watchdog will treat it as stalled",
                            script,
                            wait.duration,
                            threshold.as_secs_f64()
                        ));
                    }
                }
            }
            ActionNode::SetVariable(set) => {
                if set.name.trim().is_empty() {
                    report.errors.push(ValidationError::InvalidAction {
                        script: script.to_string(),
                        reason: "set_variable requires a name".to_string(),
                    });
                }
            }
            ActionNode::Unsupported { kind } => {
                report.errors.push(ValidationError::UnsupportedActionKind {
                    script: script.to_string(),
                    kind: kind.clone(),
                });
            }
            ActionNode::Ocr(_) | ActionNode::Restart(_) => {}
        }
    }

    fn check_capability(
        &self,
        script: &str,
        capability: &str,
        action: &str,
        report: &mut ValidationReport,
    ) {
        let Some(ref capabilities) = self.capabilities else {
            return;
        };

        match capabilities.get(capability) {
            None => report.errors.push(ValidationError::UnknownCapability {
                script: script.to_string(),
                capability: capability.to_string(),
            }),
            Some(actions) if !actions.is_empty() && !actions.iter().any(|a| a == action) => {
                report.errors.push(ValidationError::UnknownAction {
                    script: script.to_string(),
                    capability: capability.to_string(),
                    action: action.to_string(),
                    supported: actions.clone(),
                })
            }
            Some(_) => {}
        }
    }
}

fn check_threshold(script: &str, threshold: f64, report: &mut ValidationReport) {
    if !(0.0..=1.0).contains(&threshold) {
        report.errors.push(ValidationError::InvalidAction {
            script: script.to_string(),
            reason: format!("template threshold {} is outside 0.0..=1.0", threshold),
        });
    }
}

impl Default for ScriptValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{DocumentFormat, ScriptParser};

    fn shell_info() -> CapabilityInfo {
        CapabilityInfo {
            name: "shell".to_string(),
            version: "0.1.0".to_string(),
            description: String::new(),
            platforms: Vec::new(),
            actions: vec!["exec".to_string(), "echo".to_string()],
            enabled: true,
        }
    }

    fn parse(yaml: &str) -> ScriptDefinition {
        ScriptParser::new()
            .parse_string(yaml, DocumentFormat::Yaml)
            .unwrap()
    }

    #[test]
    fn test_valid_script() {
        let script = parse(
            r#"
id: ok
actions:
  - type: plugin_call
    capability: shell
    action: echo
    params: { message: hi }
"#,
        );
        let report = ScriptValidator::new()
            .with_capabilities(vec![shell_info()])
            .validate(&script);
        assert!(report.is_valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_unknown_capability_action_and_kind() {
        let script = parse(
            r#"
id: bad
actions:
  - type: plugin_call
    capability: adb
    action: tap
  - type: plugin_call
    capability: shell
    action: swipe
  - type: loop
    max_iterations: 2
    actions:
      - type: teleport
"#,
        );
        let report = ScriptValidator::new()
            .with_capabilities(vec![shell_info()])
            .validate(&script);

        assert!(!report.is_valid);
        assert_eq!(report.errors.len(), 3);
        assert!(matches!(
            report.errors[0],
            ValidationError::UnknownCapability { ref capability, .. } if capability == "adb"
        ));
        assert!(matches!(
            report.errors[1],
            ValidationError::UnknownAction { ref action, .. } if action == "swipe"
        ));
        assert!(matches!(
            report.errors[2],
            ValidationError::UnsupportedActionKind { ref kind, .. } if kind == "teleport"
        ));
    }

    #[test]
    fn test_capability_checks_skipped_without_registry() {
        let script =
            parse("id: s\nactions:\n  - { type: plugin_call, capability: adb, action: tap }\n");
        assert!(ScriptValidator::new().validate(&script).is_valid);
    }

    #[test]
    fn test_warnings_for_zero_loop_and_long_wait() {
        let script = parse(
            r#"
id: warn
actions:
  - type: loop
    max_iterations: 0
    actions: [{ type: wait, duration: 0.1 }]
  - type: wait
    duration: 120
"#,
        );
        let report = ScriptValidator::new()
            .with_stall_threshold(Duration::from_secs(60))
            .validate(&script);

        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings[0].contains("max_iterations 0"));
        assert!(report.warnings[1].contains("stall threshold"));
    }

    #[test]
    fn test_empty_script_is_an_error() {
        let script = parse("id: empty\n");
        let report = ScriptValidator::new().validate(&script);
        assert_eq!(
            report.errors,
            vec![ValidationError::EmptyScript {
                script: "empty".to_string()
            }]
        );
    }

    #[test]
    fn test_library_references() {
        let library = ScriptParser::new()
            .parse_library_string(
                r#"
groups:
  - id: g1
    exception_script: missing_recovery
scripts:
  - id: a
    group: g2
    exception_script: b
    actions: [{ type: wait }]
  - id: b
    group: g1
    actions: [{ type: restart }]
"#,
                DocumentFormat::Yaml,
            )
            .unwrap();

        let report = ScriptValidator::new().validate_library(&library);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors.contains(&ValidationError::UnknownExceptionScript {
            owner: "g1".to_string(),
            exception_script: "missing_recovery".to_string(),
        }));
        assert!(report.errors.contains(&ValidationError::UnknownGroup {
            script: "a".to_string(),
            group: "g2".to_string(),
        }));
    }
}
