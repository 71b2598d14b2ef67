// ABOUTME: Action tree data model for automation scripts
// ABOUTME: Tagged action nodes (plugin calls, conditions, loops, vision, waits, variables, restart)

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

use crate::capability::Region;

/// One node of a script's action tree.
///
/// Documents tag nodes with a `type` field. Legacy tags (`plugin_action`,
/// `polling_loop`, `ocr_text`, `restart_script`) are accepted as aliases. An
/// unrecognized tag parses into [`ActionNode::Unsupported`] and fails when
/// executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionNode {
    PluginCall(PluginCallAction),
    Condition(ConditionAction),
    Loop(LoopAction),
    TemplateMatch(TemplateMatchAction),
    Ocr(OcrAction),
    Wait(WaitAction),
    SetVariable(SetVariableAction),
    Restart(RestartAction),
    Unsupported { kind: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginCallAction {
    #[serde(alias = "plugin")]
    pub capability: String,
    pub action: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionAction {
    #[serde(flatten)]
    pub check: ConditionCheck,
    #[serde(default)]
    pub on_true: Vec<ActionNode>,
    #[serde(default)]
    pub on_false: Vec<ActionNode>,
    /// Inside a loop, a true evaluation ends the loop early
    #[serde(default)]
    pub break_on_true: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition_type", rename_all = "snake_case")]
pub enum ConditionCheck {
    TemplateMatch {
        template_path: String,
        #[serde(default = "default_threshold")]
        threshold: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input_image: Option<String>,
    },
    VariableCompare {
        variable: String,
        #[serde(default)]
        operator: CompareOperator,
        #[serde(default)]
        value: Value,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CompareOperator {
    #[default]
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<=")]
    Le,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopAction {
    /// Seconds slept between iterations
    #[serde(default = "default_interval")]
    pub interval: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u64,
    #[serde(default)]
    pub actions: Vec<ActionNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateMatchAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image: Option<String>,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Region>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitAction {
    /// Seconds
    #[serde(default = "default_wait")]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetVariableAction {
    pub name: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RestartAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn default_threshold() -> f64 {
    0.8
}

fn default_interval() -> f64 {
    1.0
}

fn default_max_iterations() -> u64 {
    100
}

fn default_wait() -> f64 {
    1.0
}

/// Mirror of [`ActionNode`] without the catch-all variant, used for the
/// derived part of deserialization.
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum KnownAction {
    #[serde(alias = "plugin_action")]
    PluginCall(PluginCallAction),
    Condition(ConditionAction),
    #[serde(alias = "polling_loop")]
    Loop(LoopAction),
    TemplateMatch(TemplateMatchAction),
    #[serde(alias = "ocr_text")]
    Ocr(OcrAction),
    Wait(WaitAction),
    SetVariable(SetVariableAction),
    #[serde(alias = "restart_script")]
    Restart(RestartAction),
}

const KNOWN_KINDS: &[&str] = &[
    "plugin_call",
    "plugin_action",
    "condition",
    "loop",
    "polling_loop",
    "template_match",
    "ocr",
    "ocr_text",
    "wait",
    "set_variable",
    "restart",
    "restart_script",
];

impl From<KnownAction> for ActionNode {
    fn from(known: KnownAction) -> Self {
        match known {
            KnownAction::PluginCall(a) => ActionNode::PluginCall(a),
            KnownAction::Condition(a) => ActionNode::Condition(a),
            KnownAction::Loop(a) => ActionNode::Loop(a),
            KnownAction::TemplateMatch(a) => ActionNode::TemplateMatch(a),
            KnownAction::Ocr(a) => ActionNode::Ocr(a),
            KnownAction::Wait(a) => ActionNode::Wait(a),
            KnownAction::SetVariable(a) => ActionNode::SetVariable(a),
            KnownAction::Restart(a) => ActionNode::Restart(a),
        }
    }
}

impl<'de> Deserialize<'de> for ActionNode {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Value::deserialize(deserializer)?;
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| D::Error::missing_field("type"))?
            .to_string();

        if !KNOWN_KINDS.contains(&kind.as_str()) {
            return Ok(ActionNode::Unsupported { kind });
        }

        KnownAction::deserialize(raw)
            .map(ActionNode::from)
            .map_err(|e| D::Error::custom(format!("invalid '{}' action: {}", kind, e)))
    }
}

impl ActionNode {
    /// Canonical kind tag
    pub fn kind(&self) -> &str {
        match self {
            ActionNode::PluginCall(_) => "plugin_call",
            ActionNode::Condition(_) => "condition",
            ActionNode::Loop(_) => "loop",
            ActionNode::TemplateMatch(_) => "template_match",
            ActionNode::Ocr(_) => "ocr",
            ActionNode::Wait(_) => "wait",
            ActionNode::SetVariable(_) => "set_variable",
            ActionNode::Restart(_) => "restart",
            ActionNode::Unsupported { kind } => kind,
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            ActionNode::PluginCall(a) => a.description.as_deref(),
            ActionNode::Condition(a) => a.description.as_deref(),
            ActionNode::Loop(a) => a.description.as_deref(),
            ActionNode::TemplateMatch(a) => a.description.as_deref(),
            ActionNode::Ocr(a) => a.description.as_deref(),
            ActionNode::Wait(a) => a.description.as_deref(),
            ActionNode::SetVariable(a) => a.description.as_deref(),
            ActionNode::Restart(a) => a.description.as_deref(),
            ActionNode::Unsupported { .. } => None,
        }
    }

    /// Nodes that contain no nested action sequences
    pub fn is_leaf(&self) -> bool {
        !matches!(self, ActionNode::Condition(_) | ActionNode::Loop(_))
    }

    /// Direct children, in execution order (on_true before on_false)
    pub fn children(&self) -> Vec<&ActionNode> {
        match self {
            ActionNode::Condition(c) => c.on_true.iter().chain(c.on_false.iter()).collect(),
            ActionNode::Loop(l) => l.actions.iter().collect(),
            _ => Vec::new(),
        }
    }

    /// Depth of the subtree rooted at this node (a leaf has depth 1)
    pub fn depth(&self) -> usize {
        1 + self
            .children()
            .into_iter()
            .map(ActionNode::depth)
            .max()
            .unwrap_or(0)
    }

    /// Pre-order walk over this node and all descendants
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a ActionNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }
}

impl ConditionAction {
    pub fn variable_compare(variable: &str, operator: CompareOperator, value: Value) -> Self {
        Self {
            check: ConditionCheck::VariableCompare {
                variable: variable.to_string(),
                operator,
                value,
            },
            on_true: Vec::new(),
            on_false: Vec::new(),
            break_on_true: false,
            description: None,
        }
    }
}

/// Convert fractional seconds from a script document into a duration.
/// Negative or non-finite values collapse to zero.
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}
