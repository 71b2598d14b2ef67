// ABOUTME: Script module for action-tree documents
// ABOUTME: Exports the action model, script/library parsing and validation

pub mod action;
pub mod definition;
pub mod error;
pub mod validation;

pub use action::{
    ActionNode, CompareOperator, ConditionAction, ConditionCheck, LoopAction, OcrAction,
    PluginCallAction, RestartAction, SetVariableAction, TemplateMatchAction, WaitAction,
};
pub use definition::{
    DocumentFormat, GroupDefinition, ScriptDefinition, ScriptLibrary, ScriptParser,
};
pub use error::{Result, ScriptError, ValidationError};
pub use validation::{ScriptValidator, ValidationReport};
