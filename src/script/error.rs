// ABOUTME: Error types for script document parsing and validation
// ABOUTME: Defines specific error types for script module operations

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Failed to read script file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid script format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Script '{script}' has no actions")]
    EmptyScript { script: String },

    #[error("Duplicate script id: {script}")]
    DuplicateScript { script: String },

    #[error("Duplicate group id: {group}")]
    DuplicateGroup { group: String },

    #[error("Script '{script}' uses unknown capability '{capability}'")]
    UnknownCapability { script: String, capability: String },

    #[error("Script '{script}' calls unknown action '{action}' on capability '{capability}'. Supported actions: {supported:?}")]
    UnknownAction {
        script: String,
        capability: String,
        action: String,
        supported: Vec<String>,
    },

    #[error("Script '{script}' contains unsupported action kind '{kind}'")]
    UnsupportedActionKind { script: String, kind: String },

    #[error("Script '{script}' has an invalid action: {reason}")]
    InvalidAction { script: String, reason: String },

    #[error("'{owner}' references unknown exception script '{exception_script}'")]
    UnknownExceptionScript {
        owner: String,
        exception_script: String,
    },

    #[error("Script '{script}' targets unknown group '{group}'")]
    UnknownGroup { script: String, group: String },
}

pub type Result<T> = std::result::Result<T, ScriptError>;
