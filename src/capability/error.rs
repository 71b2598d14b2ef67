// ABOUTME: Error types for capability registry and driver invocation
// ABOUTME: Driver failures are opaque strings; the registry adds lookup and gating errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CapabilityError {
    #[error("Capability not found: {name}")]
    NotFound { name: String },

    #[error("Capability disabled: {name}")]
    Disabled { name: String },

    #[error("Capability unavailable: {name}")]
    Unavailable { name: String },

    #[error("Capability '{capability}' does not support action '{action}'")]
    UnsupportedAction { capability: String, action: String },

    #[error("Invalid parameters for {capability}.{action}: {message}")]
    InvalidParams {
        capability: String,
        action: String,
        message: String,
    },

    #[error("Initialization of '{name}' failed: {message}")]
    InitializationFailed { name: String, message: String },

    #[error("{0}")]
    ActionFailed(String),

    #[error("Vision service error: {0}")]
    Vision(String),
}

pub type Result<T> = std::result::Result<T, CapabilityError>;
