// ABOUTME: Main library module for the autoscript orchestration engine
// ABOUTME: Exports all core modules and provides the public API

pub mod capability;
pub mod cli;
pub mod engine;
pub mod output;
pub mod script;

// Re-export commonly used types
pub use capability::{Capability, CapabilityError, CapabilityRegistry};
pub use cli::{App, Args, Config};
pub use engine::{
    EngineConfig, EngineError, ExecutionReport, ExecutionState, ScriptEngine, TaskSnapshot,
    TaskStatus,
};
pub use output::OutputHandler;
pub use script::{ActionNode, ScriptDefinition, ScriptLibrary, ScriptParser, ScriptValidator};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
