// ABOUTME: Execution engine module for the autoscript orchestration core
// ABOUTME: Interpreter, execution state machine, watchdog, group queues and scheduler

pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod interpreter;
pub mod queue;
pub mod result;
pub mod scheduler;
pub mod variables;
pub mod watchdog;

pub use context::ExecutionContext;
pub use error::{EngineError, Result};
pub use execution::{
    ActivityClock, Execution, ExecutionInfo, ExecutionRegistry, StalledExecution,
};
pub use executor::{EngineConfig, ScriptCatalog, ScriptEngine, DEFAULT_EXCEPTION_PRIORITY};
pub use interpreter::{compare, Interpreter};
pub use queue::{
    Backoff, CancelOutcome, Disposition, GroupQueue, QueueStatus, QueuedTask, RetryPolicy,
    TaskOutcome, TaskSnapshot, TaskSummary,
};
pub use result::{ActionResult, ExecutionReport, ExecutionState, FailureKind, TaskStatus};
pub use scheduler::{QueueSet, Scheduler};
pub use variables::VariableContext;
pub use watchdog::{StallHandler, Watchdog};
