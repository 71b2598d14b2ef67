// ABOUTME: Built-in shell capability that runs local commands as script actions
// ABOUTME: Supports `exec` with args/env/working dir/timeout and a trivial `echo`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::error::{CapabilityError, Result};
use super::{Capability, Params};

pub struct ShellCapability;

/// Parameters of the `exec` action
///
/// ```yaml
/// type: plugin_call
/// capability: shell
/// action: exec
/// params:
///   command: adb
///   args: ["shell", "input", "tap", "$match_x", "$match_y"]
///   timeout_seconds: 10
/// store_result: tap_output
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecParams {
    pub command: String,

    /// Arguments; numbers and booleans are stringified so resolved
    /// variables can be passed through directly
    #[serde(default)]
    pub args: Vec<Value>,

    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub working_dir: Option<String>,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Exit codes treated as success (default: [0])
    #[serde(default = "default_expected_exit_codes")]
    pub expected_exit_codes: Vec<i32>,
}

fn default_timeout_seconds() -> u64 {
    300
}

fn default_expected_exit_codes() -> Vec<i32> {
    vec![0]
}

#[async_trait]
impl Capability for ShellCapability {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Runs local processes (adb, scrcpy helpers, scripts) and captures their output"
    }

    fn supported_platforms(&self) -> Vec<String> {
        vec!["linux".to_string(), "macos".to_string(), "windows".to_string()]
    }

    fn list_actions(&self) -> Vec<String> {
        vec!["exec".to_string(), "echo".to_string()]
    }

    async fn invoke(&self, action: &str, params: &Params) -> Result<Value> {
        match action {
            "exec" => {
                let params: ExecParams = serde_json::from_value(Value::Object(params.clone()))
                    .map_err(|e| CapabilityError::InvalidParams {
                        capability: "shell".to_string(),
                        action: "exec".to_string(),
                        message: e.to_string(),
                    })?;
                self.exec(&params).await
            }
            "echo" => Ok(params.get("message").cloned().unwrap_or(Value::Null)),
            other => Err(CapabilityError::UnsupportedAction {
                capability: "shell".to_string(),
                action: other.to_string(),
            }),
        }
    }
}

impl ShellCapability {
    async fn exec(&self, params: &ExecParams) -> Result<Value> {
        if params.command.trim().is_empty() {
            return Err(CapabilityError::InvalidParams {
                capability: "shell".to_string(),
                action: "exec".to_string(),
                message: "command cannot be empty".to_string(),
            });
        }

        let args: Vec<String> = params.args.iter().map(stringify_arg).collect();

        let mut cmd = Command::new(&params.command);
        cmd.args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in &params.env {
            cmd.env(key, value);
        }
        if let Some(ref working_dir) = params.working_dir {
            cmd.current_dir(working_dir);
        }

        debug!("shell exec: {} {:?}", params.command, args);

        let output = timeout(Duration::from_secs(params.timeout_seconds), cmd.output())
            .await
            .map_err(|_| {
                CapabilityError::ActionFailed(format!(
                    "Command '{}' timed out after {} seconds",
                    params.command, params.timeout_seconds
                ))
            })?
            .map_err(|e| {
                CapabilityError::ActionFailed(format!(
                    "Failed to execute '{}': {}",
                    params.command, e
                ))
            })?;

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !params.expected_exit_codes.contains(&exit_code) {
            return Err(CapabilityError::ActionFailed(format!(
                "Command exited with unexpected code: {} (expected one of: {:?}){}",
                exit_code,
                params.expected_exit_codes,
                if stderr.trim().is_empty() {
                    String::new()
                } else {
                    format!(": {}", stderr.trim())
                }
            )));
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
        }))
    }
}

fn stringify_arg(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(value: Value) -> Params {
        match value {
            Value::Object(map) => map,
            _ => Params::new(),
        }
    }

    #[tokio::test]
    async fn test_exec_captures_stdout() {
        let shell = ShellCapability;
        let result = shell
            .invoke(
                "exec",
                &params(json!({ "command": "echo", "args": ["hello", 42] })),
            )
            .await
            .unwrap();

        assert_eq!(result["exit_code"], json!(0));
        assert!(result["stdout"].as_str().unwrap().contains("hello 42"));
    }

    #[tokio::test]
    async fn test_exec_unexpected_exit_code_fails() {
        let shell = ShellCapability;
        let err = shell
            .invoke(
                "exec",
                &params(json!({ "command": "sh", "args": ["-c", "exit 3"] })),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("unexpected code: 3"));
    }

    #[tokio::test]
    async fn test_exec_expected_exit_code_succeeds() {
        let shell = ShellCapability;
        let result = shell
            .invoke(
                "exec",
                &params(json!({
                    "command": "sh",
                    "args": ["-c", "exit 1"],
                    "expected_exit_codes": [0, 1]
                })),
            )
            .await
            .unwrap();

        assert_eq!(result["exit_code"], json!(1));
    }

    #[tokio::test]
    async fn test_exec_requires_command() {
        let shell = ShellCapability;
        let err = shell.invoke("exec", &Params::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_echo_and_unknown_action() {
        let shell = ShellCapability;
        let echoed = shell
            .invoke("echo", &params(json!({ "message": "hi" })))
            .await
            .unwrap();
        assert_eq!(echoed, json!("hi"));

        let err = shell.invoke("swipe", &Params::new()).await.unwrap_err();
        assert!(matches!(err, CapabilityError::UnsupportedAction { .. }));
    }
}
