// ABOUTME: Command implementations for the autoscript CLI
// ABOUTME: Handles run, validate, serve, init and capabilities commands

use anyhow::{anyhow, Context, Result};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::config::Config;
use crate::capability::CapabilityRegistry;
use crate::engine::ScriptEngine;
use crate::output::{summarize_report, OutputHandler};
use crate::script::{ScriptParser, ScriptValidator, ValidationReport};

/// Grace period given to running executions when `serve` stops
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

async fn build_registry() -> Arc<CapabilityRegistry> {
    let registry = CapabilityRegistry::with_builtins().await;
    registry.initialize_all().await;
    Arc::new(registry)
}

async fn validator_for(registry: &CapabilityRegistry, config: &Config) -> ScriptValidator {
    ScriptValidator::new()
        .with_capabilities(registry.list().await)
        .with_stall_threshold(config.engine.stall_threshold())
}

fn print_report(subject: &str, report: &ValidationReport) {
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
    for error in &report.errors {
        println!("  error: {}", error);
    }
    if report.is_valid {
        println!("✓ {} is valid", subject);
    } else {
        println!("✗ {} has {} error(s)", subject, report.errors.len());
    }
}

/// Execute a script once, inline
pub async fn run_script(
    script_path: PathBuf,
    vars: Map<String, Value>,
    group: Option<String>,
    config: &Config,
    output: &OutputHandler,
) -> Result<()> {
    info!("Running script: {}", script_path.display());

    let mut script = ScriptParser::new()
        .parse_file(&script_path)
        .await
        .map_err(|e| anyhow!("Failed to parse script: {}", e))?;

    let registry = build_registry().await;
    let validation = validator_for(&registry, config).await.validate(&script);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if !validation.is_valid {
        print_report(&script.id, &validation);
        return Err(anyhow!("Script '{}' failed validation", script.id));
    }

    script.variables.extend(vars);
    if script.group.is_none() || group.is_some() {
        script.group = Some(group.unwrap_or_else(|| config.default_group.clone()));
    }

    let engine = ScriptEngine::with_registry(config.engine.clone(), Arc::clone(&registry));
    let report = engine.run_script(&script).await;
    registry.cleanup_all().await;

    println!("{}", summarize_report(&report));
    output
        .emit(&report)
        .await
        .context("Failed to write execution report")?;

    if report.is_successful() {
        Ok(())
    } else {
        Err(anyhow!(
            "Script '{}' finished with state {}",
            report.script_name,
            report.state
        ))
    }
}

/// Validate a script or library file
pub async fn validate(path: PathBuf, library: bool, config: &Config) -> Result<()> {
    info!("Validating: {}", path.display());

    let parser = ScriptParser::new();
    let registry = build_registry().await;
    let validator = validator_for(&registry, config).await;

    let (subject, report) = if library {
        let library = parser
            .parse_library_file(&path)
            .await
            .map_err(|e| anyhow!("Library validation failed: {}", e))?;
        let subject = format!(
            "Library {} ({} group(s), {} script(s))",
            path.display(),
            library.groups.len(),
            library.scripts.len()
        );
        (subject, validator.validate_library(&library))
    } else {
        let script = parser
            .parse_file(&path)
            .await
            .map_err(|e| anyhow!("Script validation failed: {}", e))?;
        let subject = format!("Script '{}' ({} action(s))", script.id, script.actions.len());
        (subject, validator.validate(&script))
    };

    print_report(&subject, &report);
    if report.is_valid {
        Ok(())
    } else {
        Err(anyhow!("Validation failed for {}", path.display()))
    }
}

/// Load a library, queue its autostart scripts and run until stopped
pub async fn serve(
    library_path: PathBuf,
    duration: Option<Duration>,
    config: &Config,
    output: &OutputHandler,
) -> Result<()> {
    let library = ScriptParser::new()
        .parse_library_file(&library_path)
        .await
        .map_err(|e| anyhow!("Failed to load library: {}", e))?;

    let registry = build_registry().await;
    let report = validator_for(&registry, config)
        .await
        .validate_library(&library);
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if !report.is_valid {
        print_report(&library_path.display().to_string(), &report);
        return Err(anyhow!("Library {} failed validation", library_path.display()));
    }

    let engine = ScriptEngine::with_registry(config.engine.clone(), registry);
    engine.load_library(&library).await?;

    for script in library.autostart_scripts() {
        let group = script
            .group
            .clone()
            .unwrap_or_else(|| config.default_group.clone());
        if library.get_group(&group).is_none() && engine.queue_status(&group).await.is_err() {
            engine.create_group(&group, &group).await?;
        }
        let task_id = engine.submit_script(&group, &script.id, None).await?;
        info!("Queued autostart script {} as task {}", script.id, task_id);
    }

    engine.start().await?;
    info!("Serving {}", library_path.display());

    match duration {
        Some(limit) => {
            tokio::select! {
                _ = tokio::time::sleep(limit) => info!("Serve duration elapsed"),
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Interrupted");
        }
    }

    let statuses = engine.all_queue_status().await;
    let shutdown = engine.shutdown(SHUTDOWN_GRACE).await;
    output
        .emit(&statuses)
        .await
        .context("Failed to write queue status")?;
    shutdown?;
    Ok(())
}

/// List registered capabilities
pub async fn list_capabilities(output: &OutputHandler) -> Result<()> {
    let registry = build_registry().await;
    let capabilities = registry.list().await;
    output
        .emit(&capabilities)
        .await
        .context("Failed to write capability list")?;
    registry.cleanup_all().await;
    Ok(())
}

/// Initialize a new script file
pub async fn init_script(name: String, output_dir: PathBuf, template: String) -> Result<()> {
    info!("Initializing script '{}' in {}", name, output_dir.display());

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let script_file = script_path(&output_dir, &name);
    if script_file.exists() {
        return Err(anyhow!(
            "Script file already exists: {}",
            script_file.display()
        ));
    }

    let content = generate_script_template(&name, &template)?;
    std::fs::write(&script_file, content)?;

    println!("Created script file: {}", script_file.display());
    Ok(())
}

fn script_path(output_dir: &Path, name: &str) -> PathBuf {
    output_dir.join(format!("{}.yaml", name))
}

/// Generate script template content
pub fn generate_script_template(name: &str, template_type: &str) -> Result<String> {
    match template_type {
        "basic" => Ok(generate_basic_template(name)),
        "exception" => Ok(generate_exception_template(name)),
        "startup" => Ok(generate_startup_template(name)),
        _ => Err(anyhow!("Unknown template type: {}", template_type)),
    }
}

fn generate_basic_template(name: &str) -> String {
    format!(
        r#"id: {name}
name: {name}
description: Polls for a button and taps it once found
priority: 0
max_retries: 3
variables:
  device_screen: /sdcard/{name}_screen.png
  screen: /tmp/{name}_screen.png
actions:
  - type: loop
    interval: 2.0
    max_iterations: 30
    actions:
      - type: plugin_call
        capability: shell
        action: exec
        params:
          command: adb
          args: ["shell", "screencap", "-p", "$device_screen"]
      - type: plugin_call
        capability: shell
        action: exec
        params:
          command: adb
          args: ["pull", "$device_screen", "$screen"]
      - type: condition
        condition_type: template_match
        template_path: templates/{name}_button.png
        input_image: $screen
        threshold: 0.8
        break_on_true: true
        on_true:
          - type: plugin_call
            capability: shell
            action: exec
            params:
              command: adb
              args: ["shell", "input", "tap", "$match_x", "$match_y"]
  - type: set_variable
    name: finished
    value: true
"#,
        name = name
    )
}

fn generate_exception_template(name: &str) -> String {
    format!(
        r#"id: {name}
name: {name}
description: Recovery script queued by the watchdog when a script in the group stalls
max_retries: 1
actions:
  - type: plugin_call
    capability: shell
    action: exec
    params:
      command: adb
      args: ["shell", "input", "keyevent", "KEYCODE_BACK"]
  - type: wait
    duration: 2.0
  - type: plugin_call
    capability: shell
    action: exec
    params:
      command: adb
      args: ["shell", "input", "keyevent", "KEYCODE_HOME"]
"#,
        name = name
    )
}

fn generate_startup_template(name: &str) -> String {
    format!(
        r#"id: {name}
name: {name}
description: Launches the target application and waits for it to settle
autostart: true
priority: 10
# exception_script: <id of a script created with --template exception>
variables:
  package: com.example.app
actions:
  - type: plugin_call
    capability: shell
    action: exec
    params:
      command: adb
      args: ["shell", "monkey", "-p", "$package", "1"]
  - type: wait
    duration: 5.0
  - type: condition
    condition_type: variable_compare
    variable: package
    operator: "!="
    value: ""
    on_false:
      - type: restart
"#,
        name = name
    )
}
