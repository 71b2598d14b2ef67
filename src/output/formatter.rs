// ABOUTME: Output formatters rendering serializable snapshots as JSON, pretty JSON or YAML
// ABOUTME: Also provides a compact one-line summary for execution reports

use serde::Serialize;

use super::config::OutputFormat;
use super::error::{OutputError, Result};
use crate::engine::ExecutionReport;

pub trait OutputFormatter: Send + Sync {
    fn format_value(&self, value: &serde_json::Value) -> Result<String>;
}

pub struct JsonFormatter {
    pretty: bool,
}

pub struct YamlFormatter;

impl Default for JsonFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonFormatter {
    pub fn new() -> Self {
        Self { pretty: false }
    }

    pub fn new_pretty() -> Self {
        Self { pretty: true }
    }
}

impl OutputFormatter for JsonFormatter {
    fn format_value(&self, value: &serde_json::Value) -> Result<String> {
        if self.pretty {
            serde_json::to_string_pretty(value).map_err(OutputError::SerializationError)
        } else {
            serde_json::to_string(value).map_err(OutputError::SerializationError)
        }
    }
}

impl OutputFormatter for YamlFormatter {
    fn format_value(&self, value: &serde_json::Value) -> Result<String> {
        let rendered = serde_yaml::to_string(value)?;
        Ok(rendered.trim_end().to_string())
    }
}

pub fn formatter_for(format: OutputFormat) -> Box<dyn OutputFormatter> {
    match format {
        OutputFormat::Json => Box::new(JsonFormatter::new()),
        OutputFormat::Pretty => Box::new(JsonFormatter::new_pretty()),
        OutputFormat::Yaml => Box::new(YamlFormatter),
    }
}

/// Render any serializable snapshot in the requested format
pub fn render<T: Serialize + ?Sized>(value: &T, format: OutputFormat) -> Result<String> {
    let value = serde_json::to_value(value)?;
    formatter_for(format).format_value(&value)
}

/// One line per report, for terminal use
pub fn summarize_report(report: &ExecutionReport) -> String {
    let mut line = format!(
        "{} [{}] {} in {:.2}s ({} action(s))",
        report.script_name,
        report.group_id,
        report.state,
        report.duration().as_secs_f64(),
        report.actions_executed
    );
    if let Some(ref error) = report.error {
        line.push_str(": ");
        line.push_str(error);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_formats() {
        let value = json!({ "id": "t1", "status": "pending" });
        assert_eq!(
            render(&value, OutputFormat::Json).unwrap(),
            r#"{"id":"t1","status":"pending"}"#
        );
        let pretty = render(&value, OutputFormat::Pretty).unwrap();
        assert!(pretty.contains("\n  \"id\": \"t1\""));
    }

    #[test]
    fn test_yaml_format() {
        let rendered = render(&json!({ "queue_length": 2 }), OutputFormat::Yaml).unwrap();
        assert_eq!(rendered, "queue_length: 2");
    }
}
