//! Execution tracer: append-only operation log per project.
//!
//! Every task dispatch and every synchronous tool entry point produces
//! exactly one entry. Storage is a JSON-lines file under
//! `.ai_reference/diagnostics/`; recording never fails the caller.

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Value;

use crate::store::AI_REF_DIR;

const TRACE_FILE: &str = "execution_trace.jsonl";
const MAX_PARAM_LEN: usize = 200;
const REDACTED_KEYS: &[&str] = &["content", "text"];

#[derive(Debug, Serialize)]
struct TraceEntry<'a> {
    timestamp: String,
    operation: &'a str,
    parameters: Value,
    status: &'a str,
    execution_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ExecutionTracer {
    trace_path: PathBuf,
}

impl ExecutionTracer {
    pub fn new(project_root: &Path) -> Self {
        Self {
            trace_path: project_root
                .join(AI_REF_DIR)
                .join("diagnostics")
                .join(TRACE_FILE),
        }
    }

    /// Append one trace entry. Parameter values are redacted before they
    /// reach disk; failures are logged and swallowed.
    pub fn record_operation(
        &self,
        operation: &str,
        parameters: &Value,
        status: &str,
        execution_ms: f64,
        error: Option<&str>,
        metadata: Option<Value>,
    ) {
        let entry = TraceEntry {
            timestamp: chrono::Utc::now().to_rfc3339(),
            operation,
            parameters: redact(parameters),
            status,
            execution_ms,
            error,
            metadata,
        };
        if let Err(err) = self.append(&entry) {
            tracing::warn!("failed to record trace entry for {operation}: {err}");
        }
    }

    fn append(&self, entry: &TraceEntry<'_>) -> std::io::Result<()> {
        if let Some(parent) = self.trace_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.trace_path)?;
        writeln!(file, "{line}")
    }

    pub fn trace_path(&self) -> &Path {
        &self.trace_path
    }
}

/// Redact parameter payloads: values of content-bearing keys are dropped and
/// long strings truncated, recursively.
fn redact(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    if REDACTED_KEYS.contains(&k.as_str()) {
                        (k.clone(), Value::String("<redacted>".to_string()))
                    } else {
                        (k.clone(), redact(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact).collect()),
        Value::String(s) if s.len() > MAX_PARAM_LEN => {
            let mut cut = MAX_PARAM_LEN;
            while !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}...", &s[..cut]))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn records_one_line_per_operation() {
        let dir = tempdir().unwrap();
        let tracer = ExecutionTracer::new(dir.path());
        tracer.record_operation("query_component", &json!({"name": "Foo"}), "success", 1.5, None, None);
        tracer.record_operation(
            "edit_file",
            &json!({"path": "a.py"}),
            "error",
            0.2,
            Some("boom"),
            Some(json!({"task_id": "task-12ab34cd"})),
        );

        let body = fs::read_to_string(tracer.trace_path()).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let second: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["status"], "error");
        assert_eq!(second["error"], "boom");
    }

    #[test]
    fn content_parameters_are_redacted() {
        let long = "x".repeat(500);
        let out = redact(&json!({"content": "secret body", "query": long, "n": 3}));
        assert_eq!(out["content"], "<redacted>");
        assert_eq!(out["n"], 3);
        let query = out["query"].as_str().unwrap();
        assert!(query.len() < 500);
        assert!(query.ends_with("..."));
    }
}
