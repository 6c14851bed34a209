//! Before/after audit trail for applied commands.
//!
//! Large values are stored as `{length|keys, first, last}` stubs so the log
//! stays small no matter what the AI writes. A few display-relevant paths
//! keep their newest element in full.

use super::interpreter::{execute, ExecOutcome, ExecutionError};
use super::pipeline::{Rejected, ValidationError};
use super::Command;
use crate::document::{schema, Document, Path};
use serde::Serialize;
use serde_json::{json, Value};
use std::fmt;

const MAX_ARRAY_ITEMS: usize = 3;
const MAX_OBJECT_KEYS: usize = 5;

/// What happened to a logged command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ChangeOutcome {
    Applied,
    /// Refused by validation; never executed.
    Rejected { errors: Vec<ValidationError> },
    /// Passed validation but failed against live state.
    Failed { error: String },
    /// Not run because the batch was aborted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeLogEntry {
    pub key: String,
    pub action: String,
    pub old_value: Value,
    pub new_value: Value,
    pub outcome: ChangeOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl ChangeLogEntry {
    pub fn is_applied(&self) -> bool {
        self.outcome == ChangeOutcome::Applied
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for ChangeLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            ChangeOutcome::Applied => write!(
                f,
                "[{}] {}: {} → {}",
                self.action,
                self.key,
                render(&self.old_value),
                render(&self.new_value)
            ),
            ChangeOutcome::Rejected { errors } => {
                let reasons: Vec<String> = errors.iter().map(ToString::to_string).collect();
                write!(
                    f,
                    "[ignored] {} {}: {}",
                    self.action,
                    self.key,
                    reasons.join("; ")
                )
            }
            ChangeOutcome::Failed { error } => {
                write!(f, "[failed] {} {}: {}", self.action, self.key, error)
            }
            ChangeOutcome::Skipped => write!(f, "[skipped] {} {}", self.action, self.key),
        }
    }
}

/// Reduce a nested container to a one-line stub.
fn shallow(value: &Value) -> Value {
    match value {
        Value::Array(items) if items.len() > MAX_ARRAY_ITEMS => json!(format!("[{} items]", items.len())),
        Value::Object(map) if map.len() > MAX_OBJECT_KEYS => json!(format!("{{{} keys}}", map.len())),
        other => other.clone(),
    }
}

/// Summarize a value for the log.
///
/// On interesting paths the newest array element is kept whole.
pub fn summarize(path: &Path, value: Option<&Value>) -> Value {
    let Some(value) = value else {
        return Value::Null;
    };

    match value {
        Value::Array(items) if items.len() > MAX_ARRAY_ITEMS => {
            let last = items.last().map_or(Value::Null, |v| {
                if schema::is_interesting(path) {
                    v.clone()
                } else {
                    shallow(v)
                }
            });
            json!({
                "length": items.len(),
                "first": items.first().map_or(Value::Null, shallow),
                "last": last,
            })
        }
        Value::Object(map) if map.len() > MAX_OBJECT_KEYS => json!({
            "keys": map.len(),
            "first": map.keys().next(),
            "last": map.keys().last(),
        }),
        other => other.clone(),
    }
}

/// An ordered log of everything a batch did or declined to do.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ChangeLog {
    entries: Vec<ChangeLogEntry>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ChangeLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.entries.iter()
    }

    pub fn applied(&self) -> impl Iterator<Item = &ChangeLogEntry> {
        self.entries.iter().filter(|e| e.is_applied())
    }

    pub fn extend(&mut self, other: ChangeLog) {
        self.entries.extend(other.entries);
    }

    /// Execute `cmd` and log the before/after values.
    pub fn apply(
        &mut self,
        cmd: &Command,
        doc: &mut Document,
    ) -> Result<ExecOutcome, ExecutionError> {
        let path = cmd.path();
        let old_value = summarize(path, doc.get(path));

        let result = execute(cmd, doc);
        let (new_value, outcome, warnings) = match &result {
            Ok(exec) => (
                summarize(path, doc.get(path)),
                ChangeOutcome::Applied,
                exec.warnings.clone(),
            ),
            Err(e) => (
                old_value.clone(),
                ChangeOutcome::Failed {
                    error: e.to_string(),
                },
                Vec::new(),
            ),
        };

        self.entries.push(ChangeLogEntry {
            key: path.to_string(),
            action: cmd.action().to_string(),
            old_value,
            new_value,
            outcome,
            warnings,
        });
        result
    }

    /// Log a command the pipeline refused.
    pub fn record_rejected(&mut self, rejected: &Rejected) {
        let field = |name: &str| {
            rejected
                .raw
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let key = match field("key") {
            k if k.is_empty() => rejected
                .errors
                .first()
                .map(|e| e.path.clone())
                .unwrap_or_default(),
            k => k,
        };

        self.entries.push(ChangeLogEntry {
            key,
            action: field("action"),
            old_value: Value::Null,
            new_value: rejected.raw.get("value").cloned().unwrap_or(Value::Null),
            outcome: ChangeOutcome::Rejected {
                errors: rejected.errors.clone(),
            },
            warnings: Vec::new(),
        });
    }

    /// Log a command left unexecuted by an abort.
    pub fn record_skipped(&mut self, cmd: &Command) {
        self.entries.push(ChangeLogEntry {
            key: cmd.path().to_string(),
            action: cmd.action().to_string(),
            old_value: Value::Null,
            new_value: Value::Null,
            outcome: ChangeOutcome::Skipped,
            warnings: Vec::new(),
        });
    }
}

impl fmt::Display for ChangeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{entry}")?;
        }
        Ok(())
    }
}
