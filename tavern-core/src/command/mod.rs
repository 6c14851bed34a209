//! Path-addressed mutation commands.
//!
//! Commands arrive from the AI as loose JSON ([`RawCommand`]). The pipeline
//! turns the ones that survive validation into typed [`Command`]s, and only
//! typed commands ever reach the interpreter.

pub mod changelog;
pub mod interpreter;
pub mod pipeline;

pub use changelog::{ChangeLog, ChangeLogEntry, ChangeOutcome};
pub use interpreter::{execute, merge, ExecOutcome, ExecutionError};
pub use pipeline::{prepare, Prepared, Rejected, ValidationError, ValidationResult};

use crate::document::Path;
use serde::{Deserialize, Serialize};
use serde_json::{json, Number, Value};
use std::fmt;
use std::str::FromStr;

/// The five mutation verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandAction {
    Set,
    Add,
    Push,
    Delete,
    Pull,
}

impl CommandAction {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandAction::Set => "set",
            CommandAction::Add => "add",
            CommandAction::Push => "push",
            CommandAction::Delete => "delete",
            CommandAction::Pull => "pull",
        }
    }
}

impl FromStr for CommandAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "set" => Ok(CommandAction::Set),
            "add" => Ok(CommandAction::Add),
            "push" => Ok(CommandAction::Push),
            "delete" => Ok(CommandAction::Delete),
            "pull" => Ok(CommandAction::Pull),
            other => Err(format!("unknown action '{other}'")),
        }
    }
}

impl fmt::Display for CommandAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated mutation. Each variant carries exactly what its action needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Set { path: Path, value: Value },
    Add { path: Path, amount: Number },
    Push { path: Path, value: Value },
    Delete { path: Path },
    Pull { path: Path, criteria: Value },
}

impl Command {
    pub fn set(path: Path, value: Value) -> Self {
        Command::Set { path, value }
    }

    pub fn action(&self) -> CommandAction {
        match self {
            Command::Set { .. } => CommandAction::Set,
            Command::Add { .. } => CommandAction::Add,
            Command::Push { .. } => CommandAction::Push,
            Command::Delete { .. } => CommandAction::Delete,
            Command::Pull { .. } => CommandAction::Pull,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Command::Set { path, .. }
            | Command::Add { path, .. }
            | Command::Push { path, .. }
            | Command::Delete { path }
            | Command::Pull { path, .. } => path,
        }
    }

    /// The payload as JSON (`null` for delete).
    pub fn value(&self) -> Value {
        match self {
            Command::Set { value, .. } | Command::Push { value, .. } => value.clone(),
            Command::Add { amount, .. } => Value::Number(amount.clone()),
            Command::Delete { .. } => Value::Null,
            Command::Pull { criteria, .. } => criteria.clone(),
        }
    }

    /// Back to the wire shape the AI uses.
    pub fn to_raw(&self) -> RawCommand {
        RawCommand {
            action: self.action().as_str().to_string(),
            key: self.path().to_string(),
            value: self.value(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action(), self.path())?;
        if !matches!(self, Command::Delete { .. }) {
            write!(f, " = {}", self.value())?;
        }
        Ok(())
    }
}

/// The untrusted wire shape: `{ "action", "key", "value" }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawCommand {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

impl RawCommand {
    pub fn new(action: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            action: action.into(),
            key: key.into(),
            value,
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "action": self.action, "key": self.key, "value": self.value })
    }
}

impl fmt::Display for RawCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{action: {:?}, key: {:?}, value: {}}}", self.action, self.key, self.value)
    }
}
