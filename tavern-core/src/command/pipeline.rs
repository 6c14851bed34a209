//! Turning untrusted AI command lists into an ordered batch of [`Command`]s.
//!
//! Four stages, each a plain function:
//!
//! 1. **Normalize**: fix recognizable key shorthands, tidy actions, coerce
//!    numeric strings and expand the old bulk `{"state": {...}}` shape.
//! 2. **Validate**: reject anything structurally unusable, with a diagnostic.
//! 3. **Repair**: rewrite known generator mistakes into the intended shape.
//! 4. **Order**: capacities before the values that depend on them.
//!
//! Nothing here mutates the document.

use super::{Command, CommandAction, RawCommand};
use crate::document::path::type_name;
use crate::document::{schema, Document, Path};
use lazy_static::lazy_static;
use serde::Serialize;
use serde_json::{json, Map, Number, Value};
use std::collections::HashMap;
use std::fmt;

/// Why one command was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Outcome of validating a command or a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            ..Self::default()
        }
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.valid = false;
        self.errors.push(ValidationError::new(path, message));
    }

    fn warn(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }

    /// Fold another result into this one.
    pub fn absorb(&mut self, other: ValidationResult) {
        self.valid &= other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }
}

/// A command refused before execution, with the value the AI actually sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub raw: Value,
    pub errors: Vec<ValidationError>,
}

/// A prepared batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prepared {
    /// Ready to execute, in order.
    pub commands: Vec<Command>,
    pub rejected: Vec<Rejected>,
    pub warnings: Vec<String>,
}

impl Prepared {
    /// The batch-level [`ValidationResult`].
    pub fn result(&self) -> ValidationResult {
        ValidationResult {
            valid: self.rejected.is_empty(),
            errors: self
                .rejected
                .iter()
                .flat_map(|r| r.errors.iter().cloned())
                .collect(),
            warnings: self.warnings.clone(),
        }
    }
}

/// Run all four stages over `raw`.
///
/// `doc` is only read, to check that `add`/`push`/`pull` targets have a
/// compatible type.
pub fn prepare(raw: &[Value], doc: &Document) -> Prepared {
    let mut prepared = Prepared::default();

    for original in raw {
        let (normalized, mut result) = normalize(original);

        let mut commands = Vec::new();
        for cmd in &normalized {
            let (checked, check) = validate(cmd, doc);
            result.absorb(check);
            if let Some(cmd) = checked {
                commands.push(cmd);
            }
        }

        if result.valid {
            let mut repaired = Vec::new();
            for cmd in commands {
                let (out, repair_result) = repair(cmd);
                result.absorb(repair_result);
                repaired.extend(out);
            }
            commands = repaired;
        }

        prepared.warnings.extend(result.warnings);
        if result.valid {
            prepared.commands.extend(commands);
        } else {
            tracing::warn!(
                command = %original,
                errors = result.errors.len(),
                "AI command rejected"
            );
            prepared.rejected.push(Rejected {
                raw: original.clone(),
                errors: result.errors,
            });
        }
    }

    order(&mut prepared.commands);
    prepared
}

// ----------------------------------------------------------------------------
// Stage 1: normalization
// ----------------------------------------------------------------------------

lazy_static! {
    /// Bare leading segments the AI uses in place of a full path.
    static ref KEY_REWRITES: HashMap<&'static str, &'static str> = HashMap::from([
        ("短期记忆", "社交.记忆.短期记忆"),
        ("中期记忆", "社交.记忆.中期记忆"),
        ("长期记忆", "社交.记忆.长期记忆"),
        ("隐式中期记忆", "社交.记忆.隐式中期记忆"),
        ("记忆", "社交.记忆"),
        ("背包", "角色.背包"),
        ("属性", "角色.属性"),
        ("身份", "角色.身份"),
        ("修炼", "角色.修炼"),
        ("功法", "角色.功法"),
        ("任务列表", "角色.任务"),
        ("角色基础信息", "角色.身份"),
        ("玩家角色状态", "角色.属性"),
        ("人物关系", "社交.关系"),
        ("游戏时间", "世界.时间"),
        ("事件系统", "世界.事件"),
    ]);

    static ref ACTION_SYNONYMS: HashMap<&'static str, &'static str> = HashMap::from([
        ("append", "push"),
        ("remove", "delete"),
        ("increment", "add"),
    ]);
}

/// Rewrite a recognizable shorthand key to its canonical path.
pub fn rewrite_key(key: &str) -> Option<String> {
    let (head, rest) = match key.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (key, None),
    };
    let canonical = KEY_REWRITES.get(head)?;
    Some(match rest {
        Some(rest) => format!("{canonical}.{rest}"),
        None => canonical.to_string(),
    })
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> String {
    names
        .iter()
        .find_map(|n| map.get(*n))
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .unwrap_or_default()
}

fn normalize(original: &Value) -> (Vec<RawCommand>, ValidationResult) {
    let mut result = ValidationResult::ok();

    let Value::Object(map) = original else {
        result.error("", format!("command must be an object, got {}", type_name(original)));
        return (Vec::new(), result);
    };

    let mut action = string_field(map, &["action", "op"]).to_lowercase();
    let key = string_field(map, &["key", "path"]);

    // Deprecated bulk shape: { "state": { "<path>": <value>, ... } }
    if let Some(Value::Object(state)) = map.get("state") {
        if key.is_empty() && (action.is_empty() || action == "set") {
            result.warn(format!(
                "bulk state command expanded into {} set commands",
                state.len()
            ));
            let expanded = state
                .iter()
                .map(|(k, v)| normalize_one(RawCommand::new("set", k.trim(), v.clone()), &mut result))
                .collect();
            return (expanded, result);
        }
    }

    if let Some(canonical) = ACTION_SYNONYMS.get(action.as_str()) {
        result.warn(format!("action '{action}' read as '{canonical}'"));
        action = canonical.to_string();
    }

    let value = map.get("value").cloned().unwrap_or(Value::Null);
    let cmd = normalize_one(RawCommand::new(action, key, value), &mut result);
    (vec![cmd], result)
}

fn normalize_one(mut cmd: RawCommand, result: &mut ValidationResult) -> RawCommand {
    if let Some(canonical) = rewrite_key(&cmd.key) {
        result.warn(format!("key '{}' rewritten to '{canonical}'", cmd.key));
        cmd.key = canonical;
    }

    if cmd.action == "add" {
        if let Value::String(s) = &cmd.value {
            if let Some(n) = parse_number(s) {
                result.warn(format!("{}: numeric string \"{s}\" read as {n}", cmd.key));
                cmd.value = Value::Number(n);
            }
        }
    }
    cmd
}

fn parse_number(s: &str) -> Option<Number> {
    let s = s.trim().trim_start_matches('+');
    if let Ok(i) = s.parse::<i64>() {
        return Some(Number::from(i));
    }
    s.parse::<f64>().ok().and_then(Number::from_f64)
}

// ----------------------------------------------------------------------------
// Stage 2: structural validation
// ----------------------------------------------------------------------------

/// Check one normalized command against the document's current shape.
pub fn validate(cmd: &RawCommand, doc: &Document) -> (Option<Command>, ValidationResult) {
    let mut result = ValidationResult::ok();

    if cmd.action.is_empty() {
        result.error(&cmd.key, "missing action");
    }
    if cmd.key.is_empty() {
        result.error("", "missing key");
    }
    if !result.valid {
        return (None, result);
    }

    let action = match cmd.action.parse::<CommandAction>() {
        Ok(action) => action,
        Err(message) => {
            result.error(&cmd.key, message);
            return (None, result);
        }
    };

    let path = match Path::parse(&cmd.key) {
        Ok(path) => path,
        Err(e) => {
            result.error(&cmd.key, e.to_string());
            return (None, result);
        }
    };
    if path.is_domain_root() {
        result.error(&cmd.key, "cannot address a whole domain");
        return (None, result);
    }

    let current = doc.get(&path);
    let key = path.to_string();
    let command = match action {
        CommandAction::Set => Some(Command::Set {
            path,
            value: cmd.value.clone(),
        }),
        CommandAction::Delete => Some(Command::Delete { path }),
        CommandAction::Add => {
            let amount = match &cmd.value {
                Value::Number(n) => Some(n.clone()),
                other => {
                    result.error(&key, format!("add needs a number, got {}", type_name(other)));
                    None
                }
            };
            if let Some(found) = current.filter(|v| !v.is_number() && !v.is_null()) {
                result.error(&key, format!("add target holds {}, not a number", type_name(found)));
            }
            amount.filter(|_| result.valid).map(|amount| Command::Add { path, amount })
        }
        // Item pushes become keyed sets during repair, so the collection
        // being an object is expected.
        CommandAction::Push if schema::is_item_collection(&path) => Some(Command::Push {
            path,
            value: cmd.value.clone(),
        }),
        CommandAction::Push => {
            if let Some(found) = current.filter(|v| !v.is_array() && !v.is_null()) {
                result.error(&key, format!("push target holds {}, not an array", type_name(found)));
                None
            } else {
                Some(Command::Push {
                    path,
                    value: cmd.value.clone(),
                })
            }
        }
        CommandAction::Pull => {
            if let Some(found) = current.filter(|v| !v.is_array()) {
                result.error(&key, format!("pull target holds {}, not an array", type_name(found)));
            }
            if cmd.value.is_null() || cmd.value.is_array() {
                result.error(
                    &key,
                    format!("pull needs an object or scalar to match, got {}", type_name(&cmd.value)),
                );
            }
            result.valid.then(|| Command::Pull {
                path,
                criteria: cmd.value.clone(),
            })
        }
    };

    (command, result)
}

// ----------------------------------------------------------------------------
// Stage 3: domain-specific repair
// ----------------------------------------------------------------------------

fn item_id(item: &Value) -> Option<String> {
    match item.get(schema::keys::ITEM_ID)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Commands that write one item into its keyed slot.
fn keyed_item_sets(collection: &Path, items: Vec<Value>, result: &mut ValidationResult) -> Vec<Command> {
    let mut out = Vec::new();
    for item in items {
        match item_id(&item) {
            Some(id) => out.push(Command::set(collection.child(id), item)),
            None => result.error(
                collection.to_string(),
                format!("item has no {}: {item}", schema::keys::ITEM_ID),
            ),
        }
    }
    out
}

fn default_skill(technique: &Map<String, Value>, id: &str) -> Value {
    let name = technique
        .get("名称")
        .and_then(Value::as_str)
        .unwrap_or(id);
    json!({ "名称": name, "描述": "", "消耗": 0 })
}

/// Give a technique object at least one skill.
fn backfill_skills(technique: &mut Value, id: &str, result: &mut ValidationResult) {
    let Value::Object(map) = technique else {
        return;
    };
    let has_skills = map
        .get(schema::keys::SKILLS)
        .and_then(Value::as_array)
        .is_some_and(|skills| !skills.is_empty());
    if !has_skills {
        let skill = default_skill(map, id);
        map.insert(schema::keys::SKILLS.into(), Value::Array(vec![skill]));
        result.warn(format!("角色.功法.{id}: missing {} backfilled", schema::keys::SKILLS));
    }
}

fn repair(cmd: Command) -> (Vec<Command>, ValidationResult) {
    let mut result = ValidationResult::ok();

    let out = match cmd {
        // An item written at the collection root instead of under its id.
        Command::Set { path, value } if schema::is_item_collection(&path) => match value {
            Value::Object(_) if item_id(&value).is_some() => {
                result.warn(format!("item set at {path} moved under its {}", schema::keys::ITEM_ID));
                keyed_item_sets(&path, vec![value], &mut result)
            }
            Value::Array(items) => {
                result.warn(format!("item list at {path} split into keyed sets"));
                keyed_item_sets(&path, items, &mut result)
            }
            value => vec![Command::Set { path, value }],
        },
        Command::Push { path, value } if schema::is_item_collection(&path) => {
            result.warn(format!("push to {path} rewritten as a keyed set"));
            keyed_item_sets(&path, vec![value], &mut result)
        }

        Command::Set { path, mut value } if schema::technique_id(&path).is_some() => {
            let id = schema::technique_id(&path).unwrap_or_default();
            backfill_skills(&mut value, &id, &mut result);
            vec![Command::Set { path, value }]
        }
        Command::Set { path, mut value } if path.matches("角色.功法") => {
            if let Value::Object(techniques) = &mut value {
                for (id, technique) in techniques.iter_mut() {
                    backfill_skills(technique, id, &mut result);
                }
            }
            vec![Command::Set { path, value }]
        }

        other => vec![other],
    };

    (out, result)
}

// ----------------------------------------------------------------------------
// Stage 4: ordering
// ----------------------------------------------------------------------------

fn sets_upper_bound(cmd: &Command) -> bool {
    matches!(cmd, Command::Set { .. } | Command::Add { .. }) && schema::is_upper_bound(cmd.path())
}

/// Move capacity writes ahead of everything else, keeping relative order.
pub fn order(commands: &mut [Command]) {
    commands.sort_by_key(|cmd| if sets_upper_bound(cmd) { 0 } else { 1 });
}
