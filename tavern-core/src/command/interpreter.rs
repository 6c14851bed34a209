//! Applies a single [`Command`] to a [`Document`] in place.
//!
//! The interpreter trusts that the pipeline has already checked structure; the
//! errors it raises are the ones only visible against live state.

use super::Command;
use crate::document::path::{self, type_name, NavError};
use crate::document::{schema, Document, Path};
use crate::memory::{self, MemoryTier};
use serde_json::{json, Map, Number, Value};
use thiserror::Error;

/// A structurally valid command that could not be applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    #[error("cannot write {path}: {source}")]
    Navigation {
        path: String,
        #[source]
        source: NavError,
    },

    #[error("{path} holds {found}, not a number")]
    NotNumeric { path: String, found: &'static str },

    #[error("{path} holds {found}, not an array")]
    NotAnArray { path: String, found: &'static str },

    #[error("nothing at {path}")]
    MissingPath { path: String },

    #[error("adding {amount} to {path} overflows")]
    Overflow { path: String, amount: String },

    #[error("'{name}' is the player character and cannot be recorded as an NPC")]
    PlayerAsNpc { name: String },

    #[error("{path} addresses a whole domain")]
    DomainRoot { path: String },
}

/// Non-fatal notes produced while applying a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecOutcome {
    pub warnings: Vec<String>,
}

impl ExecOutcome {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "command applied with warning");
        self.warnings.push(message);
    }
}

/// Apply `cmd` to `doc`.
///
/// On error the document is unchanged for this command.
pub fn execute(cmd: &Command, doc: &mut Document) -> Result<ExecOutcome, ExecutionError> {
    let path = cmd.path();
    if path.is_domain_root() {
        return Err(ExecutionError::DomainRoot {
            path: path.to_string(),
        });
    }

    let short_before = short_term_snapshot(doc, path);

    let mut outcome = ExecOutcome::default();
    match cmd {
        Command::Set { path, value } => set(doc, path, value.clone(), &mut outcome)?,
        Command::Add { path, amount } => add(doc, path, amount, &mut outcome)?,
        Command::Push { path, value } => push(doc, path, value.clone())?,
        Command::Delete { path } => delete(doc, path, &mut outcome),
        Command::Pull { path, criteria } => pull(doc, path, criteria, &mut outcome)?,
    }

    if let Some(before) = short_before {
        let short = MemoryTier::Short;
        let direct = path.is_within(&short.path().to_string());
        if direct || memory::tier_len(doc, short) != memory::tier_len(doc, MemoryTier::ImplicitMid) {
            memory::pair_implicit(doc, &before);
        }
    }

    tracing::debug!(command = %cmd, "command applied");
    Ok(outcome)
}

/// Short-term memory as it stands, if `path` can change it.
fn short_term_snapshot(doc: &Document, path: &Path) -> Option<Vec<Value>> {
    let short = MemoryTier::Short.path();
    let touches = path.is_within(&short.to_string()) || short.is_within(&path.to_string());
    touches.then(|| memory::tier_values(doc, MemoryTier::Short))
}

/// Recursively merge `patch` into `base`, returning a new value.
///
/// Objects merge key by key; anything else in `patch` (arrays included)
/// replaces what was there. Arrays are never concatenated, so re-sending a list
/// can't grow it.
pub fn merge(base: &Value, patch: &Value) -> Value {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            let mut out = base_map.clone();
            for (key, patch_value) in patch_map {
                let merged = match base_map.get(key) {
                    Some(existing) => merge(existing, patch_value),
                    None => patch_value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => patch.clone(),
    }
}

fn slot<'a>(doc: &'a mut Document, path: &Path) -> Result<&'a mut Value, ExecutionError> {
    path::ensure_slot(doc.domain_mut(path.domain()), path.segments()).map_err(|source| {
        ExecutionError::Navigation {
            path: path.to_string(),
            source,
        }
    })
}

fn set(
    doc: &mut Document,
    path: &Path,
    mut value: Value,
    outcome: &mut ExecOutcome,
) -> Result<(), ExecutionError> {
    if schema::is_array_path(path) && !value.is_array() {
        outcome.warn(format!(
            "{path} must stay an array; {} replaced with []",
            type_name(&value)
        ));
        value = Value::Array(Vec::new());
    }

    if let Some(tier) = schema::memory_tier_for(path) {
        let clock = doc.clock();
        if let Value::Array(items) = &mut value {
            for item in items.iter_mut() {
                *item = memory::stamp_entry(item.take(), tier, &clock);
            }
        }
    }

    if let Some(name) = schema::npc_record_name(path) {
        let merged = match doc.get(path) {
            Some(existing) if existing.is_object() && value.is_object() => merge(existing, &value),
            _ => value,
        };
        value = repair_npc(&name, merged, doc.player_name(), outcome)?;
        *slot(doc, path)? = value;
        return Ok(());
    }

    let guarded = schema::is_guarded(path);
    let target = slot(doc, path)?;
    if guarded && value.is_object() && target.is_object() {
        *target = merge(target, &value);
    } else {
        *target = value;
    }
    Ok(())
}

/// Coerce an NPC record into shape: name, relation, affinity, memories.
fn repair_npc(
    key_name: &str,
    value: Value,
    player_name: Option<&str>,
    outcome: &mut ExecOutcome,
) -> Result<Value, ExecutionError> {
    let mut record = match value {
        Value::Object(map) => map,
        Value::String(relation) => {
            outcome.warn(format!("NPC '{key_name}' given as a string; wrapped into a record"));
            let mut map = Map::new();
            map.insert("关系".into(), Value::String(relation));
            map
        }
        other => {
            outcome.warn(format!(
                "NPC '{key_name}' given as {}; replaced with an empty record",
                type_name(&other)
            ));
            Map::new()
        }
    };

    let name = match record.get(schema::keys::NAME).and_then(Value::as_str) {
        Some(n) if !n.trim().is_empty() => n.trim().to_string(),
        _ => key_name.to_string(),
    };
    if let Some(player) = player_name {
        if name == player || key_name == player {
            return Err(ExecutionError::PlayerAsNpc { name });
        }
    }
    record.insert(schema::keys::NAME.into(), Value::String(name));

    record
        .entry("关系")
        .or_insert_with(|| Value::String("陌生".into()));

    let affinity = match record.get(schema::keys::AFFINITY) {
        Some(Value::Number(n)) => Value::Number(n.clone()),
        Some(Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| json!(0)),
        _ => json!(0),
    };
    record.insert(schema::keys::AFFINITY.into(), affinity);

    match record.get(schema::keys::MEMORY) {
        Some(Value::Array(_)) => {}
        Some(Value::String(s)) if !s.is_empty() => {
            let single = Value::Array(vec![Value::String(s.clone())]);
            record.insert(schema::keys::MEMORY.into(), single);
        }
        _ => {
            record.insert(schema::keys::MEMORY.into(), Value::Array(Vec::new()));
        }
    }

    Ok(Value::Object(record))
}

/// Integer-preserving addition.
pub(crate) fn add_numbers(a: &Number, b: &Number) -> Option<Number> {
    match (a.as_i64(), b.as_i64()) {
        (Some(x), Some(y)) => x.checked_add(y).map(Number::from),
        _ => Number::from_f64(a.as_f64()? + b.as_f64()?),
    }
}

fn clamp_to_floor(n: Number, floor: f64) -> Number {
    if n.as_f64().is_some_and(|v| v < floor) {
        if floor.fract() == 0.0 {
            Number::from(floor as i64)
        } else {
            Number::from_f64(floor).unwrap_or(n)
        }
    } else {
        n
    }
}

/// `path`'s current value plus `amount`, clamped to its floor.
fn sum_at(
    doc: &Document,
    path: &Path,
    amount: &Number,
    outcome: &mut ExecOutcome,
) -> Result<Number, ExecutionError> {
    let current = match doc.get(path) {
        None | Some(Value::Null) => Number::from(0),
        Some(Value::Number(n)) => n.clone(),
        Some(other) => {
            return Err(ExecutionError::NotNumeric {
                path: path.to_string(),
                found: type_name(other),
            })
        }
    };

    let next = add_numbers(&current, amount).ok_or_else(|| ExecutionError::Overflow {
        path: path.to_string(),
        amount: amount.to_string(),
    })?;

    if let Some(floor) = schema::floor_for(path) {
        let clamped = clamp_to_floor(next.clone(), floor);
        if clamped != next {
            outcome.warn(format!("{path} would drop to {next}; clamped to {clamped}"));
            return Ok(clamped);
        }
    }
    Ok(next)
}

fn add(
    doc: &mut Document,
    path: &Path,
    amount: &Number,
    outcome: &mut ExecOutcome,
) -> Result<(), ExecutionError> {
    let next = sum_at(doc, path, amount, outcome)?;

    // Gains also count towards the mirror; both sums are checked before
    // either is written.
    let mirrored = match schema::mirror_for(path) {
        Some(target) if amount.as_f64().is_some_and(|v| v > 0.0) => {
            let total = sum_at(doc, &target, amount, outcome)?;
            Some((target, total))
        }
        _ => None,
    };

    let previous = doc.get(path).cloned();
    *slot(doc, path)? = Value::Number(next);

    if let Some((target, total)) = mirrored {
        match slot(doc, &target) {
            Ok(mirror) => *mirror = Value::Number(total),
            Err(e) => {
                restore(doc, path, previous);
                return Err(e);
            }
        }
    }
    Ok(())
}

/// Put `previous` back at `path`, removing the slot if there was none.
fn restore(doc: &mut Document, path: &Path, previous: Option<Value>) {
    match previous {
        Some(value) => {
            if let Some(target) = doc.get_mut(path) {
                *target = value;
            }
        }
        None => {
            path::remove(doc.domain_mut(path.domain()), path.segments());
        }
    }
}

fn push(doc: &mut Document, path: &Path, value: Value) -> Result<(), ExecutionError> {
    let value = match schema::memory_tier_for(path) {
        Some(tier) => memory::stamp_entry(value, tier, &doc.clock()),
        None => value,
    };

    let target = slot(doc, path)?;
    if target.is_null() {
        *target = Value::Array(Vec::new());
    }
    match target {
        Value::Array(items) => {
            items.push(value);
            Ok(())
        }
        other => Err(ExecutionError::NotAnArray {
            path: path.to_string(),
            found: type_name(other),
        }),
    }
}

fn delete(doc: &mut Document, path: &Path, outcome: &mut ExecOutcome) {
    if schema::is_array_path(path) {
        outcome.warn(format!("{path} must stay an array; cleared instead of deleted"));
        if let Some(target) = doc.get_mut(path) {
            *target = Value::Array(Vec::new());
        }
        return;
    }

    if path::remove(doc.domain_mut(path.domain()), path.segments()).is_none() {
        outcome.warn(format!("{path} did not exist; nothing deleted"));
    }
}

/// Fields used to identify a structured element when criteria is a bare value.
const IDENTITY_FIELDS: &[&str] = &["名称", "名字", "id", "ID", "物品ID"];

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn matches_criteria(element: &Value, criteria: &Value) -> bool {
    match (element, criteria) {
        (Value::Object(fields), Value::Object(wanted)) => wanted
            .iter()
            .all(|(k, v)| fields.get(k).is_some_and(|have| values_equal(have, v))),
        (Value::Object(fields), scalar) => IDENTITY_FIELDS
            .iter()
            .any(|k| fields.get(*k).is_some_and(|have| values_equal(have, scalar))),
        (element, criteria) => values_equal(element, criteria),
    }
}

fn pull(
    doc: &mut Document,
    path: &Path,
    criteria: &Value,
    outcome: &mut ExecOutcome,
) -> Result<(), ExecutionError> {
    match doc.get_mut(path) {
        None => Err(ExecutionError::MissingPath {
            path: path.to_string(),
        }),
        Some(Value::Array(items)) => {
            match items.iter().position(|e| matches_criteria(e, criteria)) {
                Some(index) => {
                    items.remove(index);
                }
                None => outcome.warn(format!("no element of {path} matched {criteria}")),
            }
            Ok(())
        }
        Some(other) => Err(ExecutionError::NotAnArray {
            path: path.to_string(),
            found: type_name(other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn doc_with_player(name: &str) -> Document {
        let mut doc = Document::default();
        doc.actor
            .insert("身份".into(), json!({"名字": name, "出身": "散修"}));
        doc
    }

    #[test]
    fn test_set_plain_path() {
        let mut doc = Document::default();
        execute(&Command::set(p("世界.地点.当前"), json!("青云山")), &mut doc).unwrap();
        assert_eq!(doc.get(&p("世界.地点.当前")), Some(&json!("青云山")));
    }

    #[test]
    fn test_set_guarded_merges_objects_but_replaces_arrays() {
        let mut doc = doc_with_player("叶凡");
        doc.actor.insert(
            "属性".into(),
            json!({"声望": 5, "标签": ["a", "b"], "气血": {"当前": 10, "上限": 20}}),
        );

        let patch = json!({"标签": ["c"], "气血": {"当前": 15}});
        execute(&Command::set(p("角色.属性"), patch), &mut doc).unwrap();

        assert_eq!(
            doc.get(&p("角色.属性")),
            Some(&json!({"声望": 5, "标签": ["c"], "气血": {"当前": 15, "上限": 20}}))
        );
    }

    #[test]
    fn test_set_unguarded_object_replaces() {
        let mut doc = Document::default();
        doc.world.insert("地点".into(), json!({"当前": "a", "上一个": "b"}));
        execute(&Command::set(p("世界.地点"), json!({"当前": "c"})), &mut doc).unwrap();
        assert_eq!(doc.get(&p("世界.地点")), Some(&json!({"当前": "c"})));
    }

    #[test]
    fn test_merge_is_pure() {
        let base = json!({"a": {"b": 1}, "list": [1, 2]});
        let patch = json!({"a": {"c": 2}, "list": [3]});
        let merged = merge(&base, &patch);
        assert_eq!(merged, json!({"a": {"b": 1, "c": 2}, "list": [3]}));
        assert_eq!(base, json!({"a": {"b": 1}, "list": [1, 2]}));
    }

    #[test]
    fn test_set_array_path_downgrades_null() {
        let mut doc = Document::default();
        let out = execute(&Command::set(p("角色.任务"), Value::Null), &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.任务")), Some(&json!([])));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_set_npc_repairs_record() {
        let mut doc = doc_with_player("叶凡");
        execute(
            &Command::set(p("社交.关系.林婉儿"), json!({"好感度": "12"})),
            &mut doc,
        )
        .unwrap();
        assert_eq!(
            doc.get(&p("社交.关系.林婉儿")),
            Some(&json!({"名字": "林婉儿", "关系": "陌生", "好感度": 12, "记忆": []}))
        );
    }

    #[test]
    fn test_set_npc_merges_existing_memories() {
        let mut doc = doc_with_player("叶凡");
        doc.social.insert(
            "关系".into(),
            json!({"林婉儿": {"名字": "林婉儿", "关系": "同门", "好感度": 5, "记忆": ["初遇"]}}),
        );
        execute(
            &Command::set(p("社交.关系.林婉儿"), json!({"好感度": 8})),
            &mut doc,
        )
        .unwrap();
        let npc = doc.get(&p("社交.关系.林婉儿")).unwrap();
        assert_eq!(npc["好感度"], 8);
        assert_eq!(npc["记忆"], json!(["初遇"]));
        assert_eq!(npc["关系"], "同门");
    }

    #[test]
    fn test_set_npc_refuses_player_name() {
        let mut doc = doc_with_player("叶凡");
        let before = doc.clone();
        let err = execute(&Command::set(p("社交.关系.叶凡"), json!({})), &mut doc).unwrap_err();
        assert_eq!(err, ExecutionError::PlayerAsNpc { name: "叶凡".into() });
        assert_eq!(doc, before);

        let err = execute(
            &Command::set(p("社交.关系.某人"), json!({"名字": "叶凡"})),
            &mut doc,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::PlayerAsNpc { .. }));
    }

    #[test]
    fn test_add_accumulates_integers() {
        let mut doc = Document::default();
        doc.actor.insert("属性".into(), json!({"声望": 5}));
        let cmd = Command::Add {
            path: p("角色.属性.声望"),
            amount: Number::from(10),
        };
        execute(&cmd, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.属性.声望")), Some(&json!(15)));
    }

    #[test]
    fn test_add_missing_starts_from_zero_and_mixes_floats() {
        let mut doc = Document::default();
        let cmd = Command::Add {
            path: p("角色.属性.悟性"),
            amount: Number::from_f64(1.5).unwrap(),
        };
        execute(&cmd, &mut doc).unwrap();
        execute(&cmd, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.属性.悟性")), Some(&json!(3.0)));
    }

    #[test]
    fn test_add_clamps_currency_floor() {
        let mut doc = Document::default();
        execute(
            &Command::set(p("角色.背包.灵石.下品"), json!(30)),
            &mut doc,
        )
        .unwrap();
        let out = execute(
            &Command::Add {
                path: p("角色.背包.灵石.下品"),
                amount: Number::from(-50),
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(doc.get(&p("角色.背包.灵石.下品")), Some(&json!(0)));
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_add_reputation_may_go_negative() {
        let mut doc = Document::default();
        execute(
            &Command::Add {
                path: p("角色.属性.声望"),
                amount: Number::from(-3),
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(doc.get(&p("角色.属性.声望")), Some(&json!(-3)));
    }

    #[test]
    fn test_add_mirrors_total_experience() {
        let mut doc = Document::default();
        doc.actor
            .insert("修炼".into(), json!({"当前经验": 10, "累计经验": 100}));
        let gain = Command::Add {
            path: p("角色.修炼.当前经验"),
            amount: Number::from(25),
        };
        execute(&gain, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.修炼.当前经验")), Some(&json!(35)));
        assert_eq!(doc.get(&p("角色.修炼.累计经验")), Some(&json!(125)));

        let spend = Command::Add {
            path: p("角色.修炼.当前经验"),
            amount: Number::from(-30),
        };
        execute(&spend, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.修炼.当前经验")), Some(&json!(5)));
        assert_eq!(doc.get(&p("角色.修炼.累计经验")), Some(&json!(125)));
    }

    #[test]
    fn test_add_with_unreadable_mirror_changes_nothing() {
        let mut doc = Document::default();
        doc.actor
            .insert("修炼".into(), json!({"当前经验": 10, "累计经验": "很多"}));
        let before = doc.clone();

        let err = execute(
            &Command::Add {
                path: p("角色.修炼.当前经验"),
                amount: Number::from(5),
            },
            &mut doc,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::NotNumeric {
                path: "角色.修炼.累计经验".into(),
                found: "string"
            }
        );
        assert_eq!(doc, before);
    }

    #[test]
    fn test_add_on_string_fails_without_change() {
        let mut doc = Document::default();
        doc.actor.insert("属性".into(), json!({"境界": "筑基"}));
        let before = doc.clone();
        let err = execute(
            &Command::Add {
                path: p("角色.属性.境界"),
                amount: Number::from(1),
            },
            &mut doc,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::NotNumeric { found: "string", .. }));
        assert_eq!(doc, before);
    }

    #[test]
    fn test_push_autovivifies() {
        let mut doc = Document::default();
        execute(
            &Command::Push {
                path: p("世界.传闻"),
                value: json!("魔门异动"),
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(doc.get(&p("世界.传闻")), Some(&json!(["魔门异动"])));
    }

    #[test]
    fn test_push_stamps_memory_but_not_implicit_mid() {
        let mut doc = Document::default();
        doc.set_clock(crate::clock::ClockTime::new(1000, 2, 3, 4, 5));

        execute(
            &Command::Push {
                path: p("社交.记忆.短期记忆"),
                value: json!("hello"),
            },
            &mut doc,
        )
        .unwrap();
        execute(
            &Command::Push {
                path: p("社交.记忆.隐式中期记忆"),
                value: json!("hint"),
            },
            &mut doc,
        )
        .unwrap();

        let short = &doc.get(&p("社交.记忆.短期记忆")).unwrap()[0];
        assert_eq!(short["内容"], "hello");
        assert_eq!(short["时间"]["月"], 2);

        let implicit = doc.get(&p("社交.记忆.隐式中期记忆")).unwrap();
        assert_eq!(implicit[0]["内容"], "hello");
        assert_eq!(implicit[1]["内容"], "hint");
        assert!(implicit[1].get("时间").is_none());
    }

    fn short_and_implicit(doc: &Document) -> (Vec<String>, Vec<String>) {
        let contents = |tier| {
            memory::read_tier(doc, tier)
                .into_iter()
                .map(|e| e.content)
                .collect::<Vec<_>>()
        };
        (contents(MemoryTier::Short), contents(MemoryTier::ImplicitMid))
    }

    #[test]
    fn test_short_term_writes_keep_implicit_paired() {
        let mut doc = Document::default();
        doc.social.insert(
            "记忆".into(),
            json!({
                "短期记忆": [{"内容": "t0"}, {"内容": "t1"}],
                "隐式中期记忆": [{"内容": "h0"}, {"内容": "h1"}]
            }),
        );

        let push = Command::Push {
            path: p("社交.记忆.短期记忆"),
            value: json!("传闻四起"),
        };
        execute(&push, &mut doc).unwrap();
        assert_eq!(
            short_and_implicit(&doc),
            (
                vec!["t0".into(), "t1".into(), "传闻四起".into()],
                vec!["h0".into(), "h1".into(), "传闻四起".into()]
            )
        );

        let pull = Command::Pull {
            path: p("社交.记忆.短期记忆"),
            criteria: json!({"内容": "t0"}),
        };
        execute(&pull, &mut doc).unwrap();
        let (short, implicit) = short_and_implicit(&doc);
        assert_eq!(short, vec!["t1", "传闻四起"]);
        assert_eq!(implicit, vec!["h1", "传闻四起"]);

        execute(&Command::Delete { path: p("社交.记忆.短期记忆.0") }, &mut doc).unwrap();
        assert_eq!(short_and_implicit(&doc).1, vec!["传闻四起"]);

        execute(&Command::Delete { path: p("社交.记忆.短期记忆") }, &mut doc).unwrap();
        assert_eq!(short_and_implicit(&doc), (vec![], vec![]));
    }

    #[test]
    fn test_long_short_term_push_gets_truncated_placeholder() {
        let mut doc = Document::default();
        let text = "字".repeat(memory::FALLBACK_CHARS + 10);
        execute(
            &Command::Push {
                path: p("社交.记忆.短期记忆"),
                value: json!(text),
            },
            &mut doc,
        )
        .unwrap();
        let implicit = memory::read_tier(&doc, MemoryTier::ImplicitMid);
        assert_eq!(implicit[0].content.chars().count(), memory::FALLBACK_CHARS);
    }

    #[test]
    fn test_push_onto_scalar_fails() {
        let mut doc = Document::default();
        doc.world.insert("传闻".into(), json!("x"));
        let err = execute(
            &Command::Push {
                path: p("世界.传闻"),
                value: json!("y"),
            },
            &mut doc,
        )
        .unwrap_err();
        assert!(matches!(err, ExecutionError::NotAnArray { .. }));
    }

    #[test]
    fn test_delete() {
        let mut doc = doc_with_player("叶凡");
        execute(&Command::Delete { path: p("角色.身份.出身") }, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.身份")), Some(&json!({"名字": "叶凡"})));

        let out = execute(&Command::Delete { path: p("角色.身份.出身") }, &mut doc).unwrap();
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn test_delete_array_path_clears() {
        let mut doc = Document::default();
        doc.actor.insert("任务".into(), json!([{"名称": "a"}]));
        execute(&Command::Delete { path: p("角色.任务") }, &mut doc).unwrap();
        assert_eq!(doc.get(&p("角色.任务")), Some(&json!([])));
    }

    #[test]
    fn test_pull_first_matching_element() {
        let mut doc = Document::default();
        doc.actor.insert(
            "任务".into(),
            json!([
                {"名称": "寻找灵草", "状态": "进行中"},
                {"名称": "护送商队", "状态": "进行中"},
                {"名称": "寻找灵草", "状态": "已完成"}
            ]),
        );
        execute(
            &Command::Pull {
                path: p("角色.任务"),
                criteria: json!({"名称": "寻找灵草"}),
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(
            doc.get(&p("角色.任务")),
            Some(&json!([
                {"名称": "护送商队", "状态": "进行中"},
                {"名称": "寻找灵草", "状态": "已完成"}
            ]))
        );

        execute(
            &Command::Pull {
                path: p("角色.任务"),
                criteria: json!("护送商队"),
            },
            &mut doc,
        )
        .unwrap();
        assert_eq!(doc.get(&p("角色.任务")).unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_pull_missing_array_is_execution_error() {
        let mut doc = Document::default();
        let err = execute(
            &Command::Pull {
                path: p("世界.不存在"),
                criteria: json!({"a": 1}),
            },
            &mut doc,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ExecutionError::MissingPath {
                path: "世界.不存在".into()
            }
        );
    }

    #[test]
    fn test_domain_root_rejected() {
        let mut doc = Document::default();
        let cmd = Command::Delete {
            path: Path::new(crate::document::Domain::Actor, vec![]),
        };
        assert!(matches!(
            execute(&cmd, &mut doc),
            Err(ExecutionError::DomainRoot { .. })
        ));
    }

    #[test]
    fn test_memory_tier_set_normalizes_entries() {
        let mut doc = Document::default();
        execute(
            &Command::set(p("社交.记忆.长期记忆"), json!(["旧事"])),
            &mut doc,
        )
        .unwrap();
        let entry = &doc.get(&p("社交.记忆.长期记忆")).unwrap()[0];
        assert_eq!(entry["内容"], "旧事");
        assert!(entry.get("时间").is_some());
    }
}
