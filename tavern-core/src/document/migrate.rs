//! Loading any save shape the game has ever written.
//!
//! Three generations exist:
//!
//! - **v1** is flat: `角色基础信息`, `背包`, `记忆` and friends at the top level.
//! - **v2** has the five domains but older inner shapes: relations as an
//!   array, memories as bare strings, currency as a single number, no
//!   implicit mid-term tier.
//! - **v3** is the canonical [`Document`].
//!
//! [`migrate`] is total. It never fails; anything it cannot place or repair is
//! noted in the [`MigrationReport`] and replaced with a sensible default.
//! Running it on its own output changes nothing.

use super::schema::{self, keys, CURRENCY_GRADES, SCHEMA_VERSION};
use super::{Document, Domain};
use crate::clock::ClockTime;
use crate::memory::{self, normalize_entry, MemoryTier};
use serde::Serialize;
use serde_json::{json, Map, Value};

/// Top-level keys that only appear in flat v1 saves.
const LEGACY_KEYS: &[&str] = &[
    "角色基础信息",
    "玩家角色状态",
    "背包",
    "功法",
    "人物关系",
    "记忆",
    "游戏时间",
    "任务列表",
    "世界信息",
    "事件系统",
    "系统设置",
];

/// Keys that only carry instructions for the AI.
const HINT_KEYS: &[&str] = &["AI提示", "说明提示"];

/// Fields of `玩家角色状态` that belong under `角色.修炼`.
const CULTIVATION_FIELDS: &[&str] = &["境界", "当前经验", "经验上限", "累计经验"];

/// What migration did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    /// Detected schema version of the input (0 when unreadable).
    pub from_version: u64,
    pub warnings: Vec<String>,
    /// Number of authoring-hint keys removed.
    pub stripped_hints: usize,
}

impl MigrationReport {
    fn warn(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(warning = %message, "save migration");
        self.warnings.push(message);
    }

    pub fn changed_version(&self) -> bool {
        self.from_version != SCHEMA_VERSION
    }
}

/// Convert any known save shape into a canonical schema-3 document.
pub fn migrate(raw: Value) -> (Document, MigrationReport) {
    let mut report = MigrationReport::default();

    let Value::Object(mut root) = raw else {
        report.warn(format!(
            "save is {}, not an object; starting from an empty document",
            super::path::type_name(&raw)
        ));
        return (Document::default(), report);
    };

    report.stripped_hints = strip_hints(&mut root);

    let is_v1 = LEGACY_KEYS.iter().any(|k| root.contains_key(*k))
        || !Domain::ALL.iter().any(|d| root.contains_key(d.key()));

    let mut doc = empty_document();
    if is_v1 {
        report.from_version = 1;
        lift_v1(root, &mut doc, &mut report);
    } else {
        report.from_version = root
            .get(Domain::Meta.key())
            .and_then(|m| m.get(keys::VERSION))
            .and_then(Value::as_u64)
            .unwrap_or(2);
        place_domains(root, &mut doc, &mut report);
    }

    normalize_actor(&mut doc, &mut report);
    normalize_relations(&mut doc, &mut report);
    normalize_memory(&mut doc, &mut report);
    normalize_world(&mut doc, &mut report);

    doc.meta
        .insert(keys::VERSION.into(), json!(SCHEMA_VERSION));
    schema::fill_skeleton(&mut doc);

    if report.changed_version() {
        tracing::info!(
            from = report.from_version,
            warnings = report.warnings.len(),
            "save migrated to schema {SCHEMA_VERSION}"
        );
    }
    (doc, report)
}

fn empty_document() -> Document {
    Document {
        meta: Map::new(),
        actor: Map::new(),
        social: Map::new(),
        world: Map::new(),
        system: Map::new(),
    }
}

fn is_hint_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with('$') || HINT_KEYS.contains(&key)
}

/// Remove hint keys at every depth; returns how many were removed.
fn strip_hints(map: &mut Map<String, Value>) -> usize {
    let before = map.len();
    map.retain(|k, _| !is_hint_key(k));
    let mut removed = before - map.len();
    for value in map.values_mut() {
        removed += strip_hints_value(value);
    }
    removed
}

fn strip_hints_value(value: &mut Value) -> usize {
    match value {
        Value::Object(map) => strip_hints(map),
        Value::Array(items) => items.iter_mut().map(strip_hints_value).sum(),
        _ => 0,
    }
}

/// Merge `incoming` into `target`, key by key, without recursing.
fn absorb(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (k, v) in incoming {
        target.insert(k, v);
    }
}

fn into_object(value: Value, what: &str, report: &mut MigrationReport) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            report.warn(format!(
                "{what} is {}, not an object; replaced with an empty one",
                super::path::type_name(&other)
            ));
            Map::new()
        }
    }
}

fn preserve_unknown(doc: &mut Document, key: String, value: Value, report: &mut MigrationReport) {
    report.warn(format!("unrecognized top-level key '{key}' kept under 系统.{}", keys::UNRECOGNIZED));
    let bucket = doc
        .system
        .entry(keys::UNRECOGNIZED)
        .or_insert_with(|| Value::Object(Map::new()));
    if !bucket.is_object() {
        *bucket = Value::Object(Map::new());
    }
    if let Value::Object(map) = bucket {
        map.insert(key, value);
    }
}

fn place_domains(root: Map<String, Value>, doc: &mut Document, report: &mut MigrationReport) {
    for (key, value) in root {
        match Domain::from_key(&key) {
            Some(domain) => {
                let map = into_object(value, &key, report);
                absorb(doc.domain_mut(domain), map);
            }
            None => preserve_unknown(doc, key, value, report),
        }
    }
}

/// Key a legacy array of records by one of their own fields.
fn key_records(items: Vec<Value>, id_fields: &[&str], what: &str, report: &mut MigrationReport) -> Map<String, Value> {
    let mut out = Map::new();
    for (i, item) in items.into_iter().enumerate() {
        let id = id_fields.iter().find_map(|f| match item.get(*f) {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });
        let id = id.unwrap_or_else(|| {
            report.warn(format!("{what} #{i} has no identifying field; keyed as {i}"));
            i.to_string()
        });
        out.insert(id, item);
    }
    out
}

fn lift_v1(root: Map<String, Value>, doc: &mut Document, report: &mut MigrationReport) {
    for (key, value) in root {
        match key.as_str() {
            "角色基础信息" => {
                let identity = into_object(value, &key, report);
                absorb(object_at(&mut doc.actor, keys::IDENTITY), identity);
            }
            "玩家角色状态" => {
                let mut status = into_object(value, &key, report);
                let mut cultivation = Map::new();
                for field in CULTIVATION_FIELDS {
                    if let Some(v) = status.remove(*field) {
                        cultivation.insert(field.to_string(), v);
                    }
                }
                absorb(object_at(&mut doc.actor, keys::CULTIVATION), cultivation);
                absorb(object_at(&mut doc.actor, keys::ATTRIBUTES), status);
            }
            "背包" => {
                let inventory = match value {
                    Value::Array(items) => {
                        let mut map = Map::new();
                        let items = key_records(items, &[keys::ITEM_ID, "名称"], "item", report);
                        map.insert(keys::ITEMS.into(), Value::Object(items));
                        map
                    }
                    other => into_object(other, &key, report),
                };
                absorb(object_at(&mut doc.actor, keys::INVENTORY), inventory);
            }
            "功法" => {
                let techniques = match value {
                    Value::Array(items) => key_records(items, &["id", "名称"], "technique", report),
                    other => into_object(other, &key, report),
                };
                absorb(object_at(&mut doc.actor, keys::TECHNIQUES), techniques);
            }
            "任务列表" => {
                let quests = match value {
                    Value::Array(items) => items,
                    Value::Null => Vec::new(),
                    other => {
                        report.warn(format!("任务列表 is {}, not a list; dropped", super::path::type_name(&other)));
                        Vec::new()
                    }
                };
                doc.actor.insert(keys::QUESTS.into(), Value::Array(quests));
            }
            "人物关系" => {
                doc.social.insert(keys::RELATIONS.into(), value);
            }
            "记忆" => {
                let memory = match value {
                    Value::Array(items) => {
                        report.warn("flat memory list moved into short-term memory");
                        let mut map = Map::new();
                        map.insert(MemoryTier::Short.key().into(), Value::Array(items));
                        map
                    }
                    other => into_object(other, &key, report),
                };
                doc.social.insert(keys::MEMORY.into(), Value::Object(memory));
            }
            "游戏时间" => {
                doc.world.insert(keys::CLOCK.into(), value);
            }
            "世界信息" => {
                let world = into_object(value, &key, report);
                absorb(&mut doc.world, world);
            }
            "事件系统" => {
                doc.world.insert(keys::EVENTS.into(), value);
            }
            "系统设置" => {
                doc.system.insert("设置".into(), value);
            }
            _ => match Domain::from_key(&key) {
                Some(domain) => {
                    let map = into_object(value, &key, report);
                    absorb(doc.domain_mut(domain), map);
                }
                None => preserve_unknown(doc, key, value, report),
            },
        }
    }
}

fn object_at<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    super::object_mut(map.entry(key).or_insert_with(|| Value::Object(Map::new())))
}

fn as_integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

fn normalize_actor(doc: &mut Document, report: &mut MigrationReport) {
    let inventory = object_at(&mut doc.actor, keys::INVENTORY);

    let currency = match inventory.remove(keys::CURRENCY) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(map)) => map,
        Some(other) => match as_integer(&other) {
            Some(n) => {
                let mut map = Map::new();
                map.insert(CURRENCY_GRADES[0].into(), json!(n));
                map
            }
            None => {
                report.warn(format!("灵石 value {other} is not a number; reset to 0"));
                Map::new()
            }
        },
    };

    let mut normalized = Map::new();
    for grade in CURRENCY_GRADES {
        let amount = match currency.get(grade) {
            None | Some(Value::Null) => 0,
            Some(v) => as_integer(v).unwrap_or_else(|| {
                report.warn(format!("灵石.{grade} value {v} is not a number; reset to 0"));
                0
            }),
        };
        if amount < 0 {
            report.warn(format!("灵石.{grade} was negative ({amount}); clamped to 0"));
        }
        normalized.insert(grade.into(), json!(amount.max(0)));
    }
    for (k, v) in currency {
        if !CURRENCY_GRADES.contains(&k.as_str()) {
            normalized.insert(k, v);
        }
    }
    inventory.insert(keys::CURRENCY.into(), Value::Object(normalized));

    if let Some(Value::Array(items)) = inventory.remove(keys::ITEMS) {
        let keyed = key_records(items, &[keys::ITEM_ID, "名称"], "item", report);
        inventory.insert(keys::ITEMS.into(), Value::Object(keyed));
    }
}

fn normalize_relations(doc: &mut Document, report: &mut MigrationReport) {
    let relations = match doc.social.remove(keys::RELATIONS) {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Array(items)) => key_records(items, &[keys::NAME, "name"], "relation", report),
        Some(other) => into_object(other, "社交.关系", report),
    };
    doc.social
        .insert(keys::RELATIONS.into(), Value::Object(relations));
}

/// Tier names seen in older saves.
fn tier_from_alias(key: &str) -> Option<MemoryTier> {
    match key {
        "短期" | "short" | "shortTerm" => Some(MemoryTier::Short),
        "中期" | "mid" | "midTerm" => Some(MemoryTier::Mid),
        "长期" | "long" | "longTerm" => Some(MemoryTier::Long),
        "隐式中期" | "implicitMid" => Some(MemoryTier::ImplicitMid),
        _ => MemoryTier::ALL.into_iter().find(|t| t.key() == key),
    }
}

fn normalize_memory(doc: &mut Document, report: &mut MigrationReport) {
    let memory = match doc.social.remove(keys::MEMORY) {
        None | Some(Value::Null) => Map::new(),
        Some(other) => into_object(other, "社交.记忆", report),
    };

    let mut tiers = Map::new();
    for (key, value) in memory {
        let Some(tier) = tier_from_alias(&key) else {
            report.warn(format!("unknown memory tier '{key}' dropped"));
            continue;
        };
        let entries: Vec<Value> = match value {
            Value::Array(items) => items
                .into_iter()
                .filter(|v| !v.is_null())
                .map(normalize_entry)
                .collect(),
            Value::Null => Vec::new(),
            Value::String(s) if s.trim().is_empty() => Vec::new(),
            single => {
                report.warn(format!("memory tier {} held a single value; wrapped in a list", tier.key()));
                vec![normalize_entry(single)]
            }
        };

        let slot = tiers
            .entry(tier.key())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(existing) = slot {
            existing.extend(entries);
        }
    }
    doc.social.insert(keys::MEMORY.into(), Value::Object(tiers));

    let short = memory::tier_values(doc, MemoryTier::Short);
    let dropped = memory::pair_implicit(doc, &short);
    if dropped > 0 {
        report.warn(format!(
            "{dropped} implicit mid-term entries had no short-term partner; dropped"
        ));
    }
}

/// Read a clock from either key language, tolerating numeric strings.
fn coerce_clock(value: &Value) -> Option<ClockTime> {
    let map = value.as_object()?;
    let default = ClockTime::default();
    let field = |zh: &str, en: &str| map.get(zh).or_else(|| map.get(en)).and_then(as_integer);

    let fields = [
        field("年", "year"),
        field("月", "month"),
        field("日", "day"),
        field("时", "hour"),
        field("分", "minute"),
    ];
    if fields.iter().all(Option::is_none) {
        return None;
    }
    Some(ClockTime::new(
        fields[0].unwrap_or(default.year),
        fields[1].unwrap_or(default.month),
        fields[2].unwrap_or(default.day),
        fields[3].unwrap_or(default.hour),
        fields[4].unwrap_or(default.minute),
    ))
}

fn normalize_world(doc: &mut Document, report: &mut MigrationReport) {
    let clock = match doc.world.get(keys::CLOCK) {
        None | Some(Value::Null) => ClockTime::default(),
        Some(value) => coerce_clock(value).unwrap_or_else(|| {
            report.warn(format!("unreadable clock {value}; reset to {}", ClockTime::default()));
            ClockTime::default()
        }),
    };
    doc.set_clock(clock);

    let events = object_at(&mut doc.world, keys::EVENTS);
    let next = match events.get(keys::NEXT_EVENT_AT) {
        None | Some(Value::Null) => Value::Null,
        Some(value) => match coerce_clock(value) {
            Some(at) => super::clock_value(&at),
            None => {
                report.warn(format!("unreadable next event time {value}; will reschedule"));
                Value::Null
            }
        },
    };
    events.insert(keys::NEXT_EVENT_AT.into(), next);
}
