//! Schema constants and per-path policies.
//!
//! Every special case the interpreter, pipeline and change log apply is
//! declared here as an explicit table keyed by path pattern (`*` matches one
//! segment), so renaming a field means editing one list.

use super::{Document, Path};
use crate::clock::ClockTime;
use crate::memory::MemoryTier;
use serde_json::{json, Map, Value};

pub const SCHEMA_VERSION: u64 = 3;

/// Well-known field names.
pub mod keys {
    pub const VERSION: &str = "版本号";
    pub const SAVE_NAME: &str = "存档名";
    pub const UPDATED_AT: &str = "更新时间";

    pub const IDENTITY: &str = "身份";
    pub const NAME: &str = "名字";
    pub const ATTRIBUTES: &str = "属性";
    pub const CULTIVATION: &str = "修炼";
    pub const INVENTORY: &str = "背包";
    pub const CURRENCY: &str = "灵石";
    pub const ITEMS: &str = "物品";
    pub const ITEM_ID: &str = "物品ID";
    pub const TECHNIQUES: &str = "功法";
    pub const SKILLS: &str = "技能";
    pub const QUESTS: &str = "任务";

    pub const RELATIONS: &str = "关系";
    pub const MEMORY: &str = "记忆";
    pub const AFFINITY: &str = "好感度";

    pub const CLOCK: &str = "时间";
    pub const EVENTS: &str = "事件";
    pub const NEXT_EVENT_AT: &str = "下次事件时间";
    pub const EVENT_LOG: &str = "记录";

    pub const UNRECOGNIZED: &str = "未识别字段";
}

/// Currency denominations under `角色.背包.灵石`, lowest first.
pub const CURRENCY_GRADES: [&str; 4] = ["下品", "中品", "上品", "极品"];

/// Subtrees where `set` with an object merges key-by-key instead of replacing.
pub const GUARDED_SUBTREES: &[&str] = &[
    "角色.身份",
    "角色.属性",
    "角色.修炼",
    "角色.背包",
    "角色.背包.物品",
    "角色.功法",
    "社交.记忆",
];

/// Paths that must always hold an array.
pub const ARRAY_PATHS: &[&str] = &[
    "社交.记忆.短期记忆",
    "社交.记忆.中期记忆",
    "社交.记忆.长期记忆",
    "社交.记忆.隐式中期记忆",
    "世界.事件.记录",
    "角色.任务",
];

/// A lower bound enforced after numeric accumulation.
#[derive(Debug, Clone, Copy)]
pub struct FloorPolicy {
    pub pattern: &'static str,
    pub floor: f64,
}

pub const FLOOR_POLICIES: &[FloorPolicy] = &[
    FloorPolicy {
        pattern: "角色.背包.灵石.下品",
        floor: 0.0,
    },
    FloorPolicy {
        pattern: "角色.背包.灵石.中品",
        floor: 0.0,
    },
    FloorPolicy {
        pattern: "角色.背包.灵石.上品",
        floor: 0.0,
    },
    FloorPolicy {
        pattern: "角色.背包.灵石.极品",
        floor: 0.0,
    },
];

/// An `add` to `source` is mirrored (positive part only) into `target`.
#[derive(Debug, Clone, Copy)]
pub struct AccumulationMirror {
    pub source: &'static str,
    pub target: &'static str,
}

pub const ACCUMULATION_MIRRORS: &[AccumulationMirror] = &[AccumulationMirror {
    source: "角色.修炼.当前经验",
    target: "角色.修炼.累计经验",
}];

/// Final segments naming a capacity.
pub const UPPER_BOUND_FIELDS: &[&str] = &["上限", "经验上限", "最大值"];

/// Paths whose newest element is shown in full in the change log.
pub const CHANGE_LOG_INTERESTING: &[&str] = &[
    "社交.关系.*.记忆",
    "世界.事件.记录",
    "社交.记忆.短期记忆",
    "社交.记忆.中期记忆",
];

pub fn is_guarded(path: &Path) -> bool {
    GUARDED_SUBTREES.iter().any(|p| path.matches(p))
}

pub fn is_array_path(path: &Path) -> bool {
    ARRAY_PATHS.iter().any(|p| path.matches(p))
}

pub fn floor_for(path: &Path) -> Option<f64> {
    FLOOR_POLICIES
        .iter()
        .find(|f| path.matches(f.pattern))
        .map(|f| f.floor)
}

pub fn mirror_for(path: &Path) -> Option<Path> {
    ACCUMULATION_MIRRORS
        .iter()
        .find(|m| path.matches(m.source))
        .and_then(|m| Path::parse(m.target).ok())
}

pub fn is_upper_bound(path: &Path) -> bool {
    path.last_key()
        .is_some_and(|k| UPPER_BOUND_FIELDS.contains(&k.as_str()))
}

pub fn is_interesting(path: &Path) -> bool {
    CHANGE_LOG_INTERESTING.iter().any(|p| path.matches(p))
}

/// If `path` is exactly `社交.关系.<name>`, the NPC name.
pub fn npc_record_name(path: &Path) -> Option<String> {
    path.matches("社交.关系.*").then(|| path.last_key()).flatten()
}

/// The memory tier an array path refers to, if any.
pub fn memory_tier_for(path: &Path) -> Option<MemoryTier> {
    MemoryTier::ALL
        .into_iter()
        .find(|tier| path.matches(&format!("社交.记忆.{}", tier.key())))
}

/// Whether `path` is `角色.背包.物品` (the item collection root).
pub fn is_item_collection(path: &Path) -> bool {
    path.matches("角色.背包.物品")
}

/// `Some(id)` when `path` is `角色.功法.<id>`.
pub fn technique_id(path: &Path) -> Option<String> {
    path.matches("角色.功法.*").then(|| path.last_key()).flatten()
}

/// Ensure every known sub-structure exists with the right container type.
///
/// Existing values of the right type are left alone, so this is safe to run on
/// any document, any number of times.
pub fn fill_skeleton(doc: &mut Document) {
    ensure_object(&mut doc.actor, keys::IDENTITY);
    ensure_object(&mut doc.actor, keys::ATTRIBUTES);
    ensure_object(&mut doc.actor, keys::CULTIVATION);
    ensure_object(&mut doc.actor, keys::TECHNIQUES);
    ensure_array(&mut doc.actor, keys::QUESTS);

    let inventory = ensure_object(&mut doc.actor, keys::INVENTORY);
    ensure_object(inventory, keys::ITEMS);
    let currency = ensure_object(inventory, keys::CURRENCY);
    for grade in CURRENCY_GRADES {
        if !currency.get(grade).is_some_and(Value::is_number) {
            currency.insert(grade.into(), json!(0));
        }
    }

    ensure_object(&mut doc.social, keys::RELATIONS);
    let memory = ensure_object(&mut doc.social, keys::MEMORY);
    for tier in MemoryTier::ALL {
        ensure_array(memory, tier.key());
    }

    if !doc.world.get(keys::CLOCK).is_some_and(Value::is_object) {
        doc.world
            .insert(keys::CLOCK.into(), super::clock_value(&ClockTime::default()));
    }
    let events = ensure_object(&mut doc.world, keys::EVENTS);
    ensure_array(events, keys::EVENT_LOG);
    events.entry(keys::NEXT_EVENT_AT).or_insert(Value::Null);
}

fn ensure_object<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    super::object_mut(map.entry(key).or_insert_with(|| Value::Object(Map::new())))
}

fn ensure_array(map: &mut Map<String, Value>, key: &str) {
    let slot = map.entry(key).or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
}
