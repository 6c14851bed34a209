//! The canonical, versioned game-state document.
//!
//! A document is five fixed domains (metadata, actor, social, world, system),
//! each a JSON object. Known sub-structures (clock, memory tiers, currency,
//! event log) have typed accessors; everything else is free-form JSON that the
//! command interpreter addresses by [`Path`].

pub mod migrate;
pub mod path;
pub mod schema;

pub use migrate::{migrate, MigrationReport};
pub use path::{Path, PathError, Segment};

use crate::clock::ClockTime;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// One of the five top-level sections of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Domain {
    Meta,
    Actor,
    Social,
    World,
    System,
}

impl Domain {
    pub const ALL: [Domain; 5] = [
        Domain::Meta,
        Domain::Actor,
        Domain::Social,
        Domain::World,
        Domain::System,
    ];

    /// The wire name of this domain.
    pub fn key(self) -> &'static str {
        match self {
            Domain::Meta => "元数据",
            Domain::Actor => "角色",
            Domain::Social => "社交",
            Domain::World => "世界",
            Domain::System => "系统",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|d| d.key() == key)
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The canonical schema-version-3 document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "元数据", default)]
    pub meta: Map<String, Value>,
    #[serde(rename = "角色", default)]
    pub actor: Map<String, Value>,
    #[serde(rename = "社交", default)]
    pub social: Map<String, Value>,
    #[serde(rename = "世界", default)]
    pub world: Map<String, Value>,
    #[serde(rename = "系统", default)]
    pub system: Map<String, Value>,
}

impl Document {
    /// A fresh document with every known sub-structure present and empty.
    pub fn new(save_name: impl Into<String>) -> Self {
        let mut doc = Self {
            meta: Map::new(),
            actor: Map::new(),
            social: Map::new(),
            world: Map::new(),
            system: Map::new(),
        };
        doc.meta.insert(schema::keys::VERSION.into(), json!(schema::SCHEMA_VERSION));
        doc.meta.insert(schema::keys::SAVE_NAME.into(), json!(save_name.into()));
        schema::fill_skeleton(&mut doc);
        doc
    }

    pub fn domain(&self, domain: Domain) -> &Map<String, Value> {
        match domain {
            Domain::Meta => &self.meta,
            Domain::Actor => &self.actor,
            Domain::Social => &self.social,
            Domain::World => &self.world,
            Domain::System => &self.system,
        }
    }

    pub fn domain_mut(&mut self, domain: Domain) -> &mut Map<String, Value> {
        match domain {
            Domain::Meta => &mut self.meta,
            Domain::Actor => &mut self.actor,
            Domain::Social => &mut self.social,
            Domain::World => &mut self.world,
            Domain::System => &mut self.system,
        }
    }

    /// Read the value at `path`, if present.
    pub fn get(&self, path: &Path) -> Option<&Value> {
        path::lookup(self.domain(path.domain()), path.segments())
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut Value> {
        path::lookup_mut(self.domain_mut(path.domain()), path.segments())
    }

    /// Convenience for tests and callers holding a dotted string.
    pub fn get_str_path(&self, dotted: &str) -> Option<&Value> {
        Path::parse(dotted).ok().and_then(|p| self.get(&p))
    }

    pub fn schema_version(&self) -> u64 {
        self.meta
            .get(schema::keys::VERSION)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// The in-game clock, or the default clock if absent or malformed.
    pub fn clock(&self) -> ClockTime {
        self.world
            .get(schema::keys::CLOCK)
            .and_then(|v| serde_json::from_value::<ClockTime>(v.clone()).ok())
            .map(ClockTime::normalized)
            .unwrap_or_default()
    }

    pub fn set_clock(&mut self, clock: ClockTime) {
        self.world
            .insert(schema::keys::CLOCK.into(), clock_value(&clock.normalized()));
    }

    /// The player's own name, used to stop the player being filed as an NPC.
    pub fn player_name(&self) -> Option<&str> {
        self.actor
            .get(schema::keys::IDENTITY)
            .and_then(|v| v.get(schema::keys::NAME))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// The whole document as a JSON value, in wire shape.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        for domain in Domain::ALL {
            root.insert(domain.key().into(), Value::Object(self.domain(domain).clone()));
        }
        Value::Object(root)
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new("")
    }
}

pub(crate) fn clock_value(clock: &ClockTime) -> Value {
    serde_json::to_value(clock).unwrap_or(Value::Null)
}

/// `slot` as an object, replacing anything else with `{}`.
pub(crate) fn object_mut(slot: &mut Value) -> &mut Map<String, Value> {
    match slot {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            object_mut(other)
        }
    }
}

/// `slot` as an array, replacing anything else with `[]`.
pub(crate) fn array_mut(slot: &mut Value) -> &mut Vec<Value> {
    match slot {
        Value::Array(items) => items,
        other => {
            *other = Value::Array(Vec::new());
            array_mut(other)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_helpers_replace_wrong_shapes() {
        let mut slot = json!("corrupt");
        object_mut(&mut slot).insert("a".into(), json!(1));
        assert_eq!(slot, json!({"a": 1}));
        object_mut(&mut slot).insert("b".into(), json!(2));
        assert_eq!(slot, json!({"a": 1, "b": 2}));

        let mut slot = json!({"x": 1});
        array_mut(&mut slot).push(json!("y"));
        assert_eq!(slot, json!(["y"]));

        let mut doc = Document::default();
        doc.social.insert("记忆".into(), json!("corrupt"));
        doc.actor.insert("背包".into(), json!(3));
        schema::fill_skeleton(&mut doc);
        assert_eq!(doc.get_str_path("社交.记忆.短期记忆"), Some(&json!([])));
        assert_eq!(doc.get_str_path("角色.背包.灵石.下品"), Some(&json!(0)));
    }

    #[test]
    fn test_domain_keys_round_trip() {
        for d in Domain::ALL {
            assert_eq!(Domain::from_key(d.key()), Some(d));
        }
        assert_eq!(Domain::from_key("player"), None);
    }

    #[test]
    fn test_new_document_has_skeleton() {
        let doc = Document::new("slot one");
        assert_eq!(doc.schema_version(), 3);
        assert!(doc.get_str_path("社交.记忆.短期记忆").unwrap().is_array());
        assert!(doc.get_str_path("世界.事件.记录").unwrap().is_array());
        assert_eq!(doc.clock(), ClockTime::default());
    }

    #[test]
    fn test_set_clock_normalizes() {
        let mut doc = Document::default();
        doc.set_clock(ClockTime {
            year: 1000,
            month: 1,
            day: 1,
            hour: 0,
            minute: 90,
        });
        assert_eq!(doc.clock(), ClockTime::new(1000, 1, 1, 1, 30));
    }

    #[test]
    fn test_wire_shape_has_five_domains() {
        let value = Document::default().to_value();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 5);
        for d in Domain::ALL {
            assert!(obj.contains_key(d.key()));
        }
        let back: Document = serde_json::from_value(value).unwrap();
        assert_eq!(back, Document::default());
    }
}
