//! World events driven by the in-game clock.
//!
//! The scheduler keeps one timestamp, `世界.事件.下次事件时间`. A tick with no
//! timestamp only schedules one; a tick at or past it asks the collaborator
//! for an event, then schedules the next. Ticks never touch the document
//! directly. They return the commands to apply, so events go through the same
//! interpreter and change log as everything else.

use crate::ai::response::{extract_fenced, extract_object};
use crate::ai::{prompts, Collaborator, CollaboratorError};
use crate::clock::ClockTime;
use crate::command::{execute, Command, ExecutionError};
use crate::config::EngineConfig;
use crate::document::{schema, Document, Path};
use crate::memory::MemoryTier;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("event generation failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("could not read a world event from the reply: {0}")]
    Parse(String),

    #[error("could not apply world event: {0}")]
    Apply(#[from] ExecutionError),

    #[error("no event can be scheduled after {0}")]
    ClockOutOfRange(ClockTime),
}

/// A generated world event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub name: String,
    pub category: String,
    pub description: String,
    pub impact_level: String,
    #[serde(default)]
    pub affected_resources: Vec<String>,
    pub occurred_at: ClockTime,
}

impl Event {
    /// Build an event from the model's JSON, filling gaps with defaults.
    fn from_generated(raw: &Map<String, Value>, occurred_at: ClockTime) -> Result<Self, EventError> {
        let text = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| raw.get(*k).and_then(Value::as_str))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        };

        let name = text(&["名称", "name"])
            .ok_or_else(|| EventError::Parse("event has no name".to_string()))?;
        let affected_resources = match raw.get("影响范围").or_else(|| raw.get("affectedResources")) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            Some(Value::String(s)) => s
                .split(['、', ',', '，'])
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        Ok(Self {
            id: Uuid::new_v4().to_string(),
            name,
            category: text(&["类型", "category"]).unwrap_or_else(|| "世界".to_string()),
            description: text(&["描述", "description"]).unwrap_or_default(),
            impact_level: text(&["影响等级", "impactLevel"]).unwrap_or_else(|| "轻微".to_string()),
            affected_resources,
            occurred_at,
        })
    }

    /// Parse a collaborator reply.
    pub fn parse(reply: &str, occurred_at: ClockTime) -> Result<Self, EventError> {
        let candidates = [Some(reply.trim()), extract_fenced(reply), extract_object(reply)];
        for candidate in candidates.into_iter().flatten() {
            if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
                return Self::from_generated(&map, occurred_at);
            }
        }
        Err(EventError::Parse("no JSON object in the reply".to_string()))
    }

    /// The line this event leaves in short-term memory.
    pub fn memory_text(&self) -> String {
        if self.description.is_empty() {
            format!("【世界事件】{}", self.name)
        } else {
            format!("【世界事件】{}：{}", self.name, self.description)
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// What a tick decided.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventPlan {
    pub event: Option<Event>,
    /// The newly scheduled trigger, if the schedule moved.
    pub next_at: Option<ClockTime>,
    /// Commands that realize the plan, in application order.
    pub commands: Vec<Command>,
}

impl EventPlan {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Apply the plan directly, without a change log.
    pub fn apply(&self, doc: &mut Document) -> Result<(), EventError> {
        for cmd in &self.commands {
            execute(cmd, doc)?;
        }
        Ok(())
    }
}

fn next_event_path() -> Path {
    Path::new(crate::document::Domain::World, Vec::new())
        .child(schema::keys::EVENTS)
        .child(schema::keys::NEXT_EVENT_AT)
}

fn event_log_path() -> Path {
    Path::new(crate::document::Domain::World, Vec::new())
        .child(schema::keys::EVENTS)
        .child(schema::keys::EVENT_LOG)
}

/// Typed view of `世界.事件`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventState {
    pub next_event_at: Option<ClockTime>,
    /// Past events, oldest first. Log entries that don't read as an event are
    /// skipped.
    pub log: Vec<Event>,
}

impl EventState {
    pub fn read(doc: &Document) -> Self {
        let log = match doc.get(&event_log_path()) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| serde_json::from_value(v.clone()).ok())
                .collect(),
            _ => Vec::new(),
        };
        Self {
            next_event_at: read_next_event_at(doc),
            log,
        }
    }
}

fn read_next_event_at(doc: &Document) -> Option<ClockTime> {
    doc.get(&next_event_path())
        .filter(|v| v.is_object())
        .and_then(|v| serde_json::from_value::<ClockTime>(v.clone()).ok())
        .map(ClockTime::normalized)
}

/// Clock-driven event scheduling.
#[derive(Debug, Clone)]
pub struct EventScheduler {
    enabled: bool,
    min_years: u32,
    max_years: u32,
}

impl EventScheduler {
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().validated();
        Self {
            enabled: config.events_enabled,
            min_years: config.event_min_years,
            max_years: config.event_max_years,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// The recorded next trigger, if any.
    pub fn next_event_at(doc: &Document) -> Option<ClockTime> {
        read_next_event_at(doc)
    }

    /// Whether an event should fire now.
    pub fn is_due(&self, doc: &Document) -> bool {
        self.enabled
            && Self::next_event_at(doc).is_some_and(|at| doc.clock().has_reached(&at))
    }

    fn pick_next<R: Rng>(&self, now: ClockTime, rng: &mut R) -> Result<ClockTime, EventError> {
        let years = rng.gen_range(self.min_years..=self.max_years);
        now.checked_plus_years(i64::from(years)).ok_or_else(|| {
            tracing::warn!(now = %now, "clock too late to schedule another world event");
            EventError::ClockOutOfRange(now)
        })
    }

    fn schedule_command(at: ClockTime) -> Command {
        Command::set(next_event_path(), crate::document::clock_value(&at))
    }

    /// Decide what this tick does.
    ///
    /// On collaborator or parse failure the error is returned and the
    /// schedule is left as it was, so the next tick retries.
    pub async fn tick<C, R>(
        &self,
        doc: &Document,
        collaborator: &C,
        rng: &mut R,
    ) -> Result<EventPlan, EventError>
    where
        C: Collaborator + ?Sized,
        R: Rng,
    {
        if !self.enabled {
            return Ok(EventPlan::default());
        }

        let now = doc.clock();
        let Some(due_at) = Self::next_event_at(doc) else {
            let next = self.pick_next(now, rng)?;
            tracing::debug!(next = %next, "first world event scheduled");
            return Ok(EventPlan {
                event: None,
                next_at: Some(next),
                commands: vec![Self::schedule_command(next)],
            });
        };

        if !now.has_reached(&due_at) {
            return Ok(EventPlan::default());
        }

        let next = self.pick_next(now, rng)?;
        let prompt = prompts::event_prompt(doc, &now);
        let reply = collaborator.generate(&prompt, None).await?;
        let event = Event::parse(&reply, now)?;

        tracing::info!(event = %event.name, category = %event.category, "world event fired");

        let commands = vec![
            Command::Push {
                path: event_log_path(),
                value: event.to_value(),
            },
            Command::Push {
                path: MemoryTier::Short.path(),
                value: serde_json::json!({ "内容": event.memory_text() }),
            },
            Self::schedule_command(next),
        ];

        Ok(EventPlan {
            event: Some(event),
            next_at: Some(next),
            commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCollaborator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;

    fn scheduler() -> EventScheduler {
        EventScheduler::new(&EngineConfig::new().with_event_years(1, 3))
    }

    #[tokio::test]
    async fn test_first_tick_only_schedules() {
        let doc = Document::default();
        let ai = MockCollaborator::new();
        let mut rng = StdRng::seed_from_u64(7);

        let plan = scheduler().tick(&doc, &ai, &mut rng).await.unwrap();
        assert!(plan.event.is_none());
        let next = plan.next_at.unwrap();
        assert!(next > doc.clock());
        assert!(next.year >= 1001 && next.year <= 1003);
        assert!(ai.prompts().is_empty());

        let mut doc = doc;
        plan.apply(&mut doc).unwrap();
        assert_eq!(EventScheduler::next_event_at(&doc), Some(next));
        assert_eq!(doc.get_str_path("世界.事件.记录"), Some(&json!([])));
    }

    #[tokio::test]
    async fn test_not_due_does_nothing() {
        let mut doc = Document::default();
        EventPlan {
            commands: vec![EventScheduler::schedule_command(ClockTime::new(1002, 1, 1, 0, 0))],
            ..Default::default()
        }
        .apply(&mut doc)
        .unwrap();

        let plan = scheduler()
            .tick(&doc, &MockCollaborator::new(), &mut StdRng::seed_from_u64(1))
            .await
            .unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_due_event_fires_and_reschedules() {
        let mut doc = Document::default();
        doc.world.insert(
            "事件".into(),
            json!({"下次事件时间": {"年": 1000, "月": 1, "日": 1, "时": 0, "分": 0}, "记录": []}),
        );
        let ai = MockCollaborator::new().with_reply(
            "```json\n{\"名称\": \"魔门现世\", \"类型\": \"势力\", \"描述\": \"魔门重现江湖\", \"影响等级\": \"重大\", \"影响范围\": [\"正道\"]}\n```",
        );

        let plan = scheduler()
            .tick(&doc, &ai, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap();
        let event = plan.event.clone().unwrap();
        assert_eq!(event.name, "魔门现世");
        assert_eq!(event.affected_resources, vec!["正道"]);
        assert_eq!(event.occurred_at, doc.clock());

        plan.apply(&mut doc).unwrap();
        let log = doc.get_str_path("世界.事件.记录").unwrap().as_array().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0]["impactLevel"], "重大");
        let state = EventState::read(&doc);
        assert_eq!(state.log, vec![event]);
        assert_eq!(state.next_event_at, plan.next_at);
        let short = doc.get_str_path("社交.记忆.短期记忆").unwrap().as_array().unwrap();
        assert_eq!(short[0]["内容"], "【世界事件】魔门现世：魔门重现江湖");
        assert!(EventScheduler::next_event_at(&doc).unwrap() > doc.clock());
    }

    #[tokio::test]
    async fn test_failure_leaves_schedule_alone() {
        let mut doc = Document::default();
        let due = json!({"年": 999, "月": 1, "日": 1, "时": 0, "分": 0});
        doc.world
            .insert("事件".into(), json!({"下次事件时间": due, "记录": []}));

        let ai = MockCollaborator::new().with_reply("今天风和日丽");
        let err = scheduler()
            .tick(&doc, &ai, &mut StdRng::seed_from_u64(3))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Parse(_)));
        assert_eq!(doc.get_str_path("世界.事件.下次事件时间"), Some(&due));
    }

    #[tokio::test]
    async fn test_last_representable_year_refuses_to_schedule() {
        let mut doc = Document::default();
        doc.set_clock(ClockTime::new(i64::MAX, 1, 1, 0, 0));
        let ai = MockCollaborator::new();

        let err = scheduler()
            .tick(&doc, &ai, &mut StdRng::seed_from_u64(5))
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::ClockOutOfRange(_)));
        assert_eq!(ai.calls(), 0);
        assert_eq!(doc.get_str_path("世界.事件.下次事件时间"), Some(&Value::Null));
    }

    #[test]
    fn test_next_event_time_is_normalized() {
        let mut doc = Document::default();
        doc.world.insert(
            "事件".into(),
            serde_json::json!({"下次事件时间": {"年": 1000, "月": 13, "日": 1, "时": 0, "分": 0}}),
        );
        assert_eq!(
            EventScheduler::next_event_at(&doc),
            Some(ClockTime::new(1001, 1, 1, 0, 0))
        );

        doc.set_clock(ClockTime::new(1000, 12, 30, 0, 0));
        assert!(!scheduler().is_due(&doc));
        doc.set_clock(ClockTime::new(1001, 1, 1, 0, 0));
        assert!(scheduler().is_due(&doc));
    }

    #[tokio::test]
    async fn test_disabled_short_circuits() {
        let doc = Document::default();
        let scheduler = EventScheduler::new(&EngineConfig::new().with_events(false));
        let plan = scheduler
            .tick(&doc, &MockCollaborator::new(), &mut StdRng::seed_from_u64(0))
            .await
            .unwrap();
        assert!(plan.is_empty());
        assert!(!scheduler.is_due(&doc));
    }

    #[test]
    fn test_parse_event_defaults() {
        let event = Event::parse(
            "好的 {\"名称\": \"灵潮\", \"影响范围\": \"灵脉、坊市\"} 以上",
            ClockTime::default(),
        )
        .unwrap();
        assert_eq!(event.category, "世界");
        assert_eq!(event.impact_level, "轻微");
        assert_eq!(event.affected_resources, vec!["灵脉", "坊市"]);
        assert!(!event.id.is_empty());
    }
}
