//! Session - the primary public API for running a game.
//!
//! A [`Session`] owns one document and is the only thing that mutates it.
//! Each turn runs the same sequence: parse the AI reply, vet and apply its
//! commands, record the narration in memory, tick world events, then compact
//! mid-term memory if it has grown past the trigger.

use crate::ai::{
    parse_response, prompts, ChunkSink, Collaborator, CollaboratorError, TurnResponse,
};
use crate::command::{prepare, ChangeLog, ExecutionError};
use crate::config::{ConfigError, EngineConfig};
use crate::document::{migrate, schema, Document, MigrationReport};
use crate::events::{Event, EventError, EventScheduler};
use crate::memory::{self, CompactionError, Eviction, MemoryEntry, MemoryManager};
use crate::persist::{slot_key, Store, StoreError};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

/// Errors from Session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("AI error: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Compaction error: {0}")]
    Compaction(#[from] CompactionError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("No save found under '{key}'")]
    NotFound { key: String },

    #[error("Turn aborted before any state changed")]
    Aborted,
}

/// Everything one turn produced.
#[derive(Debug, Clone, Default)]
pub struct TurnReport {
    /// The narrative to show the player.
    pub text: String,
    pub action_options: Vec<String>,
    /// Rejected commands first, then every vetted command in the order it
    /// ran (capacities ahead of the values they bound), then world event
    /// commands.
    pub change_log: ChangeLog,
    /// User-facing diagnostics that did not fail the turn.
    pub notices: Vec<String>,
    pub evictions: Vec<Eviction>,
    pub event: Option<Event>,
    /// The long-term entry written by compaction, if one ran.
    pub compacted: Option<MemoryEntry>,
    /// Which reply parser produced the response.
    pub parse_strategy: &'static str,
}

/// A running game.
pub struct Session<C: Collaborator> {
    id: String,
    doc: Document,
    config: EngineConfig,
    memory: MemoryManager,
    events: EventScheduler,
    collaborator: C,
    rng: StdRng,
}

impl<C: Collaborator> Session<C> {
    /// Start a new game with an empty document.
    pub fn new(collaborator: C, config: EngineConfig) -> Self {
        Self::from_document(Document::default(), collaborator, config)
    }

    /// Resume from an already canonical document.
    pub fn from_document(mut doc: Document, collaborator: C, config: EngineConfig) -> Self {
        let config = config.validated();
        doc.meta
            .insert(schema::keys::VERSION.into(), json!(schema::SCHEMA_VERSION));
        schema::fill_skeleton(&mut doc);

        Self {
            id: Uuid::new_v4().to_string(),
            doc,
            memory: MemoryManager::new(&config),
            events: EventScheduler::new(&config),
            config,
            collaborator,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a fixed session id (for loading and tests).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Use a seeded RNG for event scheduling.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Load a save slot, migrating it to the current schema.
    pub async fn load<S: Store + ?Sized>(
        store: &S,
        session_id: &str,
        slot: &str,
        collaborator: C,
        config: EngineConfig,
    ) -> Result<(Self, MigrationReport), SessionError> {
        let key = slot_key(session_id, slot);
        let raw = store
            .get(&key)
            .await?
            .ok_or_else(|| SessionError::NotFound { key: key.clone() })?;

        let (doc, report) = migrate(raw);
        tracing::info!(
            key = %key,
            from_version = report.from_version,
            warnings = report.warnings.len(),
            "save loaded"
        );
        let session = Self::from_document(doc, collaborator, config).with_id(session_id);
        Ok((session, report))
    }

    /// Persist the document under this session's slot. Returns the key.
    pub async fn save<S: Store + ?Sized>(
        &mut self,
        store: &S,
        slot: &str,
    ) -> Result<String, SessionError> {
        self.doc.meta.insert(
            schema::keys::UPDATED_AT.into(),
            json!(chrono::Utc::now().to_rfc3339()),
        );
        let key = slot_key(&self.id, slot);
        store.put(&key, &self.doc.to_value()).await?;
        tracing::info!(key = %key, "game saved");
        Ok(key)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The memory manager. Clones share the compaction lock.
    pub fn memory(&self) -> &MemoryManager {
        &self.memory
    }

    pub fn collaborator(&self) -> &C {
        &self.collaborator
    }

    /// Vet and apply a batch of raw commands, then enforce memory limits.
    ///
    /// Rejected commands are logged first and never run. The rest are logged
    /// in execution order. Once `abort` returns true the remaining commands
    /// are logged as skipped; earlier ones stay applied.
    pub fn apply_commands(&mut self, raw: &[Value], abort: &dyn Fn() -> bool) -> ChangeLog {
        self.run_batch(raw, abort).0
    }

    fn run_batch(&mut self, raw: &[Value], abort: &dyn Fn() -> bool) -> (ChangeLog, Vec<Eviction>) {
        let prepared = prepare(raw, &self.doc);
        let mut log = ChangeLog::new();

        for rejected in &prepared.rejected {
            tracing::warn!(command = %rejected.raw, errors = ?rejected.errors, "command rejected");
            log.record_rejected(rejected);
        }

        let mut aborted = false;
        for cmd in &prepared.commands {
            if !aborted && abort() {
                tracing::info!("command batch aborted");
                aborted = true;
            }
            if aborted {
                log.record_skipped(cmd);
                continue;
            }
            if let Err(e) = log.apply(cmd, &mut self.doc) {
                tracing::warn!(command = %cmd, error = %e, "command failed");
            }
        }

        let evictions = self.memory.enforce_limits(&mut self.doc);
        (log, evictions)
    }

    /// Run a full turn from an already generated reply.
    pub async fn apply_response(
        &mut self,
        raw_text: &str,
        abort: &dyn Fn() -> bool,
    ) -> Result<TurnReport, SessionError> {
        if abort() {
            return Err(SessionError::Aborted);
        }

        let outcome = parse_response(raw_text);
        let mut report = TurnReport {
            parse_strategy: outcome.strategy,
            ..TurnReport::default()
        };
        if outcome.is_degraded() {
            let reasons: Vec<String> = outcome.errors.iter().map(ToString::to_string).collect();
            report.notices.push(format!(
                "AI reply was not valid JSON ({}); kept the narrative only",
                reasons.join("; ")
            ));
        }

        let TurnResponse {
            text,
            mid_term_memory,
            tavern_commands,
            action_options,
        } = outcome.response;

        let (change_log, evictions) = self.run_batch(&tavern_commands, abort);
        report.change_log = change_log;
        report.evictions = evictions;
        report.notices.extend(
            report
                .change_log
                .iter()
                .filter(|e| !e.is_applied())
                .map(ToString::to_string),
        );

        report
            .evictions
            .extend(self.memory.append_turn(&mut self.doc, &text, &mid_term_memory));

        if self.events.is_enabled() {
            match Self::run_events(&mut self.doc, &self.events, &self.collaborator, &mut self.rng)
                .await
            {
                Ok((event, log)) => {
                    report.event = event;
                    report.change_log.extend(log);
                    report.evictions.extend(self.memory.enforce_limits(&mut self.doc));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "world event tick failed");
                    report.notices.push(e.to_string());
                }
            }
        }

        match self.compact_memory().await {
            Ok(entry) => report.compacted = entry,
            Err(CompactionError::AlreadyRunning) => report
                .notices
                .push("memory compaction is already running; skipped this turn".to_string()),
            Err(e) => {
                tracing::warn!(error = %e, "memory compaction failed");
                report.notices.push(e.to_string());
            }
        }

        report.text = text;
        report.action_options = action_options;
        Ok(report)
    }

    /// Ask the collaborator to narrate the player's input, then apply it.
    pub async fn player_turn(
        &mut self,
        input: &str,
        on_chunk: ChunkSink<'_>,
        abort: &dyn Fn() -> bool,
    ) -> Result<TurnReport, SessionError> {
        if abort() {
            return Err(SessionError::Aborted);
        }
        let messages = prompts::turn_messages(&self.doc, input);
        let raw = self.collaborator.generate_raw(&messages, on_chunk).await?;
        self.apply_response(&raw, abort).await
    }

    /// Compact mid-term memory if it has reached the trigger.
    pub async fn compact_memory(&mut self) -> Result<Option<MemoryEntry>, CompactionError> {
        memory::compact(&self.memory, &mut self.doc, &self.collaborator).await
    }

    /// Run one event-scheduler tick and apply its result.
    pub async fn tick_events<R: Rng + Send>(
        &mut self,
        rng: &mut R,
    ) -> Result<(Option<Event>, ChangeLog), SessionError> {
        let result =
            Self::run_events(&mut self.doc, &self.events, &self.collaborator, rng).await?;
        self.memory.enforce_limits(&mut self.doc);
        Ok(result)
    }

    async fn run_events<R: Rng + Send>(
        doc: &mut Document,
        events: &EventScheduler,
        collaborator: &C,
        rng: &mut R,
    ) -> Result<(Option<Event>, ChangeLog), EventError> {
        let plan = events.tick(doc, collaborator, rng).await?;
        let mut log = ChangeLog::new();
        for cmd in &plan.commands {
            log.apply(cmd, doc)?;
        }
        Ok((plan.event, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{tier_len, MemoryTier};
    use crate::persist::MemoryStore;
    use crate::testing::MockCollaborator;
    use std::cell::Cell;

    fn quiet() -> EngineConfig {
        EngineConfig::new().with_events(false)
    }

    #[tokio::test]
    async fn test_apply_response_runs_full_turn() {
        let mut session = Session::new(MockCollaborator::new(), quiet());
        let reply = json!({
            "text": "你在山门前站定。",
            "mid_term_memory": "抵达山门",
            "tavern_commands": [
                {"action": "add", "key": "角色.属性.声望", "value": 5},
                {"action": "add", "key": "角色.属性.声望", "value": "很多"}
            ],
            "action_options": ["进门"]
        })
        .to_string();

        let report = session.apply_response(&reply, &|| false).await.unwrap();
        assert_eq!(report.text, "你在山门前站定。");
        assert_eq!(report.action_options, vec!["进门"]);
        assert_eq!(report.parse_strategy, "direct");
        assert_eq!(report.change_log.applied().count(), 1);
        assert_eq!(report.notices.len(), 1);
        assert_eq!(
            session.document().get_str_path("角色.属性.声望"),
            Some(&json!(5))
        );
        assert_eq!(tier_len(session.document(), MemoryTier::Short), 1);
        assert_eq!(
            session
                .document()
                .get_str_path("社交.记忆.隐式中期记忆.0.内容"),
            Some(&json!("抵达山门"))
        );
    }

    #[tokio::test]
    async fn test_abort_mid_batch_skips_remainder() {
        let mut session = Session::new(MockCollaborator::new(), quiet());
        let checks = Cell::new(0);
        let abort = || {
            checks.set(checks.get() + 1);
            checks.get() > 1
        };
        let log = session.apply_commands(
            &[
                json!({"action": "set", "key": "世界.天气", "value": "雨"}),
                json!({"action": "set", "key": "世界.地点", "value": "坊市"}),
            ],
            &abort,
        );

        assert_eq!(log.applied().count(), 1);
        assert!(log.entries()[1].to_string().starts_with("[skipped]"));
        assert_eq!(session.document().get_str_path("世界.天气"), Some(&json!("雨")));
        assert_eq!(session.document().get_str_path("世界.地点"), None);
    }

    #[tokio::test]
    async fn test_change_log_lists_rejections_then_execution_order() {
        let mut session = Session::new(MockCollaborator::new(), quiet());
        let log = session.apply_commands(
            &[
                json!({"action": "set", "key": "角色.属性.气血.当前", "value": 80}),
                json!({"action": "set", "key": "世界.天气", "value": "晴"}),
                json!({"action": "launch", "key": "世界.月亮", "value": 1}),
                json!({"action": "set", "key": "角色.属性.气血.上限", "value": 100}),
            ],
            &|| false,
        );

        let keys: Vec<&str> = log.entries().iter().map(|e| e.key.as_str()).collect();
        assert_eq!(
            keys,
            vec!["世界.月亮", "角色.属性.气血.上限", "角色.属性.气血.当前", "世界.天气"]
        );
        assert!(!log.entries()[0].is_applied());
    }

    #[tokio::test]
    async fn test_abort_before_turn_changes_nothing() {
        let mut session = Session::new(MockCollaborator::new(), quiet());
        let before = session.document().clone();
        let err = session.apply_response("{}", &|| true).await.unwrap_err();
        assert!(matches!(err, SessionError::Aborted));
        assert_eq!(session.document(), &before);
    }

    #[tokio::test]
    async fn test_player_turn_streams_and_applies() {
        let ai = MockCollaborator::new().with_turn(
            "林间传来琴声。",
            "听到琴声",
            vec![json!({"action": "push", "key": "角色.任务", "value": {"名称": "寻找琴师"}})],
        );
        let mut session = Session::new(ai, quiet());

        let mut streamed = String::new();
        let mut sink = |chunk: &str| streamed.push_str(chunk);
        let report = session
            .player_turn("我循声而去", Some(&mut sink), &|| false)
            .await
            .unwrap();

        assert_eq!(report.text, "林间传来琴声。");
        assert!(streamed.contains("林间传来琴声"));
        assert_eq!(
            session.document().get_str_path("角色.任务.0.名称"),
            Some(&json!("寻找琴师"))
        );
        assert_eq!(session.collaborator().prompts(), vec!["我循声而去".to_string()]);
    }

    #[tokio::test]
    async fn test_turn_with_events_schedules_first_trigger() {
        let mut session =
            Session::new(MockCollaborator::new(), EngineConfig::new()).with_rng_seed(11);
        let report = session
            .apply_response(r#"{"text": "风起。"}"#, &|| false)
            .await
            .unwrap();

        assert!(report.event.is_none());
        assert!(EventScheduler::next_event_at(session.document()).is_some());
        assert!(report
            .change_log
            .iter()
            .any(|e| e.key == "世界.事件.下次事件时间"));
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let store = MemoryStore::new();
        let mut session = Session::new(MockCollaborator::new(), quiet()).with_id("s1");
        session.apply_commands(
            &[json!({"action": "set", "key": "角色.身份.名字", "value": "叶凡"})],
            &|| false,
        );

        let key = session.save(&store, "auto").await.unwrap();
        assert_eq!(key, "s1_auto");

        let (loaded, report) = Session::load(&store, "s1", "auto", MockCollaborator::new(), quiet())
            .await
            .unwrap();
        assert_eq!(report.from_version, 3);
        assert_eq!(loaded.id(), "s1");
        assert_eq!(loaded.document().player_name(), Some("叶凡"));
        assert!(loaded
            .document()
            .get_str_path("元数据.更新时间")
            .is_some_and(Value::is_string));

        let missing = Session::load(&store, "s1", "nope", MockCollaborator::new(), quiet()).await;
        assert!(matches!(missing, Err(SessionError::NotFound { .. })));
    }
}
