//! Testing utilities.
//!
//! This module provides tools for integration testing:
//! - `MockCollaborator` for deterministic turns without API calls
//! - `TestHarness` for scripted game scenarios
//! - Assertion helpers for verifying document state

use crate::ai::{ChatMessage, ChatRole, ChunkSink, Collaborator, CollaboratorError};
use crate::command::ChangeLog;
use crate::config::EngineConfig;
use crate::document::Document;
use crate::memory::{tier_len, MemoryTier};
use crate::session::{Session, SessionError, TurnReport};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Characters per streamed chunk.
const CHUNK_CHARS: usize = 8;

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    Failure(String),
}

#[derive(Debug, Default)]
struct MockState {
    replies: VecDeque<MockReply>,
    prompts: Vec<String>,
}

/// A collaborator that returns scripted replies in order.
///
/// When the script runs out it answers with a plain narrative turn. Every
/// call records the last user message so tests can inspect prompts.
#[derive(Debug, Default)]
pub struct MockCollaborator {
    state: Mutex<MockState>,
}

impl MockCollaborator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a raw reply.
    pub fn with_reply(self, reply: impl Into<String>) -> Self {
        self.queue(MockReply::Text(reply.into()));
        self
    }

    /// Queue a failed call.
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.queue(MockReply::Failure(message.into()));
        self
    }

    /// Queue a well-formed turn reply.
    pub fn with_turn(self, text: &str, mid_term_memory: &str, commands: Vec<Value>) -> Self {
        self.queue(MockReply::Text(turn_json(text, mid_term_memory, commands)));
        self
    }

    /// Queue a reply through a shared reference.
    pub fn queue(&self, reply: MockReply) {
        self.lock().replies.push_back(reply);
    }

    /// Last user message of every call so far.
    pub fn prompts(&self) -> Vec<String> {
        self.lock().prompts.clone()
    }

    pub fn calls(&self) -> usize {
        self.lock().prompts.len()
    }

    pub fn remaining(&self) -> usize {
        self.lock().replies.len()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A reply in the per-turn JSON contract.
pub fn turn_json(text: &str, mid_term_memory: &str, commands: Vec<Value>) -> String {
    json!({
        "text": text,
        "mid_term_memory": mid_term_memory,
        "tavern_commands": commands,
        "action_options": ["继续"],
    })
    .to_string()
}

#[async_trait]
impl Collaborator for MockCollaborator {
    async fn generate_raw(
        &self,
        messages: &[ChatMessage],
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        let reply = {
            let mut state = self.lock();
            let prompt = messages
                .iter()
                .rev()
                .find(|m| m.role == ChatRole::User)
                .map(|m| m.content.clone())
                .unwrap_or_default();
            state.prompts.push(prompt);
            state.replies.pop_front()
        };

        let text = match reply {
            Some(MockReply::Text(text)) => text,
            Some(MockReply::Failure(message)) => return Err(CollaboratorError::Request(message)),
            None => turn_json("时间静静流逝。", "", Vec::new()),
        };

        if let Some(sink) = on_chunk {
            let chars: Vec<char> = text.chars().collect();
            for chunk in chars.chunks(CHUNK_CHARS) {
                sink(&chunk.iter().collect::<String>());
            }
        }
        Ok(text)
    }
}

/// Test harness for running scripted turns.
pub struct TestHarness {
    pub session: Session<MockCollaborator>,
}

impl TestHarness {
    /// A fresh game with events disabled and a fixed seed.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::new().with_events(false))
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            session: Session::new(MockCollaborator::new(), config).with_rng_seed(42),
        }
    }

    pub fn with_document(doc: Document, config: EngineConfig) -> Self {
        Self {
            session: Session::from_document(doc, MockCollaborator::new(), config)
                .with_rng_seed(42),
        }
    }

    /// Queue a turn reply.
    pub fn expect_turn(&mut self, text: &str, mid: &str, commands: Vec<Value>) -> &mut Self {
        self.session
            .collaborator()
            .queue(MockReply::Text(turn_json(text, mid, commands)));
        self
    }

    /// Queue any raw reply (summaries, events, malformed turns).
    pub fn expect_reply(&mut self, raw: impl Into<String>) -> &mut Self {
        self.session
            .collaborator()
            .queue(MockReply::Text(raw.into()));
        self
    }

    /// Play one turn.
    pub async fn input(&mut self, text: &str) -> Result<TurnReport, SessionError> {
        self.session.player_turn(text, None, &|| false).await
    }

    /// Apply commands without a turn.
    pub fn apply(&mut self, commands: &[Value]) -> ChangeLog {
        self.session.apply_commands(commands, &|| false)
    }

    pub fn doc(&self) -> &Document {
        self.session.document()
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.doc().get_str_path(path)
    }

    pub fn tier_len(&self, tier: MemoryTier) -> usize {
        tier_len(self.doc(), tier)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Assert the value at a dotted path.
#[track_caller]
pub fn assert_value(doc: &Document, path: &str, expected: Value) {
    assert_eq!(
        doc.get_str_path(path),
        Some(&expected),
        "unexpected value at {path}"
    );
}

/// Assert nothing exists at a dotted path.
#[track_caller]
pub fn assert_absent(doc: &Document, path: &str) {
    assert!(
        doc.get_str_path(path).is_none(),
        "expected nothing at {path}, found {:?}",
        doc.get_str_path(path)
    );
}

/// Assert a memory tier's length.
#[track_caller]
pub fn assert_tier_len(doc: &Document, tier: MemoryTier, expected: usize) {
    assert_eq!(tier_len(doc, tier), expected, "unexpected length of {tier}");
}

/// Assert the log applied a command to `key`.
#[track_caller]
pub fn assert_applied(log: &ChangeLog, key: &str) {
    assert!(
        log.applied().any(|e| e.key == key),
        "no applied change to {key} in:\n{log}"
    );
}

/// Assert the log rejected a command for `key`.
#[track_caller]
pub fn assert_rejected(log: &ChangeLog, key: &str) {
    assert!(
        log.iter().any(|e| e.key == key && !e.is_applied()),
        "no rejected change to {key} in:\n{log}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_script_then_defaults() {
        let ai = MockCollaborator::new()
            .with_reply("one")
            .with_failure("offline");

        assert_eq!(ai.generate("a", None).await.unwrap(), "one");
        assert!(matches!(
            ai.generate("b", None).await,
            Err(CollaboratorError::Request(m)) if m == "offline"
        ));
        let fallback = ai.generate("c", None).await.unwrap();
        assert!(fallback.contains("\"text\""));
        assert_eq!(ai.prompts(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mock_streams_whole_reply() {
        let ai = MockCollaborator::new().with_reply("一二三四五六七八九十");
        let mut chunks = Vec::new();
        let mut sink = |c: &str| chunks.push(c.to_string());
        let text = ai.generate("x", Some(&mut sink)).await.unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks.concat(), text);
    }

    #[tokio::test]
    async fn test_harness_turn() {
        let mut harness = TestHarness::new();
        harness.expect_turn(
            "你获得了一块灵石。",
            "得到灵石",
            vec![json!({"action": "add", "key": "角色.背包.灵石.下品", "value": 1})],
        );

        let report = harness.input("捡起来").await.unwrap();
        assert_applied(&report.change_log, "角色.背包.灵石.下品");
        assert_value(harness.doc(), "角色.背包.灵石.下品", json!(1));
        assert_tier_len(harness.doc(), MemoryTier::Short, 1);
        assert_absent(harness.doc(), "角色.背包.灵石.无");
    }
}
