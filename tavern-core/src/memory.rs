//! Tiered narrative memory.
//!
//! Every narrated turn lands in short-term memory, and in lockstep a rough
//! one-line placeholder lands in implicit mid-term memory. When short-term
//! overflows, its oldest entry is evicted and the paired placeholder is
//! promoted into mid-term. Short-term entries written any other way (a
//! command push, a world event) get a placeholder of their own through
//! [`pair_implicit`], so the two tiers stay one-to-one. Once mid-term grows past a threshold, its oldest
//! entries are summarized by the AI collaborator into a single long-term entry.
//!
//! Compaction is the only async step, and it must never run twice at once.
//! It is split into three phases so the document is never borrowed across the
//! AI call:
//!
//! 1. [`MemoryManager::try_begin`] takes the lock and snapshots the sources.
//! 2. [`CompactionJob::summarize`] asks the collaborator for a summary.
//! 3. [`CompactionJob::commit`] swaps the sources for the summary.
//!
//! The lock is released when the job is dropped, whatever the outcome.

use crate::ai::{prompts, Collaborator, CollaboratorError};
use crate::clock::ClockTime;
use crate::config::EngineConfig;
use crate::document::{self, schema, Document, Path};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Characters kept when text stands in for a missing mid-term summary.
pub const FALLBACK_CHARS: usize = 200;

/// The four memory buckets under `社交.记忆`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryTier {
    Short,
    Mid,
    Long,
    ImplicitMid,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 4] = [
        MemoryTier::Short,
        MemoryTier::Mid,
        MemoryTier::Long,
        MemoryTier::ImplicitMid,
    ];

    pub fn key(self) -> &'static str {
        match self {
            MemoryTier::Short => "短期记忆",
            MemoryTier::Mid => "中期记忆",
            MemoryTier::Long => "长期记忆",
            MemoryTier::ImplicitMid => "隐式中期记忆",
        }
    }

    /// `社交.记忆.<tier>`.
    pub fn path(self) -> Path {
        Path::new(crate::document::Domain::Social, Vec::new())
            .child(schema::keys::MEMORY)
            .child(self.key())
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One remembered line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    #[serde(rename = "内容", alias = "content", alias = "text")]
    pub content: String,

    #[serde(
        rename = "时间",
        alias = "time",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<ClockTime>,
}

impl MemoryEntry {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            time: None,
        }
    }

    pub fn at(content: impl Into<String>, time: ClockTime) -> Self {
        Self {
            content: content.into(),
            time: Some(time),
        }
    }

    /// Read an entry from any shape seen in saves: a bare string or an object.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(Self::new(s.clone())),
            Value::Object(_) => serde_json::from_value(normalize_entry(value.clone())).ok(),
            Value::Null => None,
            other => Some(Self::new(other.to_string())),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// A copy whose content is cut to `max_chars` characters.
    pub fn truncated(&self, max_chars: usize) -> Self {
        Self {
            content: truncate_chars(&self.content, max_chars),
            time: self.time,
        }
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect()
    } else {
        text.to_string()
    }
}

/// Rewrite an entry value into the canonical `{内容, 时间?}` object.
///
/// Extra fields on object entries are kept.
pub fn normalize_entry(value: Value) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        Value::String(s) => {
            let mut map = Map::new();
            map.insert("内容".into(), Value::String(s));
            return Value::Object(map);
        }
        other => {
            let mut map = Map::new();
            map.insert("内容".into(), Value::String(other.to_string()));
            return Value::Object(map);
        }
    };

    if !map.contains_key("内容") {
        let content = ["content", "text"]
            .iter()
            .find_map(|k| map.remove(*k))
            .unwrap_or_else(|| Value::String(String::new()));
        let content = match content {
            Value::String(s) => Value::String(s),
            other => Value::String(other.to_string()),
        };
        map.insert("内容".into(), content);
    }
    if !map.contains_key("时间") {
        if let Some(time) = map.remove("time") {
            map.insert("时间".into(), time);
        }
    }
    if map.get("时间").is_some_and(Value::is_null) {
        map.remove("时间");
    }
    Value::Object(map)
}

/// Normalize an entry headed for `tier` and stamp it with `clock` unless it
/// already carries a time. Implicit mid-term entries are left unstamped.
pub fn stamp_entry(value: Value, tier: MemoryTier, clock: &ClockTime) -> Value {
    let mut value = normalize_entry(value);
    if tier != MemoryTier::ImplicitMid {
        if let Value::Object(map) = &mut value {
            map.entry("时间")
                .or_insert_with(|| crate::document::clock_value(clock));
        }
    }
    value
}

/// Read a tier, skipping entries that cannot be interpreted.
pub fn read_tier(doc: &Document, tier: MemoryTier) -> Vec<MemoryEntry> {
    match doc.get(&tier.path()) {
        Some(Value::Array(items)) => items.iter().filter_map(MemoryEntry::from_value).collect(),
        _ => Vec::new(),
    }
}

fn tier_items_mut(doc: &mut Document, tier: MemoryTier) -> &mut Vec<Value> {
    let memory = doc
        .social
        .entry(schema::keys::MEMORY)
        .or_insert_with(|| Value::Object(Map::new()));
    let slot = document::object_mut(memory)
        .entry(tier.key())
        .or_insert_with(|| Value::Array(Vec::new()));
    document::array_mut(slot)
}

pub fn tier_len(doc: &Document, tier: MemoryTier) -> usize {
    doc.get(&tier.path())
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// The raw entries of a tier.
pub fn tier_values(doc: &Document, tier: MemoryTier) -> Vec<Value> {
    match doc.get(&tier.path()) {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

/// The implicit mid-term placeholder for a short-term entry written without
/// one: the start of its own text.
fn placeholder_for(entry: &Value) -> Value {
    let content = MemoryEntry::from_value(entry)
        .map(|e| e.content)
        .unwrap_or_default();
    MemoryEntry::new(truncate_chars(content.trim(), FALLBACK_CHARS)).to_value()
}

/// Rebuild implicit mid-term so it pairs one-to-one with short-term.
///
/// `before` is short-term as it stood when implicit mid-term last matched it,
/// paired from the newest end. Entries still present keep their placeholder,
/// new entries get one from their own text, and placeholders whose entry is
/// gone are dropped. Returns how many were dropped.
pub fn pair_implicit(doc: &mut Document, before: &[Value]) -> usize {
    let short = tier_values(doc, MemoryTier::Short);
    let old = std::mem::take(tier_items_mut(doc, MemoryTier::ImplicitMid));

    let mut cursor = 0;
    let mut kept = 0;
    let mut paired = Vec::with_capacity(short.len());
    for entry in &short {
        let existing = match (cursor..before.len()).find(|&j| before[j] == *entry) {
            Some(j) => {
                cursor = j + 1;
                (j + old.len())
                    .checked_sub(before.len())
                    .and_then(|i| old.get(i).cloned())
            }
            None => None,
        };
        if existing.is_some() {
            kept += 1;
        }
        paired.push(existing.unwrap_or_else(|| placeholder_for(entry)));
    }

    *tier_items_mut(doc, MemoryTier::ImplicitMid) = paired;
    let dropped = old.len().saturating_sub(kept);
    if dropped > 0 {
        tracing::debug!(dropped, "implicit mid-term placeholders re-paired");
    }
    dropped
}

/// Errors from memory compaction.
#[derive(Debug, Clone, Error)]
pub enum CompactionError {
    #[error("memory compaction is already running")]
    AlreadyRunning,

    #[error("summarizer returned an empty summary; mid-term memory kept as is")]
    EmptySummary,

    #[error("summarizer failed: {0}")]
    Collaborator(#[from] CollaboratorError),

    #[error("mid-term memory changed while summarizing; nothing was replaced")]
    SourcesChanged,
}

/// A short-term entry leaving the window and what took its place in mid-term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub evicted: MemoryEntry,
    pub promoted: MemoryEntry,
    /// True when no implicit placeholder existed and the evicted text was
    /// truncated instead.
    pub fallback: bool,
}

/// Applies the tier rules to a document.
///
/// Cloning a manager shares its compaction lock.
#[derive(Debug, Clone)]
pub struct MemoryManager {
    short_limit: usize,
    trigger: usize,
    keep: usize,
    compacting: Arc<AtomicBool>,
}

impl MemoryManager {
    pub fn new(config: &EngineConfig) -> Self {
        let config = config.clone().validated();
        Self {
            short_limit: config.short_term_limit,
            trigger: config.mid_term_trigger_threshold,
            keep: config.mid_term_keep_count,
            compacting: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn short_limit(&self) -> usize {
        self.short_limit
    }

    /// Record a narrated turn: the full text into short-term, and `mid_hint`
    /// (or the start of the text) into implicit mid-term. Then enforce limits.
    pub fn append_turn(&self, doc: &mut Document, text: &str, mid_hint: &str) -> Vec<Eviction> {
        let clock = doc.clock();
        let hint = if mid_hint.trim().is_empty() {
            truncate_chars(text.trim(), FALLBACK_CHARS)
        } else {
            mid_hint.trim().to_string()
        };

        tier_items_mut(doc, MemoryTier::Short).push(MemoryEntry::at(text, clock).to_value());
        tier_items_mut(doc, MemoryTier::ImplicitMid).push(MemoryEntry::new(hint).to_value());

        self.enforce_limits(doc)
    }

    /// Evict from short-term until it fits, promoting one mid-term entry per
    /// eviction.
    pub fn enforce_limits(&self, doc: &mut Document) -> Vec<Eviction> {
        let mut evictions = Vec::new();

        while tier_len(doc, MemoryTier::Short) > self.short_limit {
            let raw = tier_items_mut(doc, MemoryTier::Short).remove(0);
            let evicted = MemoryEntry::from_value(&raw).unwrap_or_else(|| MemoryEntry::new(""));

            let implicit = tier_items_mut(doc, MemoryTier::ImplicitMid);
            let placeholder = if implicit.is_empty() {
                None
            } else {
                MemoryEntry::from_value(&implicit.remove(0))
            };

            let (promoted, fallback) = match placeholder {
                Some(mut entry) => {
                    entry.time = entry.time.or(evicted.time);
                    (entry, false)
                }
                None => (evicted.truncated(FALLBACK_CHARS), true),
            };

            tier_items_mut(doc, MemoryTier::Mid).push(promoted.to_value());
            tracing::debug!(fallback, "short-term memory evicted into mid-term");
            evictions.push(Eviction {
                evicted,
                promoted,
                fallback,
            });
        }

        evictions
    }

    /// Whether mid-term has reached the compaction trigger.
    pub fn needs_compaction(&self, doc: &Document) -> bool {
        tier_len(doc, MemoryTier::Mid) >= self.trigger
    }

    pub fn is_compacting(&self) -> bool {
        self.compacting.load(Ordering::SeqCst)
    }

    /// Start a compaction if one is due.
    ///
    /// Returns `Ok(None)` below the trigger and `Err(AlreadyRunning)` while
    /// another job holds the lock.
    pub fn try_begin(&self, doc: &Document) -> Result<Option<CompactionJob>, CompactionError> {
        if !self.needs_compaction(doc) {
            return Ok(None);
        }

        let guard = CompactionGuard::acquire(&self.compacting)?;
        let count = self.trigger.saturating_sub(self.keep).max(1);
        let sources: Vec<Value> = match doc.get(&MemoryTier::Mid.path()) {
            Some(Value::Array(items)) => items.iter().take(count).cloned().collect(),
            _ => Vec::new(),
        };

        tracing::info!(sources = sources.len(), "memory compaction started");
        Ok(Some(CompactionJob {
            sources,
            _guard: guard,
        }))
    }
}

/// Holds the compaction lock; releases it on drop.
#[derive(Debug)]
pub struct CompactionGuard {
    flag: Arc<AtomicBool>,
}

impl CompactionGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self, CompactionError> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| CompactionError::AlreadyRunning)?;
        Ok(Self { flag: flag.clone() })
    }
}

impl Drop for CompactionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// An in-flight compaction: the snapshotted sources plus the lock.
#[derive(Debug)]
pub struct CompactionJob {
    sources: Vec<Value>,
    _guard: CompactionGuard,
}

impl CompactionJob {
    pub fn sources(&self) -> Vec<MemoryEntry> {
        self.sources
            .iter()
            .filter_map(MemoryEntry::from_value)
            .collect()
    }

    /// Ask the collaborator to summarize the sources.
    pub async fn summarize<C>(&self, collaborator: &C) -> Result<String, CompactionError>
    where
        C: Collaborator + ?Sized,
    {
        let prompt = prompts::compaction_prompt(&self.sources());
        let summary = collaborator.generate(&prompt, None).await?;
        let summary = summary.trim().to_string();
        if summary.is_empty() {
            return Err(CompactionError::EmptySummary);
        }
        Ok(summary)
    }

    /// Replace the snapshotted mid-term entries with one long-term entry.
    ///
    /// Fails without touching the document if the summary is empty or the
    /// oldest mid-term entries are no longer the ones that were summarized.
    pub fn commit(self, doc: &mut Document, summary: &str) -> Result<MemoryEntry, CompactionError> {
        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CompactionError::EmptySummary);
        }

        let count = self.sources.len();
        let mid = tier_items_mut(doc, MemoryTier::Mid);
        if mid.len() < count || mid[..count] != self.sources[..] {
            tracing::warn!("mid-term memory changed during compaction");
            return Err(CompactionError::SourcesChanged);
        }
        mid.drain(..count);

        let entry = MemoryEntry::at(summary, doc.clock());
        tier_items_mut(doc, MemoryTier::Long).push(entry.to_value());
        tracing::info!(compacted = count, "memory compaction committed");
        Ok(entry)
    }
}

/// Run a full compaction cycle if one is due.
pub async fn compact<C>(
    manager: &MemoryManager,
    doc: &mut Document,
    collaborator: &C,
) -> Result<Option<MemoryEntry>, CompactionError>
where
    C: Collaborator + ?Sized,
{
    let Some(job) = manager.try_begin(doc)? else {
        return Ok(None);
    };
    let summary = job.summarize(collaborator).await?;
    job.commit(doc, &summary).map(Some)
}
