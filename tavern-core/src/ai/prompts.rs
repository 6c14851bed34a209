//! Prompt builders.
//!
//! Only the structural contract lives here (what JSON the model must return
//! and what context it sees); game content comes from the document itself.

use super::ChatMessage;
use crate::clock::ClockTime;
use crate::document::Document;
use crate::events::EventState;
use crate::memory::{read_tier, MemoryEntry, MemoryTier};

const TURN_CONTRACT: &str = r#"你是这个修仙世界的叙事者。每一回合只输出一个 JSON 对象，不要输出其它内容：
{
  "text": "本回合的叙事正文",
  "mid_term_memory": "一句话概括本回合，供中期记忆使用",
  "tavern_commands": [
    { "action": "set|add|push|delete|pull", "key": "角色.属性.声望", "value": 10 }
  ],
  "action_options": ["玩家可选的下一步行动"]
}
key 必须以 元数据、角色、社交、世界、系统 之一开头。"#;

fn render_entries(entries: &[MemoryEntry]) -> String {
    entries
        .iter()
        .map(|e| match e.time {
            Some(t) => format!("- [{t}] {}", e.content),
            None => format!("- {}", e.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// System context: the rules of the reply format plus the current state.
pub fn system_context(doc: &Document) -> String {
    let mut context = String::from(TURN_CONTRACT);

    context.push_str(&format!("\n\n## 当前时间\n{}\n", doc.clock()));

    let state = serde_json::to_string(&doc.actor).unwrap_or_default();
    context.push_str(&format!("\n## 角色状态\n{state}\n"));

    for (title, tier) in [
        ("长期记忆", MemoryTier::Long),
        ("中期记忆", MemoryTier::Mid),
    ] {
        let entries = read_tier(doc, tier);
        if !entries.is_empty() {
            context.push_str(&format!("\n## {title}\n{}\n", render_entries(&entries)));
        }
    }

    context
}

/// The message list for one player turn.
///
/// Short-term memory is replayed as prior assistant turns so the model sees
/// its own recent narration verbatim.
pub fn turn_messages(doc: &Document, player_input: &str) -> Vec<ChatMessage> {
    let mut messages = vec![ChatMessage::system(system_context(doc))];
    for entry in read_tier(doc, MemoryTier::Short) {
        messages.push(ChatMessage::assistant(entry.content));
    }
    messages.push(ChatMessage::user(player_input));
    messages
}

/// Ask for a single summary of `entries`.
pub fn compaction_prompt(entries: &[MemoryEntry]) -> String {
    format!(
        "将以下按时间排列的中期记忆压缩为一段连贯的长期记忆，保留人物、地点、因果和未完结的线索。\
         只输出总结正文。\n\n{}",
        render_entries(entries)
    )
}

/// Past events named in the event prompt.
const RECENT_EVENTS: usize = 5;

/// Ask for one world event as JSON.
pub fn event_prompt(doc: &Document, now: &ClockTime) -> String {
    let recent = read_tier(doc, MemoryTier::Short);
    let mut prompt = format!(
        "现在是{now}。请为这个修仙世界生成一个正在发生的世界事件，只输出一个 JSON 对象：\n\
         {{\"名称\": \"事件名\", \"类型\": \"事件类型\", \"描述\": \"事件经过\", \
         \"影响等级\": \"轻微|中等|重大\", \"影响范围\": [\"受影响的势力或资源\"]}}\n"
    );
    if !recent.is_empty() {
        prompt.push_str(&format!("\n近期发生的事：\n{}\n", render_entries(&recent)));
    }

    let past = EventState::read(doc).log;
    if !past.is_empty() {
        let names: Vec<&str> = past
            .iter()
            .rev()
            .take(RECENT_EVENTS)
            .map(|e| e.name.as_str())
            .collect();
        prompt.push_str(&format!("\n已经发生过的世界事件，不要重复：{}\n", names.join("、")));
    }
    prompt
}
