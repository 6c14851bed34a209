//! Recovering a turn response from whatever text the model produced.
//!
//! The model is asked for a JSON object, but routinely wraps it in a code
//! fence, surrounds it with chatter, or emits something that is not JSON at
//! all. [`parse_response`] runs an ordered list of named strategies and takes
//! the first that succeeds; the last resort treats the whole reply as
//! narrative, so a turn always has text.

use lazy_static::lazy_static;
use regex_lite::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// Offered when the model gives the player no choices.
pub const DEFAULT_ACTION_OPTIONS: [&str; 3] = ["继续前进", "观察周围", "原地休整"];

/// Why a single strategy could not read the reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not valid JSON: {0}")]
    Json(String),

    #[error("no fenced code block")]
    NoFence,

    #[error("no JSON object in the reply")]
    NoObject,

    #[error("no \"text\" field in the reply")]
    NoTextField,

    #[error("reply JSON is {0}, not an object")]
    NotAnObject(&'static str),

    #[error("reply has no narrative text")]
    MissingText,
}

/// The per-turn payload the model is asked to produce.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnResponse {
    pub text: String,
    pub mid_term_memory: String,
    /// Commands exactly as the model wrote them; the pipeline vets them.
    pub tavern_commands: Vec<Value>,
    pub action_options: Vec<String>,
}

impl TurnResponse {
    /// A narrative-only response with the default choices.
    pub fn narrative(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action_options: default_options(),
            ..Self::default()
        }
    }

    fn from_object(map: &Map<String, Value>) -> Result<Self, ParseError> {
        let text = string_field(map, &["text", "narrative", "正文"]).unwrap_or_default();
        if text.trim().is_empty() {
            return Err(ParseError::MissingText);
        }

        let tavern_commands = match field(map, &["tavern_commands", "tavernCommands", "commands"]) {
            Some(Value::Array(items)) => items.clone(),
            Some(single @ Value::Object(_)) => vec![single.clone()],
            _ => Vec::new(),
        };

        let mut action_options: Vec<String> =
            match field(map, &["action_options", "actionOptions", "options"]) {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Null => None,
                        other => Some(other.to_string()),
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
                _ => Vec::new(),
            };
        if action_options.is_empty() {
            action_options = default_options();
        }

        Ok(Self {
            text,
            mid_term_memory: string_field(map, &["mid_term_memory", "midTermMemory", "中期记忆"])
                .unwrap_or_default(),
            tavern_commands,
            action_options,
        })
    }
}

fn default_options() -> Vec<String> {
    DEFAULT_ACTION_OPTIONS.iter().map(|s| s.to_string()).collect()
}

fn field<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|n| map.get(*n))
}

fn string_field(map: &Map<String, Value>, names: &[&str]) -> Option<String> {
    field(map, names).and_then(Value::as_str).map(str::to_string)
}

/// Which strategy produced a response, plus what the earlier ones hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub response: TurnResponse,
    pub strategy: &'static str,
    pub errors: Vec<ParseError>,
}

impl ParseOutcome {
    /// True when only narrative could be salvaged and commands were lost.
    pub fn is_degraded(&self) -> bool {
        matches!(self.strategy, "text_field" | "raw_narrative")
    }
}

type Strategy = fn(&str) -> Result<TurnResponse, ParseError>;

const STRATEGIES: &[(&str, Strategy)] = &[
    ("direct", direct),
    ("fenced", fenced),
    ("embedded_object", embedded_object),
    ("text_field", text_field),
];

/// Parse a raw reply. Never fails.
pub fn parse_response(raw: &str) -> ParseOutcome {
    let mut errors = Vec::new();
    for (name, strategy) in STRATEGIES {
        match strategy(raw) {
            Ok(response) => {
                if !errors.is_empty() {
                    tracing::debug!(strategy = *name, failed = errors.len(), "recovered AI reply");
                }
                return ParseOutcome {
                    response,
                    strategy: *name,
                    errors,
                };
            }
            Err(e) => errors.push(e),
        }
    }

    tracing::warn!(
        errors = ?errors,
        "AI reply could not be parsed; using it as plain narrative"
    );
    ParseOutcome {
        response: TurnResponse::narrative(raw.trim()),
        strategy: "raw_narrative",
        errors,
    }
}

fn parse_object(json: &str) -> Result<TurnResponse, ParseError> {
    let value: Value = serde_json::from_str(json).map_err(|e| ParseError::Json(e.to_string()))?;
    match &value {
        Value::Object(map) => TurnResponse::from_object(map),
        other => Err(ParseError::NotAnObject(crate::document::path::type_name(other))),
    }
}

fn direct(raw: &str) -> Result<TurnResponse, ParseError> {
    parse_object(raw.trim())
}

/// The contents of the first ```json fence, or failing that any ``` fence.
pub fn extract_fenced(text: &str) -> Option<&str> {
    let text = text.trim();

    if let Some(start) = text.find("```json") {
        let content_start = start + 7;
        if let Some(end) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end].trim());
        }
    }

    if let Some(start) = text.find("```") {
        let content_start = start + 3;
        if let Some(end) = text[content_start..].find("```") {
            return Some(text[content_start..content_start + end].trim());
        }
    }

    None
}

/// The span from the first `{` to the last `}`.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn fenced(raw: &str) -> Result<TurnResponse, ParseError> {
    parse_object(extract_fenced(raw).ok_or(ParseError::NoFence)?)
}

fn embedded_object(raw: &str) -> Result<TurnResponse, ParseError> {
    parse_object(extract_object(raw).ok_or(ParseError::NoObject)?)
}

lazy_static! {
    static ref TEXT_FIELD: Regex =
        Regex::new(r#""text"\s*:\s*"((?:[^"\\]|\\.)*)""#).expect("valid text-field pattern");
    static ref MID_FIELD: Regex = Regex::new(r#""mid_term_memory"\s*:\s*"((?:[^"\\]|\\.)*)""#)
        .expect("valid memory-field pattern");
}

fn unescape(captured: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{captured}\"")).unwrap_or_else(|_| captured.to_string())
}

/// Pull just the `text` (and `mid_term_memory`) strings out of broken JSON.
fn text_field(raw: &str) -> Result<TurnResponse, ParseError> {
    let text = TEXT_FIELD
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| unescape(m.as_str()))
        .ok_or(ParseError::NoTextField)?;
    if text.trim().is_empty() {
        return Err(ParseError::MissingText);
    }

    let mut response = TurnResponse::narrative(text);
    if let Some(mid) = MID_FIELD.captures(raw).and_then(|c| c.get(1)) {
        response.mid_term_memory = unescape(mid.as_str());
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_direct_json() {
        let raw = json!({
            "text": "你走进了客栈。",
            "mid_term_memory": "进入客栈",
            "tavern_commands": [{"action": "set", "key": "世界.地点", "value": "客栈"}],
            "action_options": ["点菜", "打听消息"]
        })
        .to_string();

        let outcome = parse_response(&raw);
        assert_eq!(outcome.strategy, "direct");
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.response.text, "你走进了客栈。");
        assert_eq!(outcome.response.mid_term_memory, "进入客栈");
        assert_eq!(outcome.response.tavern_commands.len(), 1);
        assert_eq!(outcome.response.action_options, vec!["点菜", "打听消息"]);
    }

    #[test]
    fn test_fenced_json() {
        let raw = "好的：\n```json\n{\"text\": \"山风呼啸\", \"tavern_commands\": []}\n```\n";
        let outcome = parse_response(raw);
        assert_eq!(outcome.strategy, "fenced");
        assert_eq!(outcome.response.text, "山风呼啸");
        assert_eq!(outcome.response.action_options.len(), 3);
    }

    #[test]
    fn test_embedded_object_recovers_text() {
        let outcome = parse_response("Sure! {\"text\":\"...\"} done.");
        assert_eq!(outcome.strategy, "embedded_object");
        assert_eq!(outcome.response.text, "...");
        assert!(!outcome.is_degraded());
    }

    #[test]
    fn test_text_field_from_broken_json() {
        let raw = r#"{"text": "他说：\"走吧\"", "mid_term_memory": "同行", "tavern_commands": [ {"action": "#;
        let outcome = parse_response(raw);
        assert_eq!(outcome.strategy, "text_field");
        assert_eq!(outcome.response.text, "他说：\"走吧\"");
        assert_eq!(outcome.response.mid_term_memory, "同行");
        assert!(outcome.response.tavern_commands.is_empty());
        assert!(outcome.is_degraded());
    }

    #[test]
    fn test_raw_narrative_last_resort() {
        let outcome = parse_response("  月色如水，四下无人。  ");
        assert_eq!(outcome.strategy, "raw_narrative");
        assert_eq!(outcome.response.text, "月色如水，四下无人。");
        assert_eq!(outcome.response.action_options, default_options());
        assert_eq!(outcome.errors.len(), STRATEGIES.len());
    }

    #[test]
    fn test_object_without_text_falls_through() {
        let outcome = parse_response(r#"{"tavern_commands": []}"#);
        assert_eq!(outcome.strategy, "raw_narrative");
        assert!(outcome.errors.contains(&ParseError::MissingText));
    }

    #[test]
    fn test_single_command_object_accepted() {
        let raw = r#"{"text": "x", "tavern_commands": {"action": "delete", "key": "世界.a"}}"#;
        assert_eq!(parse_response(raw).response.tavern_commands.len(), 1);
    }

    #[test]
    fn test_extract_fenced_without_specifier() {
        assert_eq!(extract_fenced("```\n{\"a\": 1}\n```"), Some("{\"a\": 1}"));
        assert_eq!(extract_fenced("no fence"), None);
    }
}
