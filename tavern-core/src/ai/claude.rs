//! [`Collaborator`] backed by the Claude API.

use super::{ChatMessage, ChatRole, ChunkSink, Collaborator, CollaboratorError};
use ::claude::{Claude, Message, Request};
use async_trait::async_trait;
use futures::StreamExt;

/// Claude-backed collaborator.
#[derive(Clone)]
pub struct ClaudeCollaborator {
    client: Claude,
    max_tokens: usize,
    temperature: Option<f32>,
}

impl ClaudeCollaborator {
    pub fn new(client: Claude) -> Self {
        Self {
            client,
            max_tokens: 4096,
            temperature: Some(0.8),
        }
    }

    /// Build from `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Result<Self, CollaboratorError> {
        Ok(Self::new(Claude::from_env()?))
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn build_request(&self, messages: &[ChatMessage]) -> Request {
        // The API takes system text separately from the turn list.
        let system: Vec<&str> = messages
            .iter()
            .filter(|m| m.role == ChatRole::System)
            .map(|m| m.content.as_str())
            .collect();

        let turns = messages
            .iter()
            .filter_map(|m| match m.role {
                ChatRole::User => Some(Message::user(&m.content)),
                ChatRole::Assistant => Some(Message::assistant(&m.content)),
                ChatRole::System => None,
            })
            .collect();

        let mut request = Request::new(turns).with_max_tokens(self.max_tokens);
        if !system.is_empty() {
            request = request.with_system(system.join("\n\n"));
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

#[async_trait]
impl Collaborator for ClaudeCollaborator {
    async fn generate_raw(
        &self,
        messages: &[ChatMessage],
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        let request = self.build_request(messages);

        let text = match on_chunk {
            None => self.client.complete(request).await?.text,
            Some(sink) => {
                let mut stream = self.client.stream_text(request).await?;
                let mut text = String::new();
                while let Some(delta) = stream.next().await {
                    let delta = delta?;
                    sink(delta.as_str());
                    text.push_str(&delta);
                }
                text
            }
        };

        if text.trim().is_empty() {
            tracing::warn!(model = self.client.model(), "Claude returned an empty reply");
            return Err(CollaboratorError::Empty);
        }
        Ok(text)
    }
}
