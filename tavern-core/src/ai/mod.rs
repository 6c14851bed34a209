//! The AI collaborator seam.
//!
//! The engine never talks to a model directly. Narrative turns, memory
//! summaries and world events all go through [`Collaborator`], which the game
//! backs with Claude and tests back with [`crate::testing::MockCollaborator`].

pub mod claude;
pub mod prompts;
pub mod response;

pub use self::claude::ClaudeCollaborator;
pub use response::{parse_response, ParseError, ParseOutcome, TurnResponse};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from the AI collaborator.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("AI request failed: {0}")]
    Request(String),

    #[error("AI response was empty")]
    Empty,

    #[error("AI request aborted")]
    Aborted,
}

impl From<::claude::Error> for CollaboratorError {
    fn from(err: ::claude::Error) -> Self {
        CollaboratorError::Request(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// One role-tagged message for [`Collaborator::generate_raw`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Receives streamed text as it arrives.
pub type ChunkSink<'a> = Option<&'a mut (dyn FnMut(&str) + Send)>;

/// A text-generation service.
///
/// Both entry points may stream through `on_chunk`, but always resolve to the
/// complete text.
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Generate from an explicit, ordered message list.
    async fn generate_raw(
        &self,
        messages: &[ChatMessage],
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError>;

    /// Generate from a single prompt.
    async fn generate(
        &self,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        self.generate_raw(&[ChatMessage::user(prompt)], on_chunk)
            .await
    }
}

#[async_trait]
impl<T: Collaborator + ?Sized> Collaborator for std::sync::Arc<T> {
    async fn generate_raw(
        &self,
        messages: &[ChatMessage],
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        (**self).generate_raw(messages, on_chunk).await
    }

    async fn generate(
        &self,
        prompt: &str,
        on_chunk: ChunkSink<'_>,
    ) -> Result<String, CollaboratorError> {
        (**self).generate(prompt, on_chunk).await
    }
}
