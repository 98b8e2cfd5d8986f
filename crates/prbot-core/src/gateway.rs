//! Collaborator contracts for chat messaging and workspace credentials.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::{ReviewError, ReviewResult};
use crate::review::ReviewerSet;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised by a [`MessagingGateway`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("no credential registered for workspace '{0}'")]
    MissingCredential(String),
    #[error("credential lookup for workspace '{team_id}' failed: {message}")]
    CredentialLookup { team_id: String, message: String },
    #[error("{operation} failed: {message}")]
    Request {
        operation: &'static str,
        message: String,
    },
}

impl From<GatewayError> for ReviewError {
    fn from(error: GatewayError) -> Self {
        match error {
            GatewayError::MissingCredential(team_id) => {
                ReviewError::NotFound(format!("workspace {team_id}"))
            }
            other => ReviewError::TransientGateway(other.to_string()),
        }
    }
}

/// Structural piece of an outbound message, rendered by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSection {
    Header(String),
    Markdown(String),
    Divider,
    Context(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub channel_id: String,
    /// Plain fallback text; also the full body when `sections` is empty.
    pub text: String,
    pub sections: Vec<MessageSection>,
    /// Correlation key of the parent message when replying in a thread.
    pub thread_key: Option<String>,
}

impl OutboundMessage {
    pub fn text(channel_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            text: text.into(),
            sections: Vec::new(),
            thread_key: None,
        }
    }

    pub fn with_sections(mut self, sections: Vec<MessageSection>) -> Self {
        self.sections = sections;
        self
    }

    pub fn in_thread(mut self, thread_key: impl Into<String>) -> Self {
        self.thread_key = Some(thread_key.into());
        self
    }
}

/// Chat platform operations the engine relies on. Every call is scoped to a
/// workspace so implementations can resolve per-team credentials.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Posts a message and returns the correlation key of the new message.
    async fn post_message(&self, team_id: &str, message: &OutboundMessage) -> GatewayResult<String>;

    /// Returns the users who attached `reaction` to the message `correlation_key`.
    async fn get_reaction_users(
        &self,
        team_id: &str,
        channel_id: &str,
        correlation_key: &str,
        reaction: &str,
    ) -> GatewayResult<ReviewerSet>;

    async fn user_display_name(&self, team_id: &str, user_id: &str) -> GatewayResult<String>;
}

/// Read-only access to per-workspace credentials.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Returns the bot token for `team_id`, or `ReviewError::NotFound`.
    async fn resolve_credential(&self, team_id: &str) -> ReviewResult<String>;
}

#[cfg(test)]
mod tests {
    use super::{GatewayError, MessageSection, OutboundMessage};
    use crate::error::{ErrorKind, ReviewError};

    #[test]
    fn unit_outbound_message_builder_sets_thread_and_sections() {
        let message = OutboundMessage::text("C1", "hello")
            .with_sections(vec![MessageSection::Divider])
            .in_thread("1.0");
        assert_eq!(message.channel_id, "C1");
        assert_eq!(message.thread_key.as_deref(), Some("1.0"));
        assert_eq!(message.sections, vec![MessageSection::Divider]);
    }

    #[test]
    fn unit_gateway_errors_map_into_review_taxonomy() {
        let missing: ReviewError = GatewayError::MissingCredential("T1".to_string()).into();
        assert_eq!(missing.kind(), ErrorKind::NotFound);

        let request: ReviewError = GatewayError::Request {
            operation: "chat.postMessage",
            message: "status 500".to_string(),
        }
        .into();
        assert_eq!(request.kind(), ErrorKind::TransientGateway);
        assert!(request.to_string().contains("chat.postMessage"));
    }
}
