//! Slack-backed [`MessagingGateway`].

use std::sync::Arc;

use async_trait::async_trait;
use prbot_core::{
    CredentialResolver, ErrorKind, GatewayError, GatewayResult, MessageSection, MessagingGateway,
    OutboundMessage, ReviewerSet,
};
use serde_json::{json, Value};

use crate::slack_api_client::SlackApiClient;

/// Renders message sections as Slack Block Kit blocks.
pub fn render_blocks(sections: &[MessageSection]) -> Vec<Value> {
    sections
        .iter()
        .map(|section| match section {
            MessageSection::Header(text) => json!({
                "type": "header",
                "text": {"type": "plain_text", "text": text, "emoji": true},
            }),
            MessageSection::Markdown(text) => json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": text},
            }),
            MessageSection::Divider => json!({"type": "divider"}),
            MessageSection::Context(text) => json!({
                "type": "context",
                "elements": [{"type": "mrkdwn", "text": text}],
            }),
        })
        .collect()
}

pub struct SlackGateway {
    client: SlackApiClient,
    credentials: Arc<dyn CredentialResolver>,
}

impl SlackGateway {
    pub fn new(client: SlackApiClient, credentials: Arc<dyn CredentialResolver>) -> Self {
        Self {
            client,
            credentials,
        }
    }

    /// Opens a modal in `team_id` using that workspace's bot token.
    pub async fn open_view(
        &self,
        team_id: &str,
        trigger_id: &str,
        view: &Value,
    ) -> GatewayResult<()> {
        let token = self.token(team_id).await?;
        self.client
            .open_view(&token, trigger_id, view)
            .await
            .map_err(|error| request_error("views.open", error))
    }

    async fn token(&self, team_id: &str) -> GatewayResult<String> {
        self.credentials
            .resolve_credential(team_id)
            .await
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => GatewayError::MissingCredential(team_id.to_string()),
                _ => GatewayError::CredentialLookup {
                    team_id: team_id.to_string(),
                    message: error.to_string(),
                },
            })
    }
}

fn request_error(operation: &'static str, error: anyhow::Error) -> GatewayError {
    GatewayError::Request {
        operation,
        message: format!("{error:#}"),
    }
}

#[async_trait]
impl MessagingGateway for SlackGateway {
    async fn post_message(&self, team_id: &str, message: &OutboundMessage) -> GatewayResult<String> {
        let token = self.token(team_id).await?;
        let blocks = render_blocks(&message.sections);
        let posted = self
            .client
            .post_message(
                &token,
                &message.channel_id,
                &message.text,
                &blocks,
                message.thread_key.as_deref(),
            )
            .await
            .map_err(|error| request_error("chat.postMessage", error))?;
        Ok(posted.ts)
    }

    async fn get_reaction_users(
        &self,
        team_id: &str,
        channel_id: &str,
        correlation_key: &str,
        reaction: &str,
    ) -> GatewayResult<ReviewerSet> {
        let token = self.token(team_id).await?;
        let users = self
            .client
            .reaction_users(&token, channel_id, correlation_key, reaction)
            .await
            .map_err(|error| request_error("reactions.get", error))?;
        Ok(users.into_iter().collect())
    }

    async fn user_display_name(&self, team_id: &str, user_id: &str) -> GatewayResult<String> {
        let token = self.token(team_id).await?;
        self.client
            .user_name(&token, user_id)
            .await
            .map_err(|error| request_error("users.info", error))
    }
}

#[cfg(test)]
mod tests {
    use super::{render_blocks, SlackGateway};
    use crate::slack_api_client::{SlackApiClient, SlackApiClientConfig};
    use httpmock::prelude::*;
    use chrono::{TimeZone, Utc};
    use prbot_core::{
        ErrorKind, GatewayError, MessageSection, MessagingGateway, NewReview, OutboundMessage,
        Review,
    };
    use prbot_engine::{NotificationDispatcher, Tier};
    use prbot_store::{InMemoryReviewStore, Workspace, WorkspaceStore};
    use serde_json::json;
    use std::sync::Arc;

    async fn gateway(server: &MockServer) -> SlackGateway {
        gateway_with_retries(server, 1).await
    }

    async fn gateway_with_retries(server: &MockServer, retry_max_attempts: usize) -> SlackGateway {
        let store = Arc::new(InMemoryReviewStore::new());
        store
            .upsert_workspace(Workspace {
                team_id: "T1".to_string(),
                team_name: "Acme".to_string(),
                access_token: "xoxb-acme".to_string(),
                bot_user_id: "UBOT".to_string(),
            })
            .await
            .expect("workspace");
        let client = SlackApiClient::new(&SlackApiClientConfig {
            api_base: server.base_url(),
            retry_max_attempts,
            retry_base_delay_ms: 1,
            ..SlackApiClientConfig::default()
        })
        .expect("client");
        SlackGateway::new(client, store)
    }

    #[test]
    fn unit_render_blocks_maps_each_section_kind() {
        let blocks = render_blocks(&[
            MessageSection::Header("🔍 New PR Review Request".to_string()),
            MessageSection::Markdown("*PR Link:* <https://x>".to_string()),
            MessageSection::Divider,
            MessageSection::Context("👀 = reviewing".to_string()),
        ]);
        assert_eq!(blocks[0]["type"], "header");
        assert_eq!(blocks[0]["text"]["type"], "plain_text");
        assert_eq!(blocks[1]["text"]["type"], "mrkdwn");
        assert_eq!(blocks[2], json!({"type": "divider"}));
        assert_eq!(blocks[3]["elements"][0]["text"], "👀 = reviewing");
    }

    #[tokio::test]
    async fn functional_post_message_uses_workspace_token() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-acme")
                .body_includes("\"thread_ts\":\"1.0\"");
            then.status(200)
                .json_body(json!({"ok": true, "channel": "C1", "ts": "1.5"}));
        });

        let message = OutboundMessage::text("C1", "reminder").in_thread("1.0");
        let ts = gateway(&server)
            .await
            .post_message("T1", &message)
            .await
            .expect("post");
        post.assert_calls(1);
        assert_eq!(ts, "1.5");
    }

    #[tokio::test]
    async fn regression_unknown_workspace_is_missing_credential() {
        let server = MockServer::start();
        let error = gateway(&server)
            .await
            .post_message("T404", &OutboundMessage::text("C1", "hi"))
            .await
            .expect_err("missing credential");
        assert_eq!(error, GatewayError::MissingCredential("T404".to_string()));
    }

    #[tokio::test]
    async fn functional_reaction_users_become_reviewer_set() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/reactions.get");
            then.status(200).json_body(json!({
                "ok": true,
                "message": {"reactions": [{"name": "eyes", "users": ["U2", "U1", "U2"]}]}
            }));
        });

        let users = gateway(&server)
            .await
            .get_reaction_users("T1", "C1", "1.0", "eyes")
            .await
            .expect("reactions");
        assert_eq!(users.iter().collect::<Vec<_>>(), vec!["U1", "U2"]);
    }

    #[tokio::test]
    async fn regression_slack_failure_maps_to_request_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.info");
            then.status(200)
                .json_body(json!({"ok": false, "error": "user_not_found"}));
        });

        let error = gateway(&server)
            .await
            .user_display_name("T1", "U404")
            .await
            .expect_err("user lookup");
        match error {
            GatewayError::Request { operation, message } => {
                assert_eq!(operation, "users.info");
                assert!(message.contains("user_not_found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn regression_reminder_dispatch_posts_once_when_slack_is_unavailable() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(503).body("unavailable");
        });
        let gateway = Arc::new(gateway_with_retries(&server, 3).await);
        let dispatcher = NotificationDispatcher::new(gateway);
        let review = Review::from_new(
            1,
            NewReview {
                pr_url: "https://github.com/acme/api/pull/5".to_string(),
                description: "cache warmup".to_string(),
                channel_id: "C1".to_string(),
                correlation_key: "1.0".to_string(),
                reviewers: ["U1"].into_iter().collect(),
                team_id: "T1".to_string(),
                created_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            },
        );
        let tier = Tier::Direct {
            recipients: review.reviewers.clone(),
        };

        let error = dispatcher
            .dispatch(&review, &tier)
            .await
            .expect_err("send failure");
        assert_eq!(error.kind(), ErrorKind::TransientGateway);
        post.assert_calls(1);
    }
}
