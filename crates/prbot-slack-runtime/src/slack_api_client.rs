//! Slack Web API client used by the messaging gateway.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::slack_helpers::{
    is_retryable_slack_status, is_retryable_transport_error, parse_retry_after, retry_delay,
    truncate_for_error,
};

pub const DEFAULT_SLACK_API_BASE: &str = "https://slack.com/api";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackApiClientConfig {
    pub api_base: String,
    pub request_timeout_ms: u64,
    pub retry_max_attempts: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for SlackApiClientConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_SLACK_API_BASE.to_string(),
            request_timeout_ms: 10_000,
            retry_max_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SlackChatMessageResponse {
    ok: bool,
    ts: Option<String>,
    channel: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackAckResponse {
    ok: bool,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReactionsGetResponse {
    ok: bool,
    message: Option<SlackReactedItem>,
    error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SlackReactedItem {
    #[serde(default)]
    reactions: Vec<SlackReaction>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackReaction {
    name: String,
    #[serde(default)]
    users: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUsersInfoResponse {
    ok: bool,
    user: Option<SlackUser>,
    error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUser {
    id: String,
    name: Option<String>,
    real_name: Option<String>,
    profile: Option<SlackUserProfile>,
}

#[derive(Debug, Clone, Deserialize)]
struct SlackUserProfile {
    real_name: Option<String>,
    display_name: Option<String>,
}

impl SlackUser {
    fn preferred_name(self) -> String {
        let profile = self.profile;
        [
            self.real_name,
            profile.as_ref().and_then(|profile| profile.real_name.clone()),
            profile.and_then(|profile| profile.display_name),
            self.name,
        ]
        .into_iter()
        .flatten()
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
        .unwrap_or(self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestRetry {
    Once,
    Budget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackPostedMessage {
    pub channel: String,
    pub ts: String,
}

/// Thin Slack Web API client. The bot token is supplied per call since one
/// process serves many workspaces.
#[derive(Clone)]
pub struct SlackApiClient {
    http: reqwest::Client,
    api_base: String,
    retry_max_attempts: usize,
    retry_base_delay_ms: u64,
}

impl SlackApiClient {
    pub fn new(config: &SlackApiClientConfig) -> Result<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("prbot-slack-runtime"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .context("failed to create slack api client")?;

        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_base_delay_ms: config.retry_base_delay_ms.max(1),
        })
    }

    pub async fn post_message(
        &self,
        token: &str,
        channel: &str,
        text: &str,
        blocks: &[Value],
        thread_ts: Option<&str>,
    ) -> Result<SlackPostedMessage> {
        let mut payload = json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });
        if !blocks.is_empty() {
            payload["blocks"] = Value::Array(blocks.to_vec());
        }
        if let Some(thread_ts) = thread_ts {
            payload["thread_ts"] = Value::String(thread_ts.to_string());
        }

        // chat.postMessage is not idempotent; send once.
        let response: SlackChatMessageResponse = self
            .request_json("chat.postMessage", RequestRetry::Once, || {
                self.http
                    .post(format!("{}/chat.postMessage", self.api_base))
                    .bearer_auth(token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack chat.postMessage failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }

        Ok(SlackPostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response
                .ts
                .ok_or_else(|| anyhow!("slack chat.postMessage response missing ts"))?,
        })
    }

    /// Opens a modal for the interaction that produced `trigger_id`.
    pub async fn open_view(&self, token: &str, trigger_id: &str, view: &Value) -> Result<()> {
        let payload = json!({"trigger_id": trigger_id, "view": view});
        // Trigger ids expire within seconds and are single use.
        let response: SlackAckResponse = self
            .request_json("views.open", RequestRetry::Once, || {
                self.http
                    .post(format!("{}/views.open", self.api_base))
                    .bearer_auth(token)
                    .json(&payload)
            })
            .await?;
        if !response.ok {
            bail!(
                "slack views.open failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(())
    }

    /// Users who reacted with `reaction` on the message at `ts`.
    pub async fn reaction_users(
        &self,
        token: &str,
        channel: &str,
        ts: &str,
        reaction: &str,
    ) -> Result<Vec<String>> {
        let response: SlackReactionsGetResponse = self
            .request_json("reactions.get", RequestRetry::Budget, || {
                self.http
                    .get(format!("{}/reactions.get", self.api_base))
                    .bearer_auth(token)
                    .query(&[("channel", channel), ("timestamp", ts), ("full", "true")])
            })
            .await?;
        if !response.ok {
            bail!(
                "slack reactions.get failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        Ok(response
            .message
            .unwrap_or_default()
            .reactions
            .into_iter()
            .filter(|candidate| candidate.name == reaction)
            .flat_map(|candidate| candidate.users)
            .collect())
    }

    /// Human-readable name for `user`, falling back through the profile.
    pub async fn user_name(&self, token: &str, user: &str) -> Result<String> {
        let response: SlackUsersInfoResponse = self
            .request_json("users.info", RequestRetry::Budget, || {
                self.http
                    .get(format!("{}/users.info", self.api_base))
                    .bearer_auth(token)
                    .query(&[("user", user)])
            })
            .await?;
        if !response.ok {
            bail!(
                "slack users.info failed: {}",
                response
                    .error
                    .unwrap_or_else(|| "unknown error".to_string())
            );
        }
        response
            .user
            .map(SlackUser::preferred_name)
            .ok_or_else(|| anyhow!("slack users.info response missing user"))
    }

    async fn request_json<T, F>(
        &self,
        operation: &str,
        retry: RequestRetry,
        mut builder: F,
    ) -> Result<T>
    where
        T: DeserializeOwned,
        F: FnMut() -> reqwest::RequestBuilder,
    {
        let max_attempts = match retry {
            RequestRetry::Once => 1,
            RequestRetry::Budget => self.retry_max_attempts,
        };
        let mut attempt = 0_usize;
        loop {
            attempt = attempt.saturating_add(1);
            let response = builder()
                .header("x-prbot-retry-attempt", attempt.saturating_sub(1).to_string())
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<T>()
                            .await
                            .with_context(|| format!("failed to decode slack {operation}"))?;
                        return Ok(parsed);
                    }

                    let retry_after = parse_retry_after(response.headers());
                    let body = response.text().await.unwrap_or_default();
                    if attempt < max_attempts
                        && is_retryable_slack_status(status.as_u16())
                    {
                        tracing::debug!(
                            operation,
                            attempt,
                            status = status.as_u16(),
                            "retrying slack api request"
                        );
                        tokio::time::sleep(retry_delay(
                            self.retry_base_delay_ms,
                            attempt,
                            retry_after,
                        ))
                        .await;
                        continue;
                    }

                    bail!(
                        "slack api {operation} failed with status {}: {}",
                        status.as_u16(),
                        truncate_for_error(&body, 800)
                    );
                }
                Err(error) => {
                    if attempt < max_attempts && is_retryable_transport_error(&error) {
                        tokio::time::sleep(retry_delay(self.retry_base_delay_ms, attempt, None))
                            .await;
                        continue;
                    }
                    return Err(error)
                        .with_context(|| format!("slack api {operation} request failed"));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{SlackApiClient, SlackApiClientConfig};
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer, retry_max_attempts: usize) -> SlackApiClient {
        SlackApiClient::new(&SlackApiClientConfig {
            api_base: server.base_url(),
            request_timeout_ms: 2_000,
            retry_max_attempts,
            retry_base_delay_ms: 1,
        })
        .expect("client")
    }

    #[tokio::test]
    async fn functional_post_message_sends_blocks_and_thread() {
        let server = MockServer::start();
        let post = server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .header("authorization", "Bearer xoxb-1")
                .header("x-prbot-retry-attempt", "0")
                .body_includes("\"channel\":\"C1\"")
                .body_includes("\"thread_ts\":\"1.0\"")
                .body_includes("\"blocks\":[{\"type\":\"divider\"}]");
            then.status(200)
                .json_body(json!({"ok": true, "channel": "C1", "ts": "2.0"}));
        });

        let posted = client(&server, 1)
            .post_message("xoxb-1", "C1", "hello", &[json!({"type": "divider"})], Some("1.0"))
            .await
            .expect("post");
        post.assert();
        assert_eq!(posted.ts, "2.0");
        assert_eq!(posted.channel, "C1");
    }

    #[tokio::test]
    async fn regression_post_message_surfaces_slack_error_code() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(200)
                .json_body(json!({"ok": false, "error": "channel_not_found"}));
        });

        let error = client(&server, 1)
            .post_message("xoxb-1", "C404", "hello", &[], None)
            .await
            .expect_err("slack error");
        assert!(error.to_string().contains("channel_not_found"));
    }

    #[tokio::test]
    async fn integration_reads_retry_server_errors_until_budget_exhausted() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(GET).path("/reactions.get");
            then.status(503).body("unavailable");
        });

        let error = client(&server, 3)
            .reaction_users("xoxb-1", "C1", "1.0", "eyes")
            .await
            .expect_err("exhausted");
        assert_eq!(failing.calls(), 3);
        assert!(error.to_string().contains("status 503"));
    }

    #[tokio::test]
    async fn regression_post_message_is_sent_once_on_server_error() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(503).body("unavailable");
        });

        let error = client(&server, 3)
            .post_message("xoxb-1", "C1", "hello", &[], None)
            .await
            .expect_err("unavailable");
        assert_eq!(failing.calls(), 1);
        assert!(error.to_string().contains("status 503"));
    }

    #[tokio::test]
    async fn regression_rate_limited_read_waits_bounded_retry_after() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(GET)
                .path("/users.info")
                .header("x-prbot-retry-attempt", "0");
            then.status(429).header("retry-after", "0").body("slow down");
        });
        let retried = server.mock(|when, then| {
            when.method(GET)
                .path("/users.info")
                .header("x-prbot-retry-attempt", "1");
            then.status(200)
                .json_body(json!({"ok": true, "user": {"id": "U1", "name": "grace"}}));
        });

        let name = client(&server, 2)
            .user_name("xoxb-1", "U1")
            .await
            .expect("retried");
        assert_eq!(name, "grace");
        limited.assert_calls(1);
        retried.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_client_errors_are_not_retried() {
        let server = MockServer::start();
        let rejected = server.mock(|when, then| {
            when.method(POST).path("/chat.postMessage");
            then.status(400).body("bad request");
        });

        client(&server, 3)
            .post_message("xoxb-1", "C1", "hello", &[], None)
            .await
            .expect_err("bad request");
        assert_eq!(rejected.calls(), 1);
    }

    #[tokio::test]
    async fn functional_open_view_sends_trigger_and_view() {
        let server = MockServer::start();
        let open = server.mock(|when, then| {
            when.method(POST)
                .path("/views.open")
                .header("authorization", "Bearer xoxb-1")
                .body_includes("\"trigger_id\":\"trig-1\"")
                .body_includes("\"type\":\"modal\"");
            then.status(200).json_body(json!({"ok": true, "view": {"id": "V1"}}));
        });

        client(&server, 3)
            .open_view("xoxb-1", "trig-1", &json!({"type": "modal"}))
            .await
            .expect("open view");
        open.assert_calls(1);
    }

    #[tokio::test]
    async fn regression_open_view_surfaces_expired_trigger() {
        let server = MockServer::start();
        let open = server.mock(|when, then| {
            when.method(POST).path("/views.open");
            then.status(200)
                .json_body(json!({"ok": false, "error": "expired_trigger_id"}));
        });

        let error = client(&server, 3)
            .open_view("xoxb-1", "trig-1", &json!({"type": "modal"}))
            .await
            .expect_err("expired");
        assert!(error.to_string().contains("expired_trigger_id"));
        open.assert_calls(1);
    }

    #[tokio::test]
    async fn functional_reaction_users_filters_by_reaction_name() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/reactions.get")
                .query_param("channel", "C1")
                .query_param("timestamp", "1.0")
                .query_param("full", "true");
            then.status(200).json_body(json!({
                "ok": true,
                "type": "message",
                "message": {"reactions": [
                    {"name": "eyes", "users": ["U1", "U2"], "count": 2},
                    {"name": "white_check_mark", "users": ["U3"], "count": 1}
                ]}
            }));
        });

        let users = client(&server, 1)
            .reaction_users("xoxb-1", "C1", "1.0", "eyes")
            .await
            .expect("reactions");
        assert_eq!(users, vec!["U1".to_string(), "U2".to_string()]);
    }

    #[tokio::test]
    async fn functional_reaction_users_empty_when_message_has_no_reactions() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/reactions.get");
            then.status(200)
                .json_body(json!({"ok": true, "type": "message", "message": {}}));
        });

        let users = client(&server, 1)
            .reaction_users("xoxb-1", "C1", "1.0", "eyes")
            .await
            .expect("reactions");
        assert!(users.is_empty());
    }

    #[tokio::test]
    async fn functional_user_name_prefers_real_name_then_profile() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.info").query_param("user", "U1");
            then.status(200).json_body(json!({
                "ok": true,
                "user": {"id": "U1", "name": "grace", "real_name": "Grace Hopper"}
            }));
        });
        server.mock(|when, then| {
            when.method(GET).path("/users.info").query_param("user", "U2");
            then.status(200).json_body(json!({
                "ok": true,
                "user": {"id": "U2", "real_name": " ", "profile": {"display_name": "ada"}}
            }));
        });

        let client = client(&server, 1);
        assert_eq!(
            client.user_name("xoxb-1", "U1").await.expect("U1"),
            "Grace Hopper"
        );
        assert_eq!(client.user_name("xoxb-1", "U2").await.expect("U2"), "ada");
    }
}
