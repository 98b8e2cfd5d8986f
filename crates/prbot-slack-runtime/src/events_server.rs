//! Slack events and interactivity HTTP endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::rejection::FormRejection;
use axum::extract::{Form, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use prbot_core::{ErrorKind, ReviewError};
use prbot_engine::{EscalationSchedulerHandle, ReactionEvent, ReviewIntake, SubmitReview};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use crate::slack_gateway::SlackGateway;

pub const SLACK_EVENTS_ENDPOINT: &str = "/slack/events";
pub const SLACK_INTERACTIVITY_ENDPOINT: &str = "/slack/interactivity";
pub const SLACK_COMMANDS_ENDPOINT: &str = "/slack/commands";
pub const REVIEW_REQUEST_COMMAND: &str = "/pr";
pub const HEALTH_ENDPOINT: &str = "/healthz";

const PR_URL_BLOCK: (&str, &str) = ("pr_url_block", "pr_url");
const DESCRIPTION_BLOCK: (&str, &str) = ("description_block", "description");
const REVIEWERS_BLOCK: (&str, &str) = ("reviewers_block", "reviewers");

pub struct SlackEventsState {
    intake: Arc<ReviewIntake>,
    gateway: Arc<SlackGateway>,
}

impl SlackEventsState {
    pub fn new(intake: Arc<ReviewIntake>, gateway: Arc<SlackGateway>) -> Self {
        Self { intake, gateway }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SlackEventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        team_id: String,
        event: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum SlackInnerEvent {
    #[serde(rename = "reaction_added")]
    ReactionAdded {
        user: String,
        reaction: String,
        item: SlackReactionItem,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct SlackReactionItem {
    #[serde(default)]
    channel: String,
    #[serde(default)]
    ts: String,
}

#[derive(Debug, Deserialize)]
struct SlashCommandForm {
    command: String,
    team_id: String,
    #[serde(default)]
    channel_id: String,
    #[serde(default)]
    trigger_id: String,
}

#[derive(Debug, Deserialize)]
struct InteractivityForm {
    payload: String,
}

#[derive(Debug, Deserialize)]
struct SlackInteraction {
    #[serde(rename = "type")]
    kind: String,
    team: SlackTeamRef,
    view: Option<SlackView>,
}

#[derive(Debug, Deserialize)]
struct SlackTeamRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SlackView {
    #[serde(default)]
    private_metadata: String,
    state: SlackViewState,
}

#[derive(Debug, Deserialize)]
struct SlackViewState {
    values: HashMap<String, HashMap<String, SlackInputValue>>,
}

#[derive(Debug, Default, Deserialize)]
struct SlackInputValue {
    value: Option<String>,
    #[serde(default)]
    selected_users: Vec<String>,
}

impl SlackViewState {
    fn input(&self, (block_id, action_id): (&str, &str)) -> Option<&SlackInputValue> {
        self.values.get(block_id)?.get(action_id)
    }

    fn text(&self, block: (&str, &str)) -> String {
        self.input(block)
            .and_then(|input| input.value.clone())
            .unwrap_or_default()
    }
}

fn plain_text(text: &str) -> Value {
    json!({"type": "plain_text", "text": text})
}

/// Review request modal. The originating channel rides in
/// `private_metadata` and comes back with the submission.
pub fn review_form_view(channel_id: &str) -> Value {
    json!({
        "type": "modal",
        "title": plain_text("Submit PR for Review"),
        "submit": plain_text("Submit"),
        "close": plain_text("Cancel"),
        "private_metadata": channel_id,
        "blocks": [
            {
                "type": "input",
                "block_id": PR_URL_BLOCK.0,
                "label": plain_text("Pull Request URL"),
                "element": {"type": "plain_text_input", "action_id": PR_URL_BLOCK.1},
            },
            {
                "type": "input",
                "block_id": DESCRIPTION_BLOCK.0,
                "label": plain_text("Description"),
                "element": {
                    "type": "plain_text_input",
                    "action_id": DESCRIPTION_BLOCK.1,
                    "multiline": true,
                },
            },
            {
                "type": "input",
                "block_id": REVIEWERS_BLOCK.0,
                "label": plain_text("Reviewers"),
                "element": {"type": "multi_users_select", "action_id": REVIEWERS_BLOCK.1},
            },
        ],
    })
}

pub fn build_slack_events_router(state: Arc<SlackEventsState>) -> Router {
    Router::new()
        .route(SLACK_EVENTS_ENDPOINT, post(handle_slack_events))
        .route(SLACK_INTERACTIVITY_ENDPOINT, post(handle_slack_interactivity))
        .route(SLACK_COMMANDS_ENDPOINT, post(handle_slash_command))
        .route(HEALTH_ENDPOINT, get(handle_health))
        .with_state(state)
}

/// Serves the Slack endpoints until Ctrl-C, then stops the scheduler.
pub async fn run_slack_events_server(
    bind_addr: SocketAddr,
    state: Arc<SlackEventsState>,
    mut scheduler: EscalationSchedulerHandle,
) -> Result<()> {
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind slack events server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound slack events server address")?;
    tracing::info!(addr = %local_addr, "slack events server listening");

    let app = build_slack_events_router(state);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await;
    scheduler.shutdown().await;
    serve_result.context("slack events server exited unexpectedly")?;
    tracing::info!("slack events server stopped");
    Ok(())
}

async fn handle_health() -> &'static str {
    "ok"
}

async fn handle_slack_events(State(state): State<Arc<SlackEventsState>>, body: Bytes) -> Response {
    let envelope = match serde_json::from_slice::<SlackEventEnvelope>(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(%error, "rejecting malformed slack event");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    let (team_id, event) = match envelope {
        SlackEventEnvelope::UrlVerification { challenge } => {
            return ([(header::CONTENT_TYPE, "text/plain")], challenge).into_response();
        }
        SlackEventEnvelope::EventCallback { team_id, event } => (team_id, event),
        SlackEventEnvelope::Unsupported => return StatusCode::BAD_REQUEST.into_response(),
    };

    let event = match serde_json::from_value::<SlackInnerEvent>(event) {
        Ok(SlackInnerEvent::ReactionAdded {
            user,
            reaction,
            item,
        }) => ReactionEvent {
            team_id,
            channel_id: item.channel,
            correlation_key: item.ts,
            user_id: user,
            reaction,
        },
        Ok(SlackInnerEvent::Other) => return StatusCode::OK.into_response(),
        Err(error) => {
            tracing::debug!(%error, "rejecting malformed slack inner event");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if event.correlation_key.is_empty() || event.channel_id.is_empty() {
        return StatusCode::OK.into_response();
    }

    match state.intake.handle_reaction(event).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "reaction handled");
            StatusCode::OK.into_response()
        }
        Err(error) => review_error_response("reaction", error),
    }
}

async fn handle_slash_command(
    State(state): State<Arc<SlackEventsState>>,
    form: Result<Form<SlashCommandForm>, FormRejection>,
) -> Response {
    let Ok(Form(command)) = form else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    if command.command.trim() != REVIEW_REQUEST_COMMAND {
        tracing::debug!(command = %command.command, "ignoring unknown slash command");
        return StatusCode::OK.into_response();
    }
    if command.trigger_id.trim().is_empty() || command.channel_id.trim().is_empty() {
        return StatusCode::BAD_REQUEST.into_response();
    }

    let view = review_form_view(&command.channel_id);
    match state
        .gateway
        .open_view(&command.team_id, &command.trigger_id, &view)
        .await
    {
        Ok(()) => StatusCode::OK.into_response(),
        Err(error) => {
            tracing::error!(team_id = %command.team_id, %error, "failed to open review form");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn handle_slack_interactivity(
    State(state): State<Arc<SlackEventsState>>,
    form: Result<Form<InteractivityForm>, FormRejection>,
) -> Response {
    let Ok(Form(form)) = form else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let interaction = match serde_json::from_str::<SlackInteraction>(&form.payload) {
        Ok(interaction) => interaction,
        Err(error) => {
            tracing::debug!(%error, "rejecting malformed interaction payload");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };
    if interaction.kind != "view_submission" {
        return StatusCode::OK.into_response();
    }
    let Some(view) = interaction.view else {
        return StatusCode::BAD_REQUEST.into_response();
    };

    let request = SubmitReview {
        pr_url: view.state.text(PR_URL_BLOCK),
        description: view.state.text(DESCRIPTION_BLOCK),
        channel_id: view.private_metadata.clone(),
        reviewer_ids: view
            .state
            .input(REVIEWERS_BLOCK)
            .map(|input| input.selected_users.clone())
            .unwrap_or_default(),
        team_id: interaction.team.id,
    };
    match state.intake.submit(request).await {
        Ok(_) => StatusCode::OK.into_response(),
        Err(error) => review_error_response("submission", error),
    }
}

/// Missing reviews are acknowledged so Slack does not redeliver; transient
/// failures answer 500 so it does.
fn review_error_response(context: &'static str, error: ReviewError) -> Response {
    match error.kind() {
        ErrorKind::NotFound => {
            tracing::debug!(context, %error, "ignoring event for unknown review");
            StatusCode::OK.into_response()
        }
        ErrorKind::Validation => {
            tracing::warn!(context, %error, "rejected slack request");
            (StatusCode::BAD_REQUEST, error.to_string()).into_response()
        }
        ErrorKind::TransientGateway | ErrorKind::TransientStore => {
            tracing::error!(context, %error, "slack request failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
