//! Slack transport for the review bot.
//!
//! Provides the Web API client and a Slack-backed messaging gateway that
//! resolves a bot token per workspace. The HTTP router receives Slack
//! callbacks and hands them to the review intake.

mod events_server;
mod slack_api_client;
mod slack_gateway;
mod slack_helpers;

pub use events_server::{
    build_slack_events_router, review_form_view, run_slack_events_server, SlackEventsState,
    HEALTH_ENDPOINT, REVIEW_REQUEST_COMMAND, SLACK_COMMANDS_ENDPOINT, SLACK_EVENTS_ENDPOINT,
    SLACK_INTERACTIVITY_ENDPOINT,
};
pub use slack_api_client::{
    SlackApiClient, SlackApiClientConfig, SlackPostedMessage, DEFAULT_SLACK_API_BASE,
};
pub use slack_gateway::{render_blocks, SlackGateway};
