use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use prbot_engine::{EscalationPolicy, EscalationSchedulerConfig};
use prbot_slack_runtime::{SlackApiClientConfig, DEFAULT_SLACK_API_BASE};

fn parse_positive_usize(value: &str) -> Result<usize, String> {
    let parsed = value
        .parse::<usize>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum CliProfile {
    /// Daily ticks, reminders after one day, channel broadcast after three.
    Production,
    /// Second-scale cadence for trying the full flow.
    Fast,
}

#[derive(Debug, Parser)]
#[command(
    name = "prbot",
    about = "Tracks pull request review requests in Slack and escalates reminders",
    version
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: CliCommand,

    #[arg(
        long,
        global = true,
        env = "PRBOT_DATABASE_PATH",
        default_value = "prbot.sqlite3",
        help = "SQLite database holding reviews and workspace credentials."
    )]
    pub(crate) database_path: PathBuf,

    #[arg(
        long,
        global = true,
        env = "PRBOT_PROFILE",
        value_enum,
        default_value = "production",
        help = "Escalation cadence preset. Individual thresholds below override it."
    )]
    pub(crate) profile: CliProfile,

    #[arg(
        long,
        global = true,
        env = "PRBOT_TICK_INTERVAL_SECONDS",
        value_parser = parse_positive_u64
    )]
    pub(crate) tick_interval_seconds: Option<u64>,

    #[arg(
        long,
        global = true,
        env = "PRBOT_REMINDER_START_SECONDS",
        value_parser = parse_positive_u64,
        help = "Age at which assigned or engaged reviewers are reminded directly."
    )]
    pub(crate) reminder_start_seconds: Option<u64>,

    #[arg(
        long,
        global = true,
        env = "PRBOT_REMINDER_CHANNEL_SECONDS",
        value_parser = parse_positive_u64,
        help = "Age at which the whole channel is reminded. Must exceed the start threshold."
    )]
    pub(crate) reminder_channel_seconds: Option<u64>,

    #[arg(
        long,
        global = true,
        env = "PRBOT_DISPATCH_CONCURRENCY",
        value_parser = parse_positive_usize
    )]
    pub(crate) dispatch_concurrency: Option<usize>,

    #[arg(
        long,
        global = true,
        env = "PRBOT_REMINDER_COOLDOWN_SECONDS",
        value_parser = parse_positive_u64,
        help = "Suppress repeat reminders at the same tier for this long. Unset reminds every tick."
    )]
    pub(crate) reminder_cooldown_seconds: Option<u64>,

    #[arg(
        long,
        global = true,
        env = "PRBOT_SLACK_API_BASE",
        default_value = DEFAULT_SLACK_API_BASE
    )]
    pub(crate) slack_api_base: String,

    #[arg(
        long,
        global = true,
        env = "PRBOT_SLACK_REQUEST_TIMEOUT_MS",
        default_value_t = 10_000,
        value_parser = parse_positive_u64
    )]
    pub(crate) slack_request_timeout_ms: u64,

    #[arg(
        long,
        global = true,
        env = "PRBOT_SLACK_RETRY_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = parse_positive_usize,
        help = "Attempts for Slack reads. Message posts are always sent once."
    )]
    pub(crate) slack_retry_max_attempts: usize,

    #[arg(
        long,
        global = true,
        env = "PRBOT_SLACK_RETRY_BASE_DELAY_MS",
        default_value_t = 500,
        value_parser = parse_positive_u64
    )]
    pub(crate) slack_retry_base_delay_ms: u64,
}

#[derive(Debug, Subcommand)]
pub(crate) enum CliCommand {
    /// Serve the Slack endpoints and run the escalation scheduler.
    Serve {
        #[arg(long, env = "PRBOT_BIND", default_value = "127.0.0.1:8080")]
        bind: SocketAddr,
    },
    /// Run one escalation pass and print its report as JSON.
    Tick,
    /// Register or replace a workspace bot token.
    WorkspaceUpsert(WorkspaceUpsertArgs),
}

#[derive(Debug, Args)]
pub(crate) struct WorkspaceUpsertArgs {
    #[arg(long)]
    pub(crate) team_id: String,
    #[arg(long, default_value = "")]
    pub(crate) team_name: String,
    #[arg(long, env = "PRBOT_SLACK_BOT_TOKEN", hide_env_values = true)]
    pub(crate) access_token: String,
    #[arg(long, default_value = "")]
    pub(crate) bot_user_id: String,
}

impl Cli {
    pub(crate) fn escalation_config(&self) -> Result<EscalationSchedulerConfig> {
        let mut config = match self.profile {
            CliProfile::Production => EscalationSchedulerConfig::production(),
            CliProfile::Fast => EscalationSchedulerConfig::fast(),
        };
        if let Some(seconds) = self.tick_interval_seconds {
            config.tick_interval = Duration::from_secs(seconds);
        }
        let start_after = self
            .reminder_start_seconds
            .map(Duration::from_secs)
            .unwrap_or(config.policy.start_after());
        let channel_after = self
            .reminder_channel_seconds
            .map(Duration::from_secs)
            .unwrap_or(config.policy.channel_after());
        config.policy = EscalationPolicy::new(start_after, channel_after)?;
        if let Some(concurrency) = self.dispatch_concurrency {
            config.dispatch_concurrency = concurrency;
        }
        config.reminder_cooldown = self.reminder_cooldown_seconds.map(Duration::from_secs);
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn slack_client_config(&self) -> SlackApiClientConfig {
        SlackApiClientConfig {
            api_base: self.slack_api_base.clone(),
            request_timeout_ms: self.slack_request_timeout_ms,
            retry_max_attempts: self.slack_retry_max_attempts,
            retry_base_delay_ms: self.slack_retry_base_delay_ms,
        }
    }
}
