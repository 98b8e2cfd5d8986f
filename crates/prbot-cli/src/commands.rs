use std::sync::Arc;

use anyhow::{bail, Context, Result};
use prbot_core::{Clock, SystemClock};
use prbot_engine::{
    start_escalation_scheduler, EscalationScheduler, NotificationDispatcher,
    ReactionEngagementResolver, ReviewIntake, TickReport,
};
use prbot_slack_runtime::{run_slack_events_server, SlackApiClient, SlackEventsState, SlackGateway};
use prbot_store::{SqliteReviewStore, Workspace, WorkspaceStore};

use crate::cli_args::{Cli, CliCommand, WorkspaceUpsertArgs};

struct Services {
    store: Arc<SqliteReviewStore>,
    gateway: Arc<SlackGateway>,
    clock: Arc<dyn Clock>,
}

fn open_store(cli: &Cli) -> Result<Arc<SqliteReviewStore>> {
    let store = SqliteReviewStore::new(&cli.database_path).with_context(|| {
        format!(
            "failed to open review database {}",
            cli.database_path.display()
        )
    })?;
    Ok(Arc::new(store))
}

fn build_services(cli: &Cli) -> Result<Services> {
    let store = open_store(cli)?;
    let client = SlackApiClient::new(&cli.slack_client_config())?;
    let gateway = Arc::new(SlackGateway::new(client, store.clone()));
    Ok(Services {
        store,
        gateway,
        clock: Arc::new(SystemClock),
    })
}

fn build_scheduler(cli: &Cli, services: &Services) -> Result<EscalationScheduler> {
    let config = cli.escalation_config()?;
    Ok(EscalationScheduler::new(
        config,
        services.store.clone(),
        Arc::new(ReactionEngagementResolver::new(services.gateway.clone())),
        NotificationDispatcher::new(services.gateway.clone()),
        services.clock.clone(),
    ))
}

pub(crate) async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        CliCommand::Serve { bind } => run_serve(&cli, *bind).await,
        CliCommand::Tick => {
            let report = run_tick(&cli).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.listing_failed {
                bail!("escalation tick could not list pending reviews");
            }
            Ok(())
        }
        CliCommand::WorkspaceUpsert(args) => {
            run_workspace_upsert(&cli, args).await?;
            println!("workspace registered: team_id={}", args.team_id.trim());
            Ok(())
        }
    }
}

async fn run_serve(cli: &Cli, bind: std::net::SocketAddr) -> Result<()> {
    let services = build_services(cli)?;
    let scheduler = Arc::new(build_scheduler(cli, &services)?);
    let intake = Arc::new(ReviewIntake::new(
        services.store.clone(),
        services.gateway.clone(),
        services.clock.clone(),
    ));
    let handle = start_escalation_scheduler(scheduler)?;
    tracing::info!(
        database = %services.store.path().display(),
        %bind,
        "prbot serving"
    );
    let state = SlackEventsState::new(intake, services.gateway.clone());
    run_slack_events_server(bind, Arc::new(state), handle).await
}

pub(crate) async fn run_tick(cli: &Cli) -> Result<TickReport> {
    let services = build_services(cli)?;
    let scheduler = build_scheduler(cli, &services)?;
    Ok(scheduler.run_tick().await)
}

pub(crate) async fn run_workspace_upsert(cli: &Cli, args: &WorkspaceUpsertArgs) -> Result<()> {
    let team_id = args.team_id.trim();
    let access_token = args.access_token.trim();
    if team_id.is_empty() || access_token.is_empty() {
        bail!("workspace upsert requires a non-empty --team-id and --access-token");
    }
    let store = open_store(cli)?;
    store
        .upsert_workspace(Workspace {
            team_id: team_id.to_string(),
            team_name: args.team_name.trim().to_string(),
            access_token: access_token.to_string(),
            bot_user_id: args.bot_user_id.trim().to_string(),
        })
        .await
        .with_context(|| format!("failed to store workspace {team_id}"))
}
