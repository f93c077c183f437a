//! wfevents CLI: operator interface to the workflow event engine.

use chrono::Utc;
use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;
use std::sync::Arc;
use uuid::Uuid;
use workflow_events::config::Config;
use workflow_events::db::Db;
use workflow_events::engine::{Claimer, Daemon, FailureReporter, IngressConsumer, IngressPipeline};
use workflow_events::model::TriggerMessage;
use workflow_events::services::Services;
use workflow_events::services::evaluator::TemplateEvaluator;
use workflow_events::services::http::HttpGateway;
use workflow_events::store::{EventStore, MessageBus};
use workflow_events::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "wfevents", about = "Workflow event scheduling and dispatch")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon loop and the ingress consumer
    Serve,
    /// Enqueue a trigger for one workflow event
    Trigger {
        /// Workflow ID
        workflow_id: Uuid,
        /// Event template ID
        event_template_id: Uuid,
        /// Dry run: write only a debug record under this ID
        #[arg(long)]
        debug_id: Option<Uuid>,
        /// Do not emit a completion message
        #[arg(long)]
        only_execute: bool,
    },
    /// Run one daemon tick and print its report
    Tick,
    /// Release stale claims once
    Reap,
    /// Event operations
    Event {
        #[command(subcommand)]
        action: EventAction,
    },
    /// Workflow error operations
    Errors {
        #[command(subcommand)]
        action: ErrorsAction,
    },
}

#[derive(Subcommand)]
enum EventAction {
    /// Show an event
    Show {
        /// Event ID
        id: Uuid,
    },
}

#[derive(Subcommand)]
enum ErrorsAction {
    /// List recorded workflow errors, newest first
    List {
        /// Filter by workflow
        #[arg(long)]
        workflow: Option<Uuid>,
        /// Maximum rows to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = match cli.command {
        Command::Serve => Some(init_telemetry(TelemetryConfig {
            endpoint: config.otel_endpoint.clone(),
            service_name: "wfevents".to_string(),
            log_level: config.log_level.clone(),
        })?),
        _ => None,
    };
    let db = connect(&config).await?;

    match cli.command {
        Command::Serve => cmd_serve(&config, db).await,
        Command::Trigger {
            workflow_id,
            event_template_id,
            debug_id,
            only_execute,
        } => cmd_trigger(&db, workflow_id, event_template_id, debug_id, only_execute).await,
        Command::Tick => cmd_tick(&config, db).await,
        Command::Reap => cmd_reap(&config, db).await,
        Command::Event {
            action: EventAction::Show { id },
        } => cmd_event_show(&db, id).await,
        Command::Errors {
            action: ErrorsAction::List { workflow, limit },
        } => cmd_errors_list(&db, workflow, limit).await,
    }
}

async fn connect(config: &Config) -> anyhow::Result<Arc<Db>> {
    let db = Db::connect(config.database_url.expose_secret())
        .await?
        .with_queues(
            config.scheduler.ingress_queue.clone(),
            config.scheduler.outbound_queue.clone(),
        );
    db.migrate().await?;
    db.ensure_queues().await?;
    Ok(Arc::new(db))
}

fn build_services(config: &Config) -> anyhow::Result<Services> {
    let Some(base_url) = config.actions_base_url.as_deref() else {
        anyhow::bail!("ACTIONS_BASE_URL must be set to run event handlers");
    };
    let gateway = Arc::new(HttpGateway::new(base_url)?);
    Ok(Services::from_gateway(Arc::new(TemplateEvaluator), gateway))
}

fn build_daemon(config: &Config, db: Arc<Db>, services: &Services) -> Daemon {
    let store: Arc<dyn EventStore> = db.clone();
    let bus: Arc<dyn MessageBus> = db;
    let failures = FailureReporter::new(
        Arc::clone(&store),
        Arc::clone(&services.alerting),
        config.alert_subscribers.clone(),
    );
    Daemon::new(
        store,
        bus,
        Arc::clone(&services.notifier),
        failures,
        config.scheduler.clone(),
    )
}

async fn cmd_serve(config: &Config, db: Arc<Db>) -> anyhow::Result<()> {
    db.health_check().await?;
    let services = build_services(config)?;

    let store: Arc<dyn EventStore> = db.clone();
    let bus: Arc<dyn MessageBus> = db.clone();
    let failures = FailureReporter::new(
        Arc::clone(&store),
        Arc::clone(&services.alerting),
        config.alert_subscribers.clone(),
    );
    let pipeline = Arc::new(IngressPipeline::new(
        store,
        bus,
        &services,
        failures,
        &config.scheduler,
        config.requests.clone(),
    ));

    let daemon = build_daemon(config, db.clone(), &services);
    let consumer = Arc::new(IngressConsumer::new(db, pipeline, config.scheduler.clone()));

    let (d, c) = (daemon.clone(), Arc::clone(&consumer));
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        d.shutdown();
        c.shutdown();
    });

    tokio::try_join!(daemon.run(), consumer.run())?;
    Ok(())
}

async fn cmd_trigger(
    db: &Db,
    workflow_id: Uuid,
    event_template_id: Uuid,
    debug_id: Option<Uuid>,
    only_execute: bool,
) -> anyhow::Result<()> {
    let mut message = TriggerMessage::new(workflow_id, event_template_id);
    if let Some(debug_id) = debug_id {
        message = message.debug(debug_id);
    }
    if only_execute {
        message = message.only_execute();
    }

    let payload = serde_json::to_value(&message)?;
    let msg_id = db.send_to_queue(db.ingress_queue(), &payload, 0).await?;
    println!("Queued: msg {msg_id} on '{}'", db.ingress_queue());
    Ok(())
}

async fn cmd_tick(config: &Config, db: Arc<Db>) -> anyhow::Result<()> {
    let services = build_services(config)?;
    let daemon = build_daemon(config, db, &services);
    let report = daemon.tick_at(Utc::now()).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn cmd_reap(config: &Config, db: Arc<Db>) -> anyhow::Result<()> {
    let claimer = Claimer::new(db, config.scheduler.stale_lock_after);
    let reaped = claimer.reap(Utc::now()).await?;
    println!("Released {reaped} stale claim(s)");
    Ok(())
}

async fn cmd_event_show(db: &Db, id: Uuid) -> anyhow::Result<()> {
    let event = db.get_event(id).await?;

    println!("ID:         {}", event.id);
    println!("Name:       {}", event.name);
    println!("Type:       {}", event.kind);
    println!("Workflow:   {}", event.workflow_id);
    println!("Template:   {}", event.event_template_id);
    println!("Done:       {}", event.done);
    println!(
        "Due:        {}",
        event
            .due_date
            .map(|d| d.to_string())
            .unwrap_or("-".to_string())
    );
    if let Some(lock_id) = event.lock_id {
        println!(
            "Claimed:    {lock_id} at {}",
            event
                .locked_at
                .map(|d| d.to_string())
                .unwrap_or("-".to_string())
        );
    }
    if event.is_parked() {
        println!("Parked:     no due date, needs manual triage");
    }
    println!("Version:    {}", event.version);
    println!("Created:    {}", event.created_at);
    println!("Updated:    {}", event.updated_at);
    println!("---");
    println!("Result:     {}", serde_json::to_string_pretty(&event.result)?);
    if !event.scheduling.statuses.is_empty() {
        println!("Statuses:");
        for (at, status) in &event.scheduling.statuses {
            println!("  {}  {status}", at.format("%Y-%m-%d %H:%M:%S"));
        }
    }
    if !event.scheduling.due_dates.is_empty() {
        println!("Pending:");
        for at in &event.scheduling.due_dates {
            println!("  {}", at.format("%Y-%m-%d %H:%M:%S"));
        }
    }

    Ok(())
}

async fn cmd_errors_list(db: &Db, workflow: Option<Uuid>, limit: i64) -> anyhow::Result<()> {
    let errors = db.list_workflow_errors(workflow, limit).await?;

    if errors.is_empty() {
        println!("No workflow errors found.");
        return Ok(());
    }

    println!(
        "{:<8}  {:<8}  {:<8}  {:<60}  CREATED",
        "ID", "WORKFLOW", "SEVERITY", "CAUSE"
    );
    println!("{}", "-".repeat(110));

    for err in &errors {
        let cause: String = err.cause.chars().take(60).collect();
        println!(
            "{:<8}  {:<8}  {:<8}  {:<60}  {}",
            &err.id.to_string()[..8],
            &err.workflow_id.to_string()[..8],
            err.severity,
            cause,
            err.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} error(s)", errors.len());
    Ok(())
}
