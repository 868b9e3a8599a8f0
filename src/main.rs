use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devflow::config::AppConfig;
use devflow::server::{create_router, AppState};
use devflow::shutdown::{graceful_shutdown, wait_for_shutdown};
use devflow::tracker::jira::JiraTracker;
use devflow::tracker::types::AttachmentKind;
use devflow::tracker::TicketTracker;
use devflow::workflow::{checkpoint, Collaborators, Orchestrator, WorkflowSettings};

#[derive(Parser)]
#[command(name = "devflow", about = "Turns tracker tickets into tested pull requests")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the workflow for one ticket in-process
    Run {
        /// Ticket key, e.g. DP-123
        #[arg(short, long, env = "TICKET")]
        ticket: String,

        /// Checkpoint thread to resume or record under
        #[arg(long)]
        thread_id: Option<String>,
    },
    /// Serve the task API and run the queue processor
    Serve,
    /// Download a ticket's attachments
    Attachments {
        /// Ticket key, e.g. DP-123
        #[arg(short, long, env = "TICKET")]
        ticket: String,

        /// Kinds to fetch; defaults to image, pdf and csv
        #[arg(long = "type", value_enum, value_delimiter = ',')]
        types: Vec<AttachmentKind>,

        /// Destination directory
        #[arg(long, default_value = "/tmp")]
        dest: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn load_config(path: Option<&str>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path)?;
    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            tracing::error!("{problem}");
        }
        anyhow::bail!("invalid configuration: {}", problems.join("; "));
    }
    Ok(config)
}

async fn run_ticket(config: AppConfig, ticket: &str, thread_id: Option<&str>) -> anyhow::Result<ExitCode> {
    let orchestrator = Orchestrator::new(
        Collaborators::from_config(&config)?,
        WorkflowSettings::from_config(&config),
        checkpoint::from_config(&config.workflow),
    );

    let state = orchestrator
        .run(ticket, thread_id, || std::future::ready(false))
        .await;

    tracing::info!(
        ticket,
        status = %state.status,
        pr = state.pr_url.as_deref().unwrap_or("-"),
        overall_confidence = state.confidence.overall,
        "Run complete"
    );
    println!("{}", serde_json::to_string_pretty(&state)?);

    if state.succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        if let Some(error) = &state.error {
            tracing::error!(ticket, error = %error, "Run failed");
        }
        Ok(ExitCode::FAILURE)
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<ExitCode> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        "Starting Devflow server"
    );

    let state = Arc::new(AppState::new(&config)?);

    // Start the task queue processor
    tokio::spawn(devflow::queue::run_queue_processor(
        Arc::clone(&state.task_queue),
        Arc::clone(&state.orchestrator),
    ));

    let app = create_router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(ExitCode::SUCCESS)
}

async fn download_attachments(
    config: AppConfig,
    ticket: &str,
    types: &[AttachmentKind],
    dest: &std::path::Path,
) -> anyhow::Result<ExitCode> {
    let tracker = JiraTracker::new(&config.jira)?;
    let saved = tracker.download_attachments(ticket, types, dest).await?;

    tracing::info!(ticket, count = saved.len(), "Attachments downloaded");
    for path in &saved {
        println!("{}", path.display());
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Run { ticket, thread_id } => run_ticket(config, &ticket, thread_id.as_deref()).await,
        Command::Serve => serve(config).await,
        Command::Attachments { ticket, types, dest } => {
            download_attachments(config, &ticket, &types, &dest).await
        }
    }
}
