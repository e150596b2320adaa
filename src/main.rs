use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use docket::completion::HttpCompletionService;
use docket::config::Config;
use docket::models::ItemState;
use docket::tracker::Tracker;
use docket::{api, db};

#[derive(Parser)]
#[command(name = "docket")]
#[command(about = "Checklist-driven document assembly")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },
    /// Print project status from the local database
    Status {
        /// Only show this project
        #[arg(short, long)]
        project: Option<Uuid>,
    },
    /// Apply pending database migrations and exit
    Migrate,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "docket=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn open_database(config: &Config) -> anyhow::Result<db::Database> {
    let db = match &config.database_path {
        Some(path) => db::Database::open(path.clone())?,
        None => db::Database::open_default()?,
    };
    db.migrate().context("Failed to migrate database")?;
    Ok(db)
}

fn build_tracker(config: Config) -> anyhow::Result<Tracker> {
    let db = open_database(&config)?;
    if config.completion.api_key.is_none() {
        tracing::warn!("OPENROUTER_API_KEY is not set; extraction calls will be rejected");
    }
    let service = HttpCompletionService::from_config(&config.completion);
    Ok(Tracker::new(db, Arc::new(service), config))
}

async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    tracing::info!("Starting Docket server on port {}", port);

    let tracker = build_tracker(config)?;
    let app = api::create_router(tracker);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Docket server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

fn print_status(config: Config, project: Option<Uuid>) -> anyhow::Result<()> {
    let tracker = build_tracker(config)?;
    let projects = match project {
        Some(id) => vec![tracker.project(id)?],
        None => tracker.projects()?,
    };

    if projects.is_empty() {
        println!("No projects.");
    }
    for project in projects {
        let dashboard = tracker.dashboard(project.id)?;
        let status = &dashboard.status;
        println!(
            "{} ({}): {}/{} generated, {} failed, {} awaiting template{}",
            project.name,
            project.id,
            status.count(ItemState::Generated),
            status.total,
            status.count(ItemState::Failed),
            status.awaiting_template,
            if status.complete { " [complete]" } else { "" }
        );
        for row in &dashboard.rows {
            let marker = match row.template_name.as_deref() {
                Some(name) => name,
                None => "-",
            };
            println!("  {:<18} {:<40} {}", row.state, row.title, marker);
            if let Some(error) = &row.last_error {
                println!("  {:<18} {}", "", error);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = Config::load();

    match cli.command {
        Some(Commands::Serve { port }) => serve(config, port).await?,
        Some(Commands::Status { project }) => print_status(config, project)?,
        Some(Commands::Migrate) => {
            open_database(&config)?;
            println!("Database is up to date.");
        }
        None => serve(config, 3000).await?,
    }

    Ok(())
}
