use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use levelup_ledger::{
    api::{self, SecurityConfig},
    config::LedgerConfig,
    db::Database,
    models::{Identity, TaskFilter},
    render, PointsService,
};

#[derive(Parser)]
#[command(name = "lvl")]
#[command(about = "Points ledger and leaderboard for the job portal")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Add the stock portal tasks to an empty catalog
    Seed,
    /// List the task catalog
    Tasks {
        /// Include inactive tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Show a user's points, level and rank
    Standing {
        user_id: String,
    },
    /// Show the leaderboard
    Leaderboard {
        /// Only rank users in this cohort
        #[arg(short, long)]
        cohort: Option<String>,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG")
            .unwrap_or_else(|_| "levelup_ledger=debug,tower_http=debug".into()),
    );

    // Logs go to stderr so CLI output on stdout stays clean.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn open_database(config: &LedgerConfig) -> anyhow::Result<Database> {
    let db = Database::open(config.database_path()?)?;
    db.set_busy_timeout(config.store_timeout())?;
    db.migrate()?;
    Ok(db)
}

async fn serve(
    service: PointsService<Database>,
    config: &LedgerConfig,
    port: u16,
) -> anyhow::Result<()> {
    let security = SecurityConfig::from_config(config);
    if let Some(limiter) = security.rate_limiter.clone() {
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(60));
            loop {
                tick.tick().await;
                limiter.cleanup();
            }
        });
    }
    let app = api::create_router(service, security);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Points ledger listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = LedgerConfig::load()?;
    let db = open_database(&config)?;
    let service = PointsService::from_config(db, &config)?;
    let operator = Identity::operator();

    match cli.command {
        Some(Commands::Serve { port }) => {
            serve(service, &config, port.unwrap_or(config.port)).await?;
        }
        Some(Commands::Seed) => {
            let seeded = service.seed_defaults(&operator).await?;
            if seeded.is_empty() {
                println!("Catalog already has tasks, nothing seeded");
            } else {
                println!("Seeded {} tasks", seeded.len());
                print!("{}", render::render_catalog(&seeded));
            }
        }
        Some(Commands::Tasks { all }) => {
            let filter = TaskFilter {
                category: None,
                active_only: !all,
            };
            let tasks = service.list_tasks(filter).await?;
            print!("{}", render::render_catalog(&tasks));
        }
        Some(Commands::Standing { user_id }) => {
            let summary = service.summary_for(&operator, &user_id).await?;
            print!("{}", render::render_summary(&summary));
        }
        Some(Commands::Leaderboard { cohort, limit }) => {
            let rows = service.rank_all(cohort, Some(limit)).await?;
            print!("{}", render::render_leaderboard(&rows));
        }
        None => {
            serve(service, &config, config.port).await?;
        }
    }

    Ok(())
}
