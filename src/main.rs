use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notify_sync::api::{self, middleware::{RequestBudget, SecurityConfig}};
use notify_sync::render::{render_feed, render_status};
use notify_sync::store::NotificationStore;
use notify_sync::NotificationEngine;

#[derive(Parser)]
#[command(name = "notify-sync")]
#[command(about = "Notification feed synchronization engine and reference service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the reference notification service
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "17020")]
        port: u16,

        /// Bearer token clients must present (overrides NOTIFY_SYNC_TOKEN)
        #[arg(long)]
        token: Option<String>,

        /// Requests per minute per client before answering 429
        #[arg(long)]
        rate_limit: Option<usize>,

        /// Number of demo notifications to start with
        #[arg(long, default_value = "12")]
        seed: usize,
    },
    /// Fetch and print the notification feed
    List {
        /// Bypass the fresh-cache shortcut
        #[arg(short, long)]
        force: bool,
    },
    /// Mark one notification as read
    Mark {
        /// Notification id
        id: String,
    },
    /// Mark every unread notification as read
    MarkAll,
    /// Fetch once and print the engine status
    Status,
}

/// Initialize tracing with output to stderr (client commands) or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "notify_sync=debug,tower_http=debug".into()),
    );

    if use_stderr {
        // Client commands print the feed on stdout
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let use_stderr = !matches!(cli.command, Commands::Serve { .. });
    init_tracing(use_stderr);

    match cli.command {
        Commands::Serve {
            port,
            token,
            rate_limit,
            seed,
        } => {
            let mut security = SecurityConfig::from_env();
            if token.is_some() {
                security.token = token;
            }
            if let Some(limit) = rate_limit {
                security.budget = Some(RequestBudget::per_minute(limit));
            }
            if let Some(budget) = security.budget.clone() {
                tokio::spawn(async move {
                    let mut ticker = tokio::time::interval(budget.window());
                    loop {
                        ticker.tick().await;
                        let forgotten = budget.prune();
                        if forgotten > 0 {
                            tracing::debug!(forgotten, "pruned idle request budgets");
                        }
                    }
                });
            }

            let app = api::create_router(NotificationStore::seeded(seed), security);

            let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
            tracing::info!(
                "notification service listening on http://127.0.0.1:{}/api/v1",
                port
            );

            axum::serve(listener, app).await?;
        }
        Commands::List { force } => {
            let engine = NotificationEngine::from_env();
            let snapshot = engine.fetch(force).await?;
            print!("{}", render_feed(&snapshot));
            report_degradation(&engine);
        }
        Commands::Mark { id } => {
            let engine = NotificationEngine::from_env();
            engine.fetch(false).await?;
            match engine.mark_one(&id).await {
                Ok(_) => println!("Marked {} as read", id),
                Err(err) => println!("Marked {} as read locally; service said: {}", id, err),
            }
        }
        Commands::MarkAll => {
            let engine = NotificationEngine::from_env();
            engine.fetch(false).await?;
            let report = engine.mark_all().await?;
            println!(
                "Marked {} notifications as read ({} acknowledged, {} failed)",
                report.attempted,
                report.acknowledged,
                report.failed.len()
            );
            for (id, err) in &report.failed {
                println!("  {}: {}", id, err);
            }
        }
        Commands::Status => {
            let engine = NotificationEngine::from_env();
            engine.fetch(true).await?;
            println!("{}", render_status(&engine.status()));
        }
    }

    Ok(())
}

/// Tell the user when the feed shown is not the service's latest word.
fn report_degradation(engine: &NotificationEngine) {
    let status = engine.status();
    if status.is_rate_limited {
        eprintln!("Service is rate limiting requests; showing cached notifications.");
    } else if let Some(err) = status.last_error {
        eprintln!("Could not refresh notifications: {}", err);
    }
}
