use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tasksync::api;
use tasksync::config::TaskConfig;
use tasksync::due_date::{format_due_date, QuickDate};
use tasksync::scheduler::{Clock, RefreshTick, SystemClock};
use tasksync::workspace::{TaskView, Workspace};

#[derive(Parser)]
#[command(name = "tasksync")]
#[command(about = "Due-dated tasks derived from mind-map node attributes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API
    Serve {
        /// Port for HTTP API
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Map files (JSON) to open at startup
        #[arg(short, long)]
        map: Vec<PathBuf>,
    },
    /// Print the tasks of a map file
    List {
        /// Map file (JSON)
        file: PathBuf,
    },
    /// Print a quick due date computed from now
    QuickDate {
        #[arg(value_enum)]
        kind: QuickDate,

        /// Existing due date whose time of day should be kept
        #[arg(short, long)]
        existing: Option<String>,
    },
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "tasksync=debug,tower_http=debug".into()),
    );

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = TaskConfig::load();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    match cli.command {
        Some(Commands::Serve { port, map }) => serve(config, clock, port, &map).await?,
        Some(Commands::List { file }) => {
            let workspace = Workspace::new(config, clock);
            workspace.load_map(&file)?;
            print_tasks("Pending", &workspace.pending_tasks());
            print_tasks("Completed", &workspace.completed_tasks());
            workspace.engine().shutdown().await;
        }
        Some(Commands::QuickDate { kind, existing }) => {
            let calculator = config.calculator();
            let existing = existing.map(|raw| calculator.parse(&raw)).transpose()?;
            let due = calculator.quick(kind, clock.now(), existing);
            println!("{}", format_due_date(due));
        }
        None => serve(config, clock, 3000, &[]).await?,
    }

    Ok(())
}

async fn serve(
    config: TaskConfig,
    clock: Arc<dyn Clock>,
    port: u16,
    maps: &[PathBuf],
) -> anyhow::Result<()> {
    tracing::info!("Starting tasksync server on port {}", port);

    let workspace = Workspace::new(config, clock.clone());
    for path in maps {
        workspace.load_map(path)?;
    }

    let scheduler = workspace.engine().start_refresh(clock.as_ref());
    let refreshed = workspace.clone();
    scheduler.on_fire(Arc::new(move |tick: &RefreshTick| {
        let counts = refreshed.bucket_counts();
        tracing::info!(
            day = %tick.fired_at.date(),
            overdue = counts.overdue,
            today = counts.today,
            this_week = counts.this_week,
            "Day rolled over, task buckets re-evaluated"
        );
        Ok(())
    }));

    let app = api::create_router(workspace.clone());

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("tasksync server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    workspace.engine().shutdown().await;
    Ok(())
}

fn print_tasks(title: &str, tasks: &[TaskView]) {
    println!("{} ({})", title, tasks.len());
    for task in tasks {
        println!(
            "  {}  {:<10}  {}",
            format_due_date(task.due_date),
            task.bucket.as_str(),
            task.text
        );
    }
}
