use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use engine::ranking::check_invariants;
use engine::{
    DirtyTracker, DocumentSync, HttpDocumentSync, MutationConsumer, MutationHandler, MutationKind,
    MutationQueue, SyncScheduler,
};
use storage::models::{AthleteId, ChampionshipId, ClassId, NewMutation};
use storage::{Database, PgConsumerLease, RosterStore};
use tokio::sync::{Notify, watch};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "roster-worker")]
#[command(about = "Championship roster mutation consumer and document sync", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume the mutation queue and keep documents in sync.
    Run,
    /// Append one mutation to the queue.
    Enqueue {
        kind: MutationKind,

        #[arg(long)]
        championship: ChampionshipId,

        #[arg(long)]
        class: Option<ClassId>,

        #[arg(long)]
        athlete: Option<AthleteId>,

        #[arg(long)]
        old_cut: Option<i32>,

        #[arg(long)]
        new_cut: Option<i32>,

        #[arg(long)]
        confirm_admitted: bool,

        #[arg(long, env = "USER", default_value = "worker")]
        requested_by: String,
    },
    /// List the documents waiting to be regenerated.
    Dirty {
        #[arg(long)]
        year: i32,
    },
    /// Verify the ranking invariants of one class without changing it.
    Check {
        #[arg(long)]
        championship: ChampionshipId,

        #[arg(long)]
        class: ClassId,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "worker={},engine={},storage={}",
                    log_level, log_level, log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let database_url = cli
        .database_url
        .context("DATABASE_URL must be set or passed with --database-url")?;
    let db = connect(&database_url).await?;

    match cli.command {
        Commands::Run => handle_run(db).await,
        Commands::Enqueue {
            kind,
            championship,
            class,
            athlete,
            old_cut,
            new_cut,
            confirm_admitted,
            requested_by,
        } => {
            let mut mutation = NewMutation::new(kind.as_str(), championship, requested_by);
            mutation.class_id = class;
            mutation.athlete_id = athlete;
            mutation.old_cut = old_cut;
            mutation.new_cut = new_cut;
            if confirm_admitted {
                mutation = mutation.confirming_admitted();
            }
            handle_enqueue(db, mutation).await
        }
        Commands::Dirty { year } => handle_dirty(db, year).await,
        Commands::Check {
            championship,
            class,
        } => handle_check(db, championship, class).await,
    }
}

async fn connect(database_url: &str) -> anyhow::Result<Database> {
    tracing::info!(
        "Connecting to database at: {}",
        database_url.split('@').next_back().unwrap_or("unknown")
    );
    let db = Database::new(database_url)
        .await
        .context("Failed to initialize database")?;

    db.run_migrations()
        .await
        .context("Failed to run migrations")?;
    tracing::debug!("Database migrations completed");

    Ok(db)
}

async fn handle_run(db: Database) -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load worker configuration")?;
    tracing::info!(year = config.season_year, "Configuration loaded");

    let service_url = config
        .document_service_url
        .clone()
        .context("DOCUMENT_SERVICE_URL is required to run the worker")?;
    let sync: Arc<dyn DocumentSync> = Arc::new(
        HttpDocumentSync::new(service_url, config.document_service_token.clone())
            .context("Failed to build document service client")?,
    );

    let store = Arc::new(db.clone());
    let sync_wake = Arc::new(Notify::new());
    let scheduler = SyncScheduler::new(Arc::clone(&store), Arc::clone(&sync), config.sync_settings())
        .with_wake(Arc::clone(&sync_wake));

    let handler = MutationHandler::new(Arc::clone(&store), sync, sync_wake);
    let lease = Arc::new(PgConsumerLease::new(db.pool().clone(), config.consumer_lock_key));
    let consumer = MutationConsumer::new(store, lease, handler, Arc::new(Notify::new()))
        .with_poll_interval(config.queue_poll);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut consumer_task = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move { consumer.run(shutdown).await }
    });
    let scheduler_task = tokio::spawn(async move { scheduler.run(shutdown_rx).await });

    let consumer_result = tokio::select! {
        stop = wait_for_stop(config.run_for) => {
            stop?;
            let _ = shutdown_tx.send(true);
            consumer_task.await
        }
        finished = &mut consumer_task => {
            let _ = shutdown_tx.send(true);
            finished
        }
    };

    scheduler_task.await.context("Sync scheduler panicked")?;
    consumer_result
        .context("Mutation consumer panicked")?
        .context("Mutation consumer failed")?;

    tracing::info!("Worker stopped");
    Ok(())
}

/// Resolves on ctrl-c, or once `run_for` has elapsed.
async fn wait_for_stop(run_for: Option<Duration>) -> anyhow::Result<()> {
    let deadline = async {
        match run_for {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for ctrl-c")?;
            tracing::info!("Interrupted, finishing the work in flight");
        }
        _ = deadline => {
            tracing::info!("Run duration elapsed, finishing the work in flight");
        }
    }
    Ok(())
}

async fn handle_enqueue(db: Database, mutation: NewMutation) -> anyhow::Result<()> {
    let queue = MutationQueue::new(Arc::new(db));
    let record = queue
        .enqueue(mutation)
        .await
        .context("Failed to enqueue mutation")?;

    println!("Enqueued mutation {} ({})", record.mutation_id, record.kind);
    println!("{} mutation(s) pending", queue.pending().await?);
    Ok(())
}

async fn handle_dirty(db: Database, year: i32) -> anyhow::Result<()> {
    let tracker = DirtyTracker::new(Arc::new(db));
    let mut drain = tracker.drain_dirty(year);

    let mut count = 0;
    while let Some(mark) = drain.next().await? {
        println!("{:<40} marked {}", mark.key, mark.marked_at.format("%Y-%m-%d %H:%M:%S"));
        count += 1;
    }

    println!("{} dirty document(s) for {}", count, year);
    Ok(())
}

async fn handle_check(
    db: Database,
    championship_id: ChampionshipId,
    class_id: ClassId,
) -> anyhow::Result<()> {
    let limit = db.load_limit(championship_id, class_id).await?;
    let entries = db.load_class(championship_id, class_id).await?;

    for entry in &entries {
        println!(
            "{:>5} {:>5} {:>10} {:>8} {:<8}{}",
            entry.sequence,
            entry.rank,
            entry.athlete_id,
            entry.average,
            entry.participation,
            if entry.is_champion { " champion" } else { "" }
        );
    }

    check_invariants(class_id, &entries, Some(limit))
        .with_context(|| format!("Class {} fails the ranking checks", class_id))?;

    println!(
        "Class {} is consistent: {} entries, cut {}",
        class_id,
        entries.len(),
        limit
    );
    Ok(())
}
