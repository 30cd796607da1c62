//! Rebuild tool: re-derive all aggregate and location state.
//!
//! Opens the database, enqueues a locator chain at every root and an
//! aggregation chain at every leaf of every domain, and drains the queue.
//! Because every job re-derives from stored state, this repairs any
//! derived field or index record that went stale (for example a job lost
//! between a commit and a process crash).

use std::sync::Arc;

use taskforest::config::EngineConfig;
use taskforest::propagation::Propagator;
use taskforest::queue::{InProcessQueue, JobRunner, PropagationJob, WorkQueue};
use taskforest::store::{LibSqlStore, TreeStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let db_path =
        std::env::var("TASKFOREST_DB").unwrap_or_else(|_| "./data/taskforest.db".to_string());

    eprintln!("taskforest rebuild v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {db_path}");

    let queue = Arc::new(InProcessQueue::new());
    let store = Arc::new(
        LibSqlStore::open(std::path::Path::new(&db_path), queue.clone())
            .await
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to open database at {db_path}: {e}");
                std::process::exit(1);
            }),
    );

    let propagator = Arc::new(Propagator::new(
        store.clone() as Arc<dyn TreeStore>,
        queue.clone(),
    ));
    let runner = JobRunner::new(queue.clone(), propagator, EngineConfig::default());

    let domains = store.domains().await?;
    let mut seeded = 0usize;
    for domain in &domains {
        for root in store.roots(domain).await? {
            queue
                .enqueue(PropagationJob::locate_down(domain, root))
                .await?;
            seeded += 1;
        }
        for leaf in store.leaves(domain).await? {
            queue
                .enqueue(PropagationJob::aggregate_up(domain, leaf))
                .await?;
            seeded += 1;
        }
    }

    tracing::info!(
        domains = domains.len(),
        seeded,
        "Rebuild seeded; draining queue"
    );
    let delivered = runner.run_until_idle().await;
    tracing::info!(delivered, "Rebuild complete");
    Ok(())
}
