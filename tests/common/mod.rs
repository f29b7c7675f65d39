//! Common utilities for task-relay end-to-end tests

use std::sync::Arc;
use std::time::Duration;
use task_relay::config::{ApiConfig, RequesterConfig};
use task_relay::metrics::RequesterMetrics;
use task_relay::queue::SqliteQueue;
use task_relay::requester::HttpExecutor;
use task_relay::{Database, ProxyService, RequesterService, TaskId, TaskResult, TaskStatus};
use tempfile::TempDir;
use tokio::sync::broadcast;

pub const QUEUE_NAME: &str = "e2e";

/// A proxy and a requester sharing one SQLite file, as two processes would
pub struct Pipeline {
    pub proxy: Arc<ProxyService>,
    pub router: axum::Router,
    pub store: Database,
    temp_dir: TempDir,
}

impl Pipeline {
    pub async fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = open_db(&temp_dir).await;
        let queue = queue_over(open_db(&temp_dir).await);

        let proxy = Arc::new(ProxyService::new(Arc::new(store.clone()), Arc::new(queue)));
        let router = task_relay::api::create_proxy_router(proxy.clone(), &ApiConfig::default());

        Self {
            proxy,
            router,
            store,
            temp_dir,
        }
    }

    /// Build a requester over its own connections to the same file
    pub async fn requester(&self, workers: usize, retry_count: u32) -> Arc<RequesterService> {
        let config = RequesterConfig {
            workers,
            retry_count,
            ..Default::default()
        };
        let (event_tx, _) = broadcast::channel(256);
        let executor = HttpExecutor::new(Duration::from_secs(5), config.attempts()).expect("client");

        Arc::new(RequesterService::new(
            &config,
            Arc::new(open_db(&self.temp_dir).await),
            Arc::new(queue_over(open_db(&self.temp_dir).await)),
            Arc::new(executor),
            Arc::new(RequesterMetrics::new().expect("metrics")),
            event_tx,
        ))
    }
}

async fn open_db(dir: &TempDir) -> Database {
    Database::new(&dir.path().join("relay.db"))
        .await
        .expect("database")
}

fn queue_over(db: Database) -> SqliteQueue {
    SqliteQueue::new(
        db,
        QUEUE_NAME,
        Duration::from_millis(10),
        8,
        Duration::from_secs(30),
    )
}

pub fn spawn_run(
    requester: &Arc<RequesterService>,
) -> tokio::task::JoinHandle<task_relay::Result<()>> {
    let requester = requester.clone();
    tokio::spawn(async move { requester.run().await })
}

/// Poll the store until `id` reaches a terminal status
pub async fn wait_for_terminal(store: &Database, id: TaskId) -> TaskResult {
    use task_relay::store::TaskStore;

    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let record = store.get_task(id).await.expect("record exists");
            if record.status.is_terminal() {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("task did not finish in time")
}

#[allow(dead_code)]
pub fn assert_done(record: &TaskResult, status_code: u16) {
    assert_eq!(record.status, TaskStatus::Done, "record: {record:?}");
    assert_eq!(record.status_code, Some(status_code));
}
