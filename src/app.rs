//! Process wiring: config → database → queue → service → HTTP server

use crate::api;
use crate::config::Config;
use crate::db::Database;
use crate::metrics::RequesterMetrics;
use crate::queue::SqliteQueue;
use crate::requester::{HttpExecutor, RequesterService};
use crate::submitter::ProxyService;
use crate::types::Event;
use crate::Result;
use async_trait::async_trait;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Capacity of the requester's event channel
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// A long-running process that can be asked to stop
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Run until [`shutdown`](Self::shutdown) is called
    async fn run(&self) -> Result<()>;

    /// Stop accepting work, finish what is in flight and release resources
    async fn shutdown(&self) -> Result<()>;
}

/// The submission process: task API over the store and the queue
pub struct ProxyApp {
    config: Arc<Config>,
    service: Arc<ProxyService>,
    shutdown: CancellationToken,
    /// Held while the HTTP server runs
    serving: TaskTracker,
}

impl ProxyApp {
    /// Validate `config` and open the store and the queue
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let queue = SqliteQueue::open(&config).await?;
        tracing::info!(
            database = %config.persistence.database_path.display(),
            queue = %queue.name(),
            "Proxy initialized"
        );

        let service = Arc::new(ProxyService::new(Arc::new(db), Arc::new(queue)));
        Ok(Self::with_service(config, service))
    }

    fn with_service(config: Config, service: Arc<ProxyService>) -> Self {
        Self {
            config: Arc::new(config),
            service,
            shutdown: CancellationToken::new(),
            serving: TaskTracker::new(),
        }
    }

    /// Serve the task API on an already bound listener until shutdown
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        let _serving = self.serving.token();
        api::serve(listener, self.router(), self.shutdown.clone()).await
    }

    /// The submission service
    pub fn service(&self) -> Arc<ProxyService> {
        self.service.clone()
    }

    /// The task API router
    pub fn router(&self) -> Router {
        api::create_proxy_router(self.service.clone(), &self.config.api)
    }
}

#[async_trait]
impl Lifecycle for ProxyApp {
    async fn run(&self) -> Result<()> {
        let listener = api::bind(self.config.api.bind_address).await?;
        self.run_on(listener).await
    }

    async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating proxy shutdown");
        self.shutdown.cancel();

        // Handlers still in flight finish their store write and publish first
        self.serving.close();
        self.serving.wait().await;

        self.service.close().await
    }
}

/// The consumer process: requester service plus its monitoring API
pub struct RequesterApp {
    config: Arc<Config>,
    db: Database,
    service: Arc<RequesterService>,
    shutdown: CancellationToken,
    /// Held while the monitoring server runs
    serving: TaskTracker,
}

impl RequesterApp {
    /// Validate `config`, open the store and the queue and build the HTTP client
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let db = Database::new(&config.persistence.database_path).await?;
        let queue = SqliteQueue::open(&config).await?;
        let executor = HttpExecutor::from_config(&config.requester)?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        tracing::info!(
            database = %config.persistence.database_path.display(),
            queue = %queue.name(),
            workers = config.requester.workers,
            attempts = executor.attempts(),
            "Requester initialized"
        );

        let service = Arc::new(RequesterService::new(
            &config.requester,
            Arc::new(db.clone()),
            Arc::new(queue),
            Arc::new(executor),
            Arc::new(RequesterMetrics::new()?),
            event_tx,
        ));

        Ok(Self {
            config: Arc::new(config),
            db,
            service,
            shutdown: CancellationToken::new(),
            serving: TaskTracker::new(),
        })
    }

    /// Consume tasks and serve the monitoring API on an already bound
    /// listener until shutdown
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        let _serving = self.serving.token();
        tokio::try_join!(
            self.service.run(),
            api::serve(listener, self.router(), self.shutdown.clone()),
        )?;
        Ok(())
    }

    /// The requester service
    pub fn service(&self) -> Arc<RequesterService> {
        self.service.clone()
    }

    /// Subscribe to lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.service.subscribe()
    }

    /// The monitoring router
    pub fn router(&self) -> Router {
        api::create_requester_router(self.service.clone(), self.db.clone(), &self.config.api)
    }
}

#[async_trait]
impl Lifecycle for RequesterApp {
    async fn run(&self) -> Result<()> {
        let listener = api::bind(self.config.api.metrics_bind_address).await?;
        self.run_on(listener).await
    }

    async fn shutdown(&self) -> Result<()> {
        // The monitoring API keeps answering (503 on /health) while workers drain
        self.service.drain().await;

        self.shutdown.cancel();
        self.serving.close();
        self.serving.wait().await;

        self.service.close().await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PersistenceConfig, QueueConfig};
    use crate::queue::TaskSender;
    use crate::submitter::RequestContext;
    use crate::test_helpers::MemoryStore;
    use crate::types::{NewTask, Task, TaskStatus};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Publisher that holds every send until released
    #[derive(Default)]
    struct GatedSender {
        sent: Mutex<Vec<Task>>,
        entered: Notify,
        gate: Notify,
        closed: AtomicBool,
    }

    #[async_trait]
    impl TaskSender for GatedSender {
        async fn send_task(&self, task: &Task) -> Result<()> {
            self.entered.notify_one();
            self.gate.notified().await;
            if self.closed.load(Ordering::SeqCst) {
                return Err(crate::Error::Queue("publisher closed".into()));
            }
            self.sent.lock().unwrap().push(task.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    async fn local_listener() -> (TcpListener, String) {
        let listener = api::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        (listener, base)
    }

    fn config_in(dir: &std::path::Path) -> Config {
        let path = dir.join("relay.db");
        let mut config = Config {
            persistence: PersistenceConfig {
                database_path: path.clone(),
            },
            queue: QueueConfig {
                database_path: path,
                poll_interval: Duration::from_millis(10),
                ..Default::default()
            },
            ..Default::default()
        };
        config.api.bind_address = "127.0.0.1:0".parse().unwrap();
        config.api.metrics_bind_address = "127.0.0.1:0".parse().unwrap();
        config
    }

    #[tokio::test]
    async fn test_proxy_shutdown_lets_in_flight_submission_publish() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new());
        let sender = Arc::new(GatedSender::default());
        let service = Arc::new(ProxyService::new(store.clone(), sender.clone()));
        let proxy = Arc::new(ProxyApp::with_service(config_in(dir.path()), service));

        let (listener, base) = local_listener().await;
        let run = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.run_on(listener).await }
        });

        let submit = tokio::spawn(async move {
            reqwest::Client::new()
                .post(format!("{base}/api/v1/tasks"))
                .json(&serde_json::json!({"url": "http://example.test/", "method": "GET"}))
                .send()
                .await
        });
        sender.entered.notified().await;

        let shutdown = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.shutdown().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!shutdown.is_finished(), "shutdown waits for the handler");
        assert!(!store.is_closed());
        assert!(!sender.closed.load(Ordering::SeqCst));

        sender.gate.notify_one();
        let response = submit.await.unwrap().unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: serde_json::Value = response.json().await.unwrap();

        shutdown.await.unwrap().unwrap();
        run.await.unwrap().unwrap();

        let sent = sender.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id.to_string(), body["id"].as_str().unwrap());
        assert_eq!(store.record(sent[0].id).unwrap().status, TaskStatus::New);
        assert!(store.is_closed());
    }

    #[tokio::test]
    async fn test_requester_monitoring_answers_until_workers_drain() {
        let target = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_millis(1500)),
            )
            .mount(&target)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let proxy = ProxyApp::new(config.clone()).await.unwrap();
        let requester = Arc::new(RequesterApp::new(config).await.unwrap());

        let (listener, base) = local_listener().await;
        let run = tokio::spawn({
            let requester = requester.clone();
            async move { requester.run_on(listener).await }
        });

        let ctx = RequestContext::new();
        let id = proxy
            .service()
            .add_task(
                &ctx,
                NewTask {
                    url: format!("{}/slow", target.uri()),
                    method: "GET".into(),
                    headers: None,
                    body: None,
                },
            )
            .await
            .unwrap();

        let service = requester.service();
        tokio::time::timeout(Duration::from_secs(5), async {
            while service.metrics().in_flight == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        let shutdown = tokio::spawn({
            let requester = requester.clone();
            async move { requester.shutdown().await }
        });

        let client = reqwest::Client::new();
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let health = client.get(format!("{base}/health")).send().await.unwrap();
                if health.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // The store is still open while the worker finishes
        let metrics = client.get(format!("{base}/metrics")).send().await.unwrap();
        assert_eq!(metrics.status(), reqwest::StatusCode::OK);
        let text = metrics.text().await.unwrap();
        assert!(text.contains("requester_workers_in_flight 1"), "{text}");

        shutdown.await.unwrap().unwrap();
        run.await.unwrap().unwrap();

        let record = proxy.service().get_task_info(&ctx, id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Done);
        assert_eq!(record.body, b"slow");
        proxy.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.requester.workers = 0;

        assert!(ProxyApp::new(config.clone()).await.is_err());
        assert!(RequesterApp::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_apps_run_until_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let proxy = Arc::new(ProxyApp::new(config.clone()).await.unwrap());
        let requester = Arc::new(RequesterApp::new(config).await.unwrap());

        let proxy_run = tokio::spawn({
            let proxy = proxy.clone();
            async move { proxy.run().await }
        });
        let requester_run = tokio::spawn({
            let requester = requester.clone();
            async move { requester.run().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        proxy.shutdown().await.unwrap();
        requester.shutdown().await.unwrap();

        let timeout = Duration::from_secs(5);
        tokio::time::timeout(timeout, proxy_run).await.unwrap().unwrap().unwrap();
        tokio::time::timeout(timeout, requester_run).await.unwrap().unwrap().unwrap();
    }
}
