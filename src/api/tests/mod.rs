use super::*;
use crate::config::{ApiConfig, RequesterConfig};
use crate::metrics::RequesterMetrics;
use crate::queue::MemoryQueue;
use crate::test_helpers::{FakeExecutor, MemoryStore, RecordingSender};
use crate::types::Event;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;
use tower::ServiceExt;


struct ProxyHarness {
    store: Arc<MemoryStore>,
    sender: Arc<RecordingSender>,
    router: Router,
}

fn proxy_harness(config: &ApiConfig) -> ProxyHarness {
    let store = Arc::new(MemoryStore::new());
    let sender = Arc::new(RecordingSender::new());
    let service = Arc::new(ProxyService::new(store.clone(), sender.clone()));
    ProxyHarness {
        store,
        sender,
        router: create_proxy_router(service, config),
    }
}

struct RequesterHarness {
    db: Database,
    service: Arc<RequesterService>,
    event_tx: broadcast::Sender<Event>,
    router: Router,
    _temp_dir: TempDir,
}

async fn requester_harness() -> RequesterHarness {
    let temp_dir = tempfile::tempdir().unwrap();
    let db = Database::new(&temp_dir.path().join("tasks.db")).await.unwrap();
    let (event_tx, _) = broadcast::channel(16);

    let service = Arc::new(RequesterService::new(
        &RequesterConfig::default(),
        Arc::new(db.clone()),
        Arc::new(MemoryQueue::new()),
        Arc::new(FakeExecutor::responding(200, "")),
        Arc::new(RequesterMetrics::new().unwrap()),
        event_tx.clone(),
    ));
    let router = create_requester_router(service.clone(), db.clone(), &ApiConfig::default());

    RequesterHarness {
        db,
        service,
        event_tx,
        router,
        _temp_dir: temp_dir,
    }
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_proxy_health_reports_version() {
    let h = proxy_harness(&ApiConfig::default());

    let response = h.router.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_every_proxy_response_carries_a_request_id() {
    let h = proxy_harness(&ApiConfig::default());

    let response = h.router.clone().oneshot(get_request("/health")).await.unwrap();
    let generated = response
        .headers()
        .get(request_id::REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap();
    assert!(uuid::Uuid::parse_str(generated).is_ok());

    let upstream = uuid::Uuid::new_v4().to_string();
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(request_id::REQUEST_ID_HEADER, &upstream)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers()[request_id::REQUEST_ID_HEADER],
        upstream.as_str()
    );
}

#[tokio::test]
async fn test_cors_headers_follow_config() {
    let enabled = ApiConfig {
        cors_enabled: true,
        cors_origins: vec!["*".to_string()],
        ..Default::default()
    };
    let request = || {
        Request::builder()
            .uri("/health")
            .header("Origin", "http://localhost:3000")
            .body(Body::empty())
            .unwrap()
    };

    let response = proxy_harness(&enabled)
        .router
        .oneshot(request())
        .await
        .unwrap();
    assert!(response.headers().contains_key("access-control-allow-origin"));

    let disabled = ApiConfig {
        cors_enabled: false,
        ..Default::default()
    };
    let response = proxy_harness(&disabled)
        .router
        .oneshot(request())
        .await
        .unwrap();
    assert!(!response.headers().contains_key("access-control-allow-origin"));
}

#[tokio::test]
async fn test_cors_restricts_to_listed_origins() {
    let config = ApiConfig {
        cors_enabled: true,
        cors_origins: vec!["http://allowed.test".to_string()],
        ..Default::default()
    };
    let h = proxy_harness(&config);

    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("Origin", "http://allowed.test")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers()["access-control-allow-origin"],
        "http://allowed.test"
    );
}

#[tokio::test]
async fn test_swagger_ui_is_optional() {
    let with_ui = ApiConfig {
        swagger_ui: true,
        ..Default::default()
    };
    let response = proxy_harness(&with_ui)
        .router
        .oneshot(get_request("/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let without_ui = ApiConfig {
        swagger_ui: false,
        ..Default::default()
    };
    let response = proxy_harness(&without_ui)
        .router
        .oneshot(get_request("/api-docs/openapi.json"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_serve_stops_on_shutdown() {
    let h = proxy_harness(&ApiConfig::default());
    let listener = bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
    let address = listener.local_addr().unwrap();
    let shutdown = CancellationToken::new();

    let server = tokio::spawn(serve(listener, h.router, shutdown.clone()));

    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .build()
        .unwrap();
    let response = client
        .get(format!("http://{address}/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    drop(response);

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server did not stop")
        .unwrap()
        .unwrap();
}
