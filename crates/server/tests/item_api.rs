use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use mama_core::MemoryStore;
use mama_server::config::MamaConfig;
use mama_server::http::{REQUEST_ID_HEADER, router_with_store};
use tokio::net::TcpListener;

const URI: &str = "dc.identifier.uri";
const HANDLE_3: &str = "http://hdl.handle.net/123456789/3";
const HANDLE_7: &str = "http://hdl.handle.net/123456789/7";

fn registry() -> MemoryStore {
    MemoryStore::new()
        .with_schema(1, "dc")
        .with_field(1, 1, "identifier", Some("uri"))
        .with_field(2, 1, "title", None)
        .with_field(3, 1, "type", None)
        .with_field(4, 1, "creator", None)
        .with_field(5, 1, "title", Some("alternative"))
        .with_value(1, 1, HANDLE_3)
        .with_value(2, 2, "A Very Important Study")
        .with_value(1, 2, "Field Notes")
        .with_value(1, 4, "Ada Lovelace")
        .with_value(1, 4, "Grace Hopper")
        .with_value(3, 1, HANDLE_7)
        .with_value(3, 2, "Field Notes")
}

fn test_config(shutdown_key: Option<&str>) -> MamaConfig {
    let mut kv = HashMap::from([
        ("MAMA_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        (
            "MAMA_DB_URL".to_string(),
            "postgres://localhost:5432/unused".to_string(),
        ),
    ]);
    if let Some(key) = shutdown_key {
        kv.insert("MAMA_SHUTDOWN_KEY".to_string(), key.to_string());
    }
    MamaConfig::from_kv(&kv).expect("test config should be valid")
}

async fn spawn_app(
    store: Arc<MemoryStore>,
    shutdown_key: Option<&str>,
) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let (app, shutdown) = router_with_store(test_config(shutdown_key), store)
        .await
        .expect("router should init");

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown.requested())
            .await;
    });

    (addr, handle)
}

async fn get_item(
    client: &reqwest::Client,
    addr: SocketAddr,
    params: &[(&str, &str)],
) -> reqwest::Response {
    client
        .get(format!("http://{}/item", addr))
        .query(params)
        .send()
        .await
        .expect("request should succeed")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn item_returns_default_field_for_each_matching_record() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    let response = get_item(&client, addr, &[("qf", "dc.title"), ("qv", "Field Notes")]).await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(
        body,
        serde_json::json!({
            "field": "dc.title",
            "value": "Field Notes",
            "items": [
                { "dc.identifier.uri": HANDLE_3 },
                { "dc.identifier.uri": HANDLE_7 }
            ]
        })
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn item_returns_only_resolvable_requested_fields() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    let response = get_item(
        &client,
        addr,
        &[
            ("qf", URI),
            ("qv", HANDLE_3),
            ("rf", "dc.title"),
            ("rf", "dc.bogus"),
            ("rf", "dc.creator"),
        ],
    )
    .await;
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    let text = response.text().await.expect("body text");
    assert!(!text.contains("dc.bogus"));
    assert_eq!(text.matches(URI).count(), 1, "only the echoed field names the uri: {}", text);
    assert!(text.contains("\"dc.title\":\"Field Notes\""));
    assert!(text.contains("\"dc.creator\":\"Ada Lovelace\",\"dc.creator\":\"Grace Hopper\""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn item_without_field_or_value_is_bad_request() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    for params in [
        vec![],
        vec![("qf", URI)],
        vec![("qv", HANDLE_3)],
        vec![("qf", ""), ("qv", HANDLE_3)],
    ] {
        let response = get_item(&client, addr, &params).await;
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_INVALID_PARAMS");
        assert_eq!(body["retryable"], false);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_field_is_not_found() {
    let store = Arc::new(registry());
    let (addr, _server) = spawn_app(store.clone(), None).await;
    let client = reqwest::Client::new();

    for field in ["dc.identifier.foo", "mods.title", "dc"] {
        let response = get_item(&client, addr, &[("qf", field), ("qv", HANDLE_3)]).await;
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

        let body: serde_json::Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_UNKNOWN_FIELD");
        assert_eq!(body["message"], format!("No such field: {}", field));
    }
    assert_eq!(store.stats().row_queries, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unmatched_value_is_not_found() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();
    let missing = "http://hdl.handle.net/123456789/5";

    let response = get_item(&client, addr, &[("qf", URI), ("qv", missing)]).await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["code"], "ERR_NO_MATCHES");
    assert_eq!(
        body["message"],
        format!("No items found for: {}::{}", URI, missing)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn whitespace_value_is_looked_up_not_rejected() {
    let store = Arc::new(registry());
    let (addr, _server) = spawn_app(store.clone(), None).await;
    let client = reqwest::Client::new();

    let response = get_item(&client, addr, &[("qf", "dc.title"), ("qv", " ")]).await;
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["code"], "ERR_NO_MATCHES");
    assert_eq!(store.stats().row_queries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn storage_outage_is_retryable_service_unavailable() {
    let store = Arc::new(registry());
    let (addr, _server) = spawn_app(store.clone(), None).await;
    let client = reqwest::Client::new();
    store.set_unavailable(true);

    let response = get_item(&client, addr, &[("qf", URI), ("qv", HANDLE_3)]).await;
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = response.json().await.expect("json body");
    assert_eq!(body["code"], "ERR_STORAGE_UNAVAILABLE");
    assert_eq!(body["retryable"], true);

    let ready = client
        .get(format!("http://{}/readyz", addr))
        .send()
        .await
        .expect("readyz request should succeed");
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    let body: serde_json::Value = ready.json().await.expect("json body");
    assert_eq!(body["checks"]["store"], false);

    store.set_unavailable(false);
    let ready = client
        .get(format!("http://{}/readyz", addr))
        .send()
        .await
        .expect("readyz request should succeed");
    assert_eq!(ready.status(), reqwest::StatusCode::OK);
    assert_eq!(store.stats().open_sessions, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_id_is_echoed_sanitized() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("http://{}/item", addr))
        .query(&[("qf", URI), ("qv", HANDLE_3)])
        .header(REQUEST_ID_HEADER, "req_01 smoke")
        .send()
        .await
        .expect("request should succeed");

    assert_eq!(
        response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok()),
        Some("req_01smoke")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn ping_and_metrics_are_not_cached() {
    let (addr, _server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    let ping = client
        .get(format!("http://{}/ping", addr))
        .send()
        .await
        .expect("ping should succeed");
    assert_eq!(ping.status(), reqwest::StatusCode::OK);
    assert_eq!(
        ping.headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("must-revalidate,no-cache,no-store")
    );
    assert_eq!(ping.text().await.expect("body"), "pong");

    get_item(&client, addr, &[("qf", URI), ("qv", HANDLE_3)]).await;

    let metrics = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .expect("metrics should succeed");
    assert_eq!(metrics.status(), reqwest::StatusCode::OK);
    assert_eq!(
        metrics
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok()),
        Some("must-revalidate,no-cache,no-store")
    );
    let text = metrics.text().await.expect("body");
    assert!(text.contains("mama_http_requests_total"));
    assert!(text.contains("mama_lookup_outcomes_total{outcome=\"matches\"}"));
    assert!(text.contains("mama_field_cache_entries"));
    assert!(text.contains("route=\"/ping\""));

    client
        .get(format!("http://{}/readyz", addr))
        .send()
        .await
        .expect("readyz should succeed");
    let text = client
        .get(format!("http://{}/metrics", addr))
        .send()
        .await
        .expect("metrics should succeed")
        .text()
        .await
        .expect("body");
    assert!(text.contains("route=\"/readyz\""));
    assert!(text.contains("route=\"/metrics\""));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_without_configured_key_is_refused() {
    let (addr, server) = spawn_app(Arc::new(registry()), None).await;
    let client = reqwest::Client::new();

    for url in [
        format!("http://{}/shutdown", addr),
        format!("http://{}/shutdown?key=", addr),
        format!("http://{}/shutdown?key=anything", addr),
    ] {
        let response = client.get(url).send().await.expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
        assert_eq!(response.text().await.expect("body"), "Not authorized");
    }
    assert!(!server.is_finished());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_with_configured_key_stops_the_server() {
    let (addr, server) = spawn_app(Arc::new(registry()), Some("s3cret")).await;
    let client = reqwest::Client::new();

    let wrong = client
        .get(format!("http://{}/shutdown?key=guess", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(wrong.status(), reqwest::StatusCode::UNAUTHORIZED);

    let right = client
        .get(format!("http://{}/shutdown?key=s3cret", addr))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(right.status(), reqwest::StatusCode::OK);
    assert_eq!(right.text().await.expect("body"), "Shutting down");
    drop(client);

    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .expect("server should stop after shutdown")
        .expect("server task should not panic");
}
