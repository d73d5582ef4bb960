
use harness::{spawn_gateway, test_config};
use relay_broker::MockTransport;
use serde_json::json;

// Upstream address that refuses connections; publish tests never reach it.
const DEAD_UPSTREAM: &str = "http://127.0.0.1:9";

#[tokio::test]
async fn publish_fails_when_broker_is_down() {
    let gateway = spawn_gateway(MockTransport::refusing(), test_config(DEAD_UPSTREAM)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(gateway.url("/api/tenants/t1/publish"))
        .json(&json!({"x": 1}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"error": "Failed to publish message"}));
    assert!(gateway.transport.published().is_empty());
}

#[tokio::test]
async fn publish_succeeds_when_broker_is_up() {
    let gateway = spawn_gateway(MockTransport::new(), test_config(DEAD_UPSTREAM)).await;

    let client = reqwest::Client::new();
    let response = client
        .post(gateway.url("/api/tenants/t1/publish"))
        .json(&json!({"x": 1}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"message": "Message published successfully"}));

    let published = gateway.transport.published_on("tenant.t1");
    assert_eq!(published.len(), 1);
    assert_eq!(published[0], br#"{"x":1}"#.to_vec());
}

#[tokio::test]
async fn publish_targets_the_tenant_queue() {
    let gateway = spawn_gateway(MockTransport::new(), test_config(DEAD_UPSTREAM)).await;

    let client = reqwest::Client::new();
    for tenant in ["acme", "globex"] {
        let response = client
            .post(gateway.url(&format!("/api/tenants/{tenant}/publish")))
            .json(&json!({"hello": tenant}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    assert_eq!(gateway.transport.published_on("tenant.acme").len(), 1);
    assert_eq!(gateway.transport.published_on("tenant.globex").len(), 1);
}

#[tokio::test]
async fn publish_recovers_via_on_demand_reconnect() {
    let transport = MockTransport::new();
    transport.fail_next_connects(1);
    let gateway = spawn_gateway(transport, test_config(DEAD_UPSTREAM)).await;

    // First attempt fails the connect; the manager retries after one backoff
    // interval, which fits inside the publish grace period.
    let client = reqwest::Client::new();
    let response = client
        .post(gateway.url("/api/tenants/t1/publish"))
        .json(&json!({"x": 1}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(gateway.transport.published_on("tenant.t1").len(), 1);
}

#[tokio::test]
async fn health_does_not_depend_on_broker_or_upstream() {
    let gateway = spawn_gateway(MockTransport::refusing(), test_config(DEAD_UPSTREAM)).await;

    let response = reqwest::get(gateway.url("/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body, json!({"status": "ok"}));
}

#[tokio::test]
async fn root_returns_welcome_message() {
    let gateway = spawn_gateway(MockTransport::new(), test_config(DEAD_UPSTREAM)).await;

    let response = reqwest::get(gateway.url("/")).await.unwrap();
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Welcome to the relay gateway");
}
