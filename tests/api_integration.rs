//! Integration tests for the REST surface.
//!
//! Each test spins up an Axum server on a random port and drives it with
//! reqwest against an in-memory store and a stub gateway.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use sms_drip::api::api_routes;
use sms_drip::config::EngineConfig;
use sms_drip::dispatch::{DeliveryGateway, SendOutcome};
use sms_drip::engine::Engine;
use sms_drip::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Default)]
struct StubGateway {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl DeliveryGateway for StubGateway {
    fn name(&self) -> &str {
        "stub"
    }
    async fn send(&self, to: &str, _body: &str) -> SendOutcome {
        self.sent.lock().unwrap().push(to.to_string());
        SendOutcome::delivered(None)
    }
}

/// Start a server on a random port, return its base URL and the gateway.
async fn start_server() -> (String, Arc<StubGateway>) {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let gateway = Arc::new(StubGateway::default());
    let engine = Arc::new(Engine::new(EngineConfig::default(), store, gateway.clone()));
    let app = api_routes(engine);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), gateway)
}

fn new_campaign_body() -> Value {
    json!({
        "name": "Launch",
        "templates": [
            {"day_offset": 0, "message": "Hi {first_name}, welcome"},
            {"day_offset": 3, "message": "Checking in, {name}"}
        ],
        "contacts": [
            {"phone": "(212) 736-5000", "name": "Ada Lovelace"},
            {"phone": "212.736.5000", "name": "Ada again"},
            {"phone": "+1 212 736 5001"}
        ]
    })
}

async fn create(client: &reqwest::Client, base: &str) -> String {
    let resp = client
        .post(format!("{base}/api/campaigns"))
        .json(&new_campaign_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);
    let body: Value = resp.json().await.unwrap();
    body["campaign"]["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_endpoint() {
    let (base, _) = start_server().await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn intake_validate_and_fix() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();
        let csv = "Mobile,First Name,Last Name\n2127365000,Ada,Lovelace\n(212) 736-5000,Ada,Lovelace\nnope,Bad,Row\n";

        let resp = client
            .post(format!("{base}/api/intake/validate?mode=validate"))
            .body(csv)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["stats"]["total_rows"], 3);
        assert_eq!(body["stats"]["duplicate_phones"], 1);
        assert_eq!(body["phone_column"], "Mobile");
        assert!(body.get("cleaned_csv").is_none());

        let body: Value = client
            .post(format!("{base}/api/intake/validate?mode=fix"))
            .body(csv)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["summary"]["after_cleaning"], 1);
        let cleaned = body["cleaned_csv"].as_str().unwrap();
        assert!(cleaned.starts_with("phone,name"));
        assert!(cleaned.contains("+12127365000,Ada Lovelace"));

        let resp = client
            .post(format!("{base}/api/intake/validate?mode=shred"))
            .body(csv)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test]
async fn campaign_lifecycle_over_http() {
    timeout(TEST_TIMEOUT, async {
        let (base, gateway) = start_server().await;
        let client = reqwest::Client::new();
        let id = create(&client, &base).await;

        // Day-0 touch is due immediately.
        let report: Value = client
            .post(format!("{base}/api/dispatch/run"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report["sent"], 2);
        assert_eq!(gateway.sent.lock().unwrap().len(), 2);

        let resp = client.post(format!("{base}/api/campaigns/{id}/pause")).send().await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "paused");

        let resp = client.post(format!("{base}/api/campaigns/{id}/resume")).send().await.unwrap();
        assert_eq!(resp.json::<Value>().await.unwrap()["status"], "active");

        let detail: Value = client
            .get(format!("{base}/api/campaigns/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["campaign"]["sent_count"], 2);
        assert_eq!(detail["stats"]["pending"], 2);
        assert_eq!(detail["enrollments"].as_array().unwrap().len(), 2);

        let list: Value = client
            .get(format!("{base}/api/campaigns?status=active&search=laun"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list["total"], 1);
        assert_eq!(list["summary"]["total_messages"], 2);

        let resp = client
            .post(format!("{base}/api/campaigns/{id}/duplicate"))
            .json(&json!({"name": "Relaunch"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        assert_eq!(resp.json::<Value>().await.unwrap()["campaign"]["name"], "Relaunch");

        let resp = client.post(format!("{base}/api/campaigns/{id}/retry")).send().await.unwrap();
        assert_eq!(resp.json::<Value>().await.unwrap()["queued"], 0);

        let resp = client.delete(format!("{base}/api/campaigns/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 204);
        let resp = client.delete(format!("{base}/api/campaigns/{id}")).send().await.unwrap();
        assert_eq!(resp.status(), 409);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test]
async fn error_statuses() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/api/campaigns/not-a-uuid/pause"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let missing = uuid::Uuid::new_v4();
        let resp = client
            .post(format!("{base}/api/campaigns/{missing}/resume"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));

        let resp = client
            .post(format!("{base}/api/campaigns"))
            .json(&json!({"name": "", "templates": [], "contacts": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let mut far = new_campaign_body();
        far["templates"][1]["day_offset"] = json!(4_000_000_000u32);
        let resp = client
            .post(format!("{base}/api/campaigns"))
            .json(&far)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = client
            .get(format!("{base}/api/campaigns?offset={}&limit={}", usize::MAX, usize::MAX))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["has_more"], false);
    })
    .await
    .expect("Test timed out");
}

#[tokio::test]
async fn inbound_webhook_suppresses() {
    timeout(TEST_TIMEOUT, async {
        let (base, _) = start_server().await;
        let client = reqwest::Client::new();
        let id = create(&client, &base).await;

        let reply = json!({"from_phone": "212-736-5001", "body": "STOP"});
        let body: Value = client
            .post(format!("{base}/api/inbound"))
            .json(&reply)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["outcome"], "suppressed");
        assert_eq!(body["campaign_id"], id.as_str());

        let body: Value = client
            .post(format!("{base}/api/inbound"))
            .json(&reply)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["outcome"], "already_suppressed");

        let detail: Value = client
            .get(format!("{base}/api/campaigns/{id}"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(detail["campaign"]["reply_count"], 1);
        assert_eq!(detail["replies"].as_array().unwrap().len(), 2);
    })
    .await
    .expect("Test timed out");
}
