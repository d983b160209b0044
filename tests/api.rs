//! End-to-end tests for the HTTP API.
//!
//! Every test starts its own server on an ephemeral port, backed by the
//! in-memory store, and talks to it over real HTTP with `reqwest`.

use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;

use referral_network::{
    repositories::Repositories,
    services::{
        http::{self, AppState},
        spawn_services,
    },
    settings::Settings,
};

const SECRET: &str = "test-secret";
const READONLY: &str = "test-reader";

struct TestApp {
    base: String,
    client: Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(self.url(path))
            .header("x-api-key", SECRET)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .header("x-api-key", SECRET)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn post_form(&self, path: &str, body: &'static str) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(path))
            .header("x-api-key", SECRET)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap_or(Value::Null))
    }
}

fn settings(extra: &str) -> Settings {
    let toml = format!(
        r#"
        [storage]
        backend = "memory"

        [auth]
        api_secret_key = "{SECRET}"
        api_readonly_key = "{READONLY}"

        {extra}
        "#
    );
    Settings::from_toml(&toml).unwrap()
}

async fn spawn_app(settings: Settings) -> TestApp {
    let channels = spawn_services(Repositories::memory(), &settings);
    let state = AppState::new(channels, &settings);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(http::serve(listener, state));

    TestApp {
        base: format!("http://{addr}"),
        client: Client::new(),
    }
}

async fn default_app() -> TestApp {
    spawn_app(settings("[rate_limit]\napi_max_requests = 1000")).await
}

#[tokio::test]
async fn referral_crud_round_trip() {
    let app = default_app().await;

    let (status, body) = app
        .post(
            "/api/referrals",
            json!({
                "referal_id": 1001,
                "referal_nickname": "alice",
                "referal_name": "Alice",
                "utm": "source=bot"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Referral created successfully");
    assert_eq!(body["data"]["referral_id"], "1001");
    assert_eq!(body["data"]["channel_activity"], "inactive");

    let (status, body) = app.get("/api/referrals/1001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);
    assert_eq!(body["data"]["referral_nickname"], "alice");

    let response = app
        .client
        .put(app.url("/api/referrals/1001"))
        .header("x-api-key", SECRET)
        .json(&json!({ "referral_name": "Alice Updated" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["data"]["referral_name"], "Alice Updated");
    assert_eq!(body["data"]["utm"], "source=bot");

    let response = app
        .client
        .delete(app.url("/api/referrals/1001"))
        .header("x-api-key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, body) = app.get("/api/referrals/1001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["status"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn rejects_duplicates_and_bad_bodies() {
    let app = default_app().await;

    let (status, _) = app.post("/api/referrals", json!({ "referral_id": "7" })).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.post("/api/referrals", json!({ "referral_id": "7" })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_REFERRAL");

    let (status, body) = app.post("/api/referrals", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "EMPTY_BODY");

    let (status, body) = app.post("/api/referrals", json!({ "utm": "x" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .post("/api/referrals", json!({ "referral_id": "8", "referrer_id": "8" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn field_type_errors_are_validation_errors() {
    let app = default_app().await;

    let (status, body) = app
        .post(
            "/api/referrals",
            json!({ "referral_id": "9", "reg_date": "yesterday" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

    let response = app
        .client
        .post(app.url("/api/referrals"))
        .header("x-api-key", SECRET)
        .header("content-type", "application/json")
        .body("{\"referral_id\":")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "MALFORMED_PAYLOAD");
}

#[tokio::test]
async fn form_bodies_are_accepted() {
    let app = default_app().await;

    let (status, body) = app
        .post_form("/api/referrals", "referal_id=u3&referal_nickname=carol")
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["referral_id"], "u3");
    assert_eq!(body["data"]["referral_nickname"], "carol");

    let (status, body) = app
        .post_form("/api/payments", "userId=u3&amount=5.50&currency=EUR")
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount"], 5.5);
    assert_eq!(body["data"]["currency"], "EUR");

    let (status, body) = app.post_form("/api/referrals", "").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "EMPTY_BODY");
}

#[tokio::test]
async fn upsert_creates_then_merges() {
    let app = default_app().await;

    let (status, body) = app
        .post(
            "/api/referrals/upsert",
            json!({ "referral_id": "42", "referral_name": "Test", "utm": "a" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["referral_name"], "Test");

    let (status, body) = app
        .post(
            "/api/referrals/upsert",
            json!({ "referral_id": 42, "referral_name": "Test Updated" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["referral_name"], "Test Updated");
    assert_eq!(body["data"]["utm"], "a");
}

#[tokio::test]
async fn payments_follow_their_referral() {
    let app = default_app().await;

    let (status, body) = app
        .post("/api/payments", json!({ "userId": "u1", "amount": 10.0 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "REFERRAL_NOT_FOUND");

    app.post("/api/referrals", json!({ "referral_id": "u1" })).await;

    let (status, body) = app
        .post(
            "/api/payments",
            json!({ "userId": "u1", "amount": 10.0, "transactionId": "tx-1", "status": "success" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["currency"], "USD");
    assert_eq!(body["data"]["status"], "success");

    let (status, body) = app
        .post("/api/payments", json!({ "userId": "u1", "amount": "19.99" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["amount"], 19.99);

    let (status, body) = app
        .post(
            "/api/payments",
            json!({ "userId": "u1", "amount": 5.0, "transactionId": "tx-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "DUPLICATE_TRANSACTION");

    for _ in 0..2 {
        let (status, _) = app
            .post("/api/payments", json!({ "userId": "u1", "amount": 1.5 }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (_, body) = app.get("/api/payments/user/u1").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 4);

    app.client
        .delete(app.url("/api/referrals/u1"))
        .header("x-api-key", SECRET)
        .send()
        .await
        .unwrap();

    let (_, body) = app.get("/api/payments/user/u1").await;
    assert!(body["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn trees_are_capped_and_counted() {
    let app = default_app().await;

    let chain = ["a", "b", "c", "d", "e", "f"];
    for (i, id) in chain.iter().enumerate() {
        let referrer = if i == 0 { Value::Null } else { json!(chain[i - 1]) };
        let (status, _) = app
            .post("/api/referrals", json!({ "referral_id": id, "referrer_id": referrer }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = app.get("/api/referrals/tree").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["meta"]["total"], 5);
    assert_eq!(body["meta"]["levels"], 5);
    assert_eq!(body["data"][0]["referral_id"], "a");
    assert_eq!(body["data"][0]["total_referrals"], 4);

    let (status, body) = app.get("/api/referrals/a/tree").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["referral_id"], "a");
    assert_eq!(body["meta"]["total"], 4);
    assert_eq!(body["meta"]["levels"], 4);
    assert_eq!(body["data"][0]["referral_id"], "b");

    let (status, body) = app.get("/api/referrals/missing/tree").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (_, body) = app.get("/api/referrals/activity-stats").await;
    assert_eq!(
        body["data"],
        json!({ "total": 6, "active": 5, "inactive": 1, "window_days": 7 })
    );

    let (_, body) = app.get("/api/referrals/a/activity-stats").await;
    assert_eq!(body["data"]["total"], 4);
    assert_eq!(body["data"]["active"], 4);
}

#[tokio::test]
async fn dashboard_can_focus_on_one_user() {
    let app = default_app().await;

    app.post("/api/referrals", json!({ "referral_id": "top" })).await;
    app.post("/api/referrals", json!({ "referral_id": "kid", "referrer_id": "top" }))
        .await;

    let script = app
        .client
        .get(app.url("/js/dashboard.js"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(script.contains("params.get('user')"));
    assert!(script.contains("encodeURIComponent(this.user)"));

    // The per-user view reads the same shapes as the global one.
    let (status, tree) = app.get("/api/referrals/top/tree").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tree["data"][0]["referral_id"], "kid");
    assert!(tree["data"][0]["children"].is_array());

    let (status, stats) = app.get("/api/referrals/top/activity-stats").await;
    assert_eq!(status, StatusCode::OK);
    for field in ["total", "active", "inactive"] {
        assert!(stats["data"][field].is_u64(), "{field}");
    }
}

#[tokio::test]
async fn search_matches_nicknames() {
    let app = default_app().await;

    app.post(
        "/api/referrals",
        json!({ "referral_id": "1", "referral_nickname": "alice" }),
    )
    .await;
    app.post(
        "/api/referrals",
        json!({ "referral_id": "2", "referral_nickname": "bob" }),
    )
    .await;

    let (status, body) = app.get("/api/referrals/search?q=ALI").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["referral_id"], "1");

    let (_, body) = app.get("/api/referrals/search?q=").await;
    assert_eq!(body["meta"]["count"], 0);

    let (status, body) = app.get("/api/referrals/search?q=ali&limit=abc").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 1);
}

#[tokio::test]
async fn api_keys_are_enforced() {
    let app = default_app().await;

    let response = app
        .client
        .get(app.url("/api/referrals/tree"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["hint"], "Add x-api-key header or api_key query parameter");

    let response = app
        .client
        .get(app.url(&format!("/api/referrals/tree?api_key={READONLY}")))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .client
        .post(app.url("/api/referrals"))
        .header("x-api-key", READONLY)
        .json(&json!({ "referral_id": "1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .client
        .get(app.url("/api/referrals/tree"))
        .header("x-api-key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn allow_list_blocks_other_clients() {
    let app = spawn_app(settings("")).await;
    let blocked = spawn_app({
        let mut settings = settings("");
        settings.auth.allowed_ips = vec!["10.1.2.3".to_string()];
        settings
    })
    .await;

    let response = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = blocked
        .client
        .get(blocked.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn api_rate_limit_returns_429() {
    let app = spawn_app(settings("[rate_limit]\napi_max_requests = 2")).await;

    for expected_remaining in ["1", "0"] {
        let response = app
            .client
            .get(app.url("/api/referrals/activity-stats"))
            .header("x-api-key", SECRET)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-ratelimit-limit"], "2");
        assert_eq!(
            response.headers()["x-ratelimit-remaining"],
            expected_remaining
        );
    }

    let response = app
        .client
        .get(app.url("/api/referrals/activity-stats"))
        .header("x-api-key", SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.headers().contains_key("x-ratelimit-reset"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "RATE_LIMITED");
    assert!(body["retry_after"].as_u64().unwrap() <= 900);

    let response = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn monitor_reports_recorded_requests() {
    let app = default_app().await;

    app.get("/api/referrals/activity-stats").await;
    app.get("/api/referrals/missing").await;
    for path in ["/no-such-page-1", "/no-such-page-2"] {
        app.client.get(app.url(path)).send().await.unwrap();
    }

    let (status, body) = app.get("/api/monitor/stats").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], true);

    let stats = &body["data"]["stats"];
    assert!(stats["total"].as_u64().unwrap() >= 2);
    assert!(stats["errors"].as_u64().unwrap() >= 1);
    assert_eq!(stats["top_ips"][0]["ip"], "127.0.0.1");

    let endpoints: Vec<&str> = stats["top_endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["endpoint"].as_str())
        .collect();
    assert!(endpoints.contains(&"GET /api/referrals/{id}"));
    assert!(endpoints.iter().all(|e| !e.contains("no-such-page")));
    assert!(body["data"]["prediction"]["recommendation"].is_string());
}
