use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower::ServiceExt;
use ulid::Ulid;

use agenda::api::{self, AppState};
use agenda::audit::AuditHub;
use agenda::auth::BearerToken;
use agenda::tenant::TenantManager;

// ── Test infrastructure ──────────────────────────────────────

fn test_state() -> AppState {
    let dir = std::env::temp_dir().join(format!("agenda_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    AppState {
        tenants: Arc::new(TenantManager::new(dir, 1000, Arc::new(AuditHub::new()))),
        default_timezone: chrono_tz::UTC,
        expose_internal_errors: false,
    }
}

async fn start_test_server(token: Option<&str>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = api::router(test_state(), token.map(BearerToken::new));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

struct Client {
    http: reqwest::Client,
    base: String,
    client_id: u64,
    company_id: u64,
}

impl Client {
    fn new(addr: SocketAddr, client_id: u64, company_id: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: format!("http://{addr}/api/v1"),
            client_id,
            company_id,
        }
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = self
            .http
            .request(method, format!("{}{path}", self.base))
            .header("x-client-id", self.client_id.to_string())
            .header("x-company-id", self.company_id.to_string());
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = StatusCode::from_u16(resp.status().as_u16()).unwrap();
        (status, resp.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    async fn put(&self, path: &str, body: Value) -> (StatusCode, Value) {
        self.send(reqwest::Method::PUT, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(reqwest::Method::PATCH, path, body).await
    }

    async fn delete(&self, path: &str) -> (StatusCode, Value) {
        self.send(reqwest::Method::DELETE, path, None).await
    }

    async fn add_professional(&self) -> Ulid {
        let id = Ulid::new();
        let (status, body) = self.put(&format!("/professionals/{id}"), json!({"name": "Dr. Ana"})).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        id
    }

    async fn book(&self, professional_id: Ulid, start: &str, end: &str) -> (StatusCode, Value) {
        self.post(
            "/bookings",
            json!({
                "lead_id": "lead-42",
                "professional_id": professional_id.to_string(),
                "product_id": "consulta",
                "start": start,
                "end": end,
                "price": "150.00",
                "discount": "20.00",
            }),
        )
        .await
    }
}

fn error_code(body: &Value) -> &str {
    assert_eq!(body["success"], false, "{body}");
    body["error"]["code"].as_str().unwrap()
}

// ── Health + tenant headers ──────────────────────────────────

#[tokio::test]
async fn health_needs_no_tenant() {
    let addr = start_test_server(None).await;
    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
}

#[tokio::test]
async fn missing_tenant_headers_rejected() {
    let addr = start_test_server(None).await;
    let resp = reqwest::get(format!("http://{addr}/api/v1/bookings")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let zero = Client::new(addr, 0, 1);
    let (status, body) = zero.get("/bookings").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

// ── Booking lifecycle ────────────────────────────────────────

#[tokio::test]
async fn booking_lifecycle_over_http() {
    let addr = start_test_server(None).await;
    let client = Client::new(addr, 7, 3);
    let pid = client.add_professional().await;

    let (status, body) = client
        .get(&format!("/bookings/availability?professional_id={pid}&date=2024-03-04"))
        .await;
    assert_eq!(status, StatusCode::OK);
    let slots = body["data"]["slots"].as_array().unwrap().clone();
    assert!(slots.contains(&json!("10:00")));
    assert_eq!(body["data"]["duration_minutes"], 60);

    let (status, body) = client.book(pid, "2024-03-04T10:00:00Z", "2024-03-04T11:00:00Z").await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let booking = &body["data"];
    assert_eq!(booking["status"], "scheduled");
    assert_eq!(booking["confirmed"], false);
    assert_eq!(booking["client_id"], 7);
    assert_eq!(booking["company_id"], 3);
    assert_eq!(booking["duration_minutes"], 60);
    assert_eq!(booking["final_price"], "130.00");
    let id = booking["id"].as_str().unwrap().to_string();

    let (_, body) = client
        .get(&format!("/bookings/availability?professional_id={pid}&date=2024-03-04"))
        .await;
    let slots = body["data"]["slots"].as_array().unwrap();
    assert!(!slots.contains(&json!("10:00")));
    assert!(!slots.contains(&json!("09:30")));
    assert!(slots.contains(&json!("11:00")));

    let (status, body) = client.book(pid, "2024-03-04T10:30:00Z", "2024-03-04T11:30:00Z").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "SLOT_UNAVAILABLE");

    let (status, body) = client.patch(&format!("/bookings/{id}/confirm"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["confirmed"], true);
    assert!(body["data"]["confirmed_at"].is_string());

    let (status, body) = client
        .patch(&format!("/bookings/{id}/cancel"), Some(json!({"reason": "patient asked"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["cancellation_reason"], "patient asked");

    let (status, body) = client.patch(&format!("/bookings/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "INVALID_TRANSITION");

    // The cancelled booking no longer blocks its interval.
    let (status, _) = client.book(pid, "2024-03-04T10:30:00Z", "2024-03-04T11:30:00Z").await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = client.delete(&format!("/bookings/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], true);
    let (status, body) = client.get(&format!("/bookings/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
}

#[tokio::test]
async fn derived_fields_cannot_be_written() {
    let addr = start_test_server(None).await;
    let client = Client::new(addr, 1, 1);
    let pid = client.add_professional().await;

    let (status, body) = client
        .post(
            "/bookings",
            json!({
                "lead_id": "l", "professional_id": pid.to_string(), "product_id": "p",
                "start": "2024-03-04T10:00:00Z", "end": "2024-03-04T11:00:00Z",
                "price": "100.00", "final_price": "1.00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (_, body) = client.book(pid, "2024-03-04T10:00:00Z", "2024-03-04T11:00:00Z").await;
    let id = body["data"]["id"].as_str().unwrap().to_string();
    let (status, body) = client
        .patch(&format!("/bookings/{id}"), Some(json!({"status": "confirmed"})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, body) = client
        .patch(&format!("/bookings/{id}"), Some(json!({"notes": "bring exams"})))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["notes"], "bring exams");
    assert_eq!(body["data"]["status"], "scheduled");
}

#[tokio::test]
async fn bad_input_maps_to_error_codes() {
    let addr = start_test_server(None).await;
    let client = Client::new(addr, 1, 1);
    let pid = client.add_professional().await;

    let (status, body) = client.book(pid, "not-a-date", "2024-03-04T11:00:00Z").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_TIMESTAMP");

    let (status, body) = client.book(pid, "2024-03-04T10:00:00", "2024-03-04T11:00:00").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "INVALID_TIMESTAMP");

    let (status, body) = client
        .post(
            "/bookings",
            json!({
                "lead_id": "l", "professional_id": pid.to_string(), "product_id": "p",
                "start": "2024-03-04T10:00:00", "end": "2024-03-04T11:00:00",
                "timezone": "America/Sao_Paulo", "price": "100.00",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["data"]["start"].as_str().unwrap().starts_with("2024-03-04T13:00:00"));

    let (status, body) = client.book(pid, "2024-03-04T11:00:00Z", "2024-03-04T10:00:00Z").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, body) = client.book(Ulid::new(), "2024-03-04T10:00:00Z", "2024-03-04T11:00:00Z").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");

    let (status, body) = client.get("/bookings/not-a-ulid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (status, body) = client
        .get(&format!("/bookings/availability?professional_id={pid}&date=2024-03-04&duration_minutes=0"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");
}

// ── Listing + directory ──────────────────────────────────────

#[tokio::test]
async fn list_sorted_newest_first_with_filters() {
    let addr = start_test_server(None).await;
    let client = Client::new(addr, 1, 1);
    let pid = client.add_professional().await;

    for (start, end) in [
        ("2024-03-04T09:00:00Z", "2024-03-04T10:00:00Z"),
        ("2024-03-04T14:00:00Z", "2024-03-04T15:00:00Z"),
        ("2024-03-05T09:00:00Z", "2024-03-05T10:00:00Z"),
    ] {
        let (status, _) = client.book(pid, start, end).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = client.get("/bookings").await;
    assert_eq!(status, StatusCode::OK);
    let starts: Vec<&str> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|b| b["start"].as_str().unwrap())
        .collect();
    assert_eq!(starts.len(), 3);
    assert!(starts[0].starts_with("2024-03-05T09:00"));
    assert!(starts[2].starts_with("2024-03-04T09:00"));

    let (_, body) = client
        .get("/bookings?from=2024-03-04T12:00:00Z&to=2024-03-04T23:59:59Z")
        .await;
    let data = body["data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert!(data[0]["start"].as_str().unwrap().starts_with("2024-03-04T14:00"));

    let (_, body) = client.get("/bookings?status=cancelled").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = client.get(&format!("/bookings?professional_id={}", Ulid::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");
}

#[tokio::test]
async fn professional_directory_round() {
    let addr = start_test_server(None).await;
    let client = Client::new(addr, 1, 1);

    let id = Ulid::new();
    let (status, body) = client
        .put(&format!("/professionals/{id}"), json!({"nome": "Dr. Bia", "timezone": "America/Sao_Paulo"}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Dr. Bia");
    assert_eq!(body["data"]["timezone"], "America/Sao_Paulo");

    let (status, body) = client
        .put(&format!("/professionals/{}", Ulid::new()), json!({"timezone": "Mars/Base"}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    let (_, body) = client.get("/professionals").await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    let (status, _) = client.book(id, "2024-03-04T13:00:00Z", "2024-03-04T14:00:00Z").await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, body) = client.delete(&format!("/professionals/{id}")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(error_code(&body), "HAS_BOOKINGS");

    let other = client.add_professional().await;
    let (status, _) = client.delete(&format!("/professionals/{other}")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = client.get(&format!("/professionals/{other}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");
}

// ── Isolation + concurrency ──────────────────────────────────

#[tokio::test]
async fn tenants_are_isolated() {
    let addr = start_test_server(None).await;
    let a = Client::new(addr, 1, 1);
    let b = Client::new(addr, 1, 2);

    let pid = a.add_professional().await;
    let (_, body) = a.book(pid, "2024-03-04T10:00:00Z", "2024-03-04T11:00:00Z").await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = b.get(&format!("/bookings/{id}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
    let (_, body) = b.get("/bookings").await;
    assert!(body["data"].as_array().unwrap().is_empty());

    // Same professional id in the other tenant is a different professional.
    let (status, _) = b.put(&format!("/professionals/{pid}"), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = b.book(pid, "2024-03-04T10:00:00Z", "2024-03-04T11:00:00Z").await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_book_once() {
    let addr = start_test_server(None).await;
    let client = Arc::new(Client::new(addr, 9, 9));
    let pid = client.add_professional().await;

    let attempts = (0..12).map(|i| {
        let client = client.clone();
        async move {
            let start = format!("2024-03-04T15:{:02}:00Z", i * 2);
            client.book(pid, &start, "2024-03-04T16:30:00Z").await.0
        }
    });
    let statuses = futures::future::join_all(attempts).await;

    let created = statuses.iter().filter(|s| **s == StatusCode::CREATED).count();
    let conflicts = statuses.iter().filter(|s| **s == StatusCode::CONFLICT).count();
    assert_eq!(created, 1);
    assert_eq!(conflicts, 11);
}

// ── Auth ─────────────────────────────────────────────────────

#[tokio::test]
async fn bearer_token_required_when_configured() {
    let addr = start_test_server(Some("s3cret")).await;
    let http = reqwest::Client::new();
    let url = format!("http://{addr}/api/v1/professionals");

    let resp = http
        .get(&url)
        .header("x-client-id", "1")
        .header("x-company-id", "1")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(error_code(&body), "UNAUTHORIZED");

    let resp = http
        .get(&url)
        .header("x-client-id", "1")
        .header("x-company-id", "1")
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);

    let resp = reqwest::get(format!("http://{addr}/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
}

#[tokio::test]
async fn router_serves_without_socket() {
    let app = api::router(test_state(), None);
    let resp = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/professionals")
                .header("x-client-id", "5")
                .header("x-company-id", "5")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["success"], true);
    assert!(body["data"].as_array().unwrap().is_empty());
}

async fn call(state: &AppState, uri: &str) -> (StatusCode, Value) {
    let resp = api::router(state.clone(), None)
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("x-client-id", "8")
                .header("x-company-id", "3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn reads_for_unknown_tenant_create_nothing() {
    let state = test_state();
    let pid = Ulid::new();

    let (status, body) = call(&state, "/api/v1/bookings").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());
    let (status, body) = call(&state, "/api/v1/professionals").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, body) = call(&state, &format!("/api/v1/bookings/{}", Ulid::new())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NOT_FOUND");
    let (status, body) = call(&state, &format!("/api/v1/professionals/{pid}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");
    let (status, body) = call(&state, &format!("/api/v1/bookings?professional_id={pid}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");

    let availability = format!("/api/v1/bookings/availability?professional_id={pid}&date=2024-03-04");
    let (status, body) = call(&state, &availability).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "PROFESSIONAL_NOT_FOUND");
    let (status, body) = call(&state, &format!("{availability}&duration_minutes=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "VALIDATION_ERROR");

    assert_eq!(state.tenants.tenant_count(), 0);
}
