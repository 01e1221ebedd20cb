use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use availability_cell::router::availability_routes;
use shared_database::store::WindowStore;
use shared_utils::test_utils::{
    at, pending_org_window, service, JwtTestUtils, TestConfig, TestContext, TestUser,
};

fn bearer(user: &TestUser) -> String {
    let token = JwtTestUtils::create_test_token(user, &TestConfig::default().jwt_secret, None);
    format!("Bearer {}", token)
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn propose_body(provider_id: Uuid) -> Body {
    Body::from(
        json!({
            "provider_id": provider_id,
            "start_time": at(9, 0).to_rfc3339(),
            "end_time": at(10, 0).to_rfc3339(),
            "services": [{
                "service_id": Uuid::new_v4(),
                "duration_minutes": 30,
                "price": 100.0
            }]
        })
        .to_string(),
    )
}

#[tokio::test]
async fn test_provider_creates_window_and_public_sees_slots() {
    let ctx = TestContext::new(at(6, 0));
    let provider = TestUser::provider("provider@clinic.example");
    let provider_id = Uuid::parse_str(&provider.id).unwrap();

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .method("POST")
            .uri("/windows")
            .header(header::AUTHORIZATION, bearer(&provider))
            .header(header::CONTENT_TYPE, "application/json")
            .body(propose_body(provider_id))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["window"]["status"], "accepted");
    assert_eq!(body["materialization"]["slots_created"], 2);

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .uri(format!("/providers/{}/open-slots", provider_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["slots"][0]["status"], "available");
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let ctx = TestContext::new(at(6, 0));

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .method("POST")
            .uri("/windows")
            .header(header::CONTENT_TYPE, "application/json")
            .body(propose_body(Uuid::new_v4()))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "unauthorized");

    let expired = JwtTestUtils::create_expired_token(
        &TestUser::provider("provider@clinic.example"),
        &TestConfig::default().jwt_secret,
    );
    let (status, _) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .uri("/windows/unmaterialized")
            .header(header::AUTHORIZATION, format!("Bearer {}", expired))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_double_accept_reports_invalid_state() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    let provider = TestUser::provider_with_id("provider@clinic.example", provider_id);
    let window = pending_org_window(provider_id, Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let accept = || {
        Request::builder()
            .method("POST")
            .uri(format!("/windows/{}/accept", window.id))
            .header(header::AUTHORIZATION, bearer(&provider))
            .body(Body::empty())
            .unwrap()
    };

    let (status, body) = send(availability_routes(ctx.state.clone()), accept()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window"]["status"], "accepted");

    let (status, body) = send(availability_routes(ctx.state.clone()), accept()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "invalid_state");
}

#[tokio::test]
async fn test_reject_accepts_missing_body() {
    let ctx = TestContext::new(at(6, 0));
    let provider_id = Uuid::new_v4();
    let provider = TestUser::provider_with_id("provider@clinic.example", provider_id);
    let window = pending_org_window(provider_id, Uuid::new_v4(), at(9, 0), at(10, 0), vec![service(30, None)]);
    ctx.memory.insert_window(&window).await.unwrap();

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .method("POST")
            .uri(format!("/windows/{}/reject", window.id))
            .header(header::AUTHORIZATION, bearer(&provider))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["window"]["status"], "rejected");
}

#[tokio::test]
async fn test_unknown_window_and_forbidden_listing() {
    let ctx = TestContext::new(at(6, 0));
    let client = TestUser::client("client@example.com");

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .uri(format!("/windows/{}", Uuid::new_v4()))
            .header(header::AUTHORIZATION, bearer(&client))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = send(
        availability_routes(ctx.state.clone()),
        Request::builder()
            .uri("/windows/unmaterialized")
            .header(header::AUTHORIZATION, bearer(&client))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");
}
