use std::sync::{Arc, Once};

use assessment_backend::config::init_config;
use assessment_backend::database::MemoryStore;
use assessment_backend::middleware::auth::Claims;
use assessment_backend::models::question::{QuestionConfig, QuestionContent, ShortTextConfig};
use assessment_backend::models::template::TemplateStatus;
use assessment_backend::routes;
use assessment_backend::services::notification_service::LogNotifier;
use assessment_backend::AppState;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use jsonwebtoken::{encode, EncodingKey, Header};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const JWT_SECRET: &str = "routes-test-secret";

static INIT: Once = Once::new();

fn setup() {
    INIT.call_once(|| {
        std::env::set_var("SERVER_ADDRESS", "127.0.0.1:0");
        std::env::set_var("DATABASE_URL", "postgres://unused/test");
        std::env::set_var("JWT_SECRET", JWT_SECRET);
        std::env::set_var("WEBHOOK_SECRET", "whsec");
        std::env::remove_var("NOTIFICATION_WEBHOOK_URL");
        std::env::set_var("STAFF_ROLES", "admin,instructor");
        init_config().expect("config");
    });
}

fn app(store: &MemoryStore) -> Router {
    setup();
    routes::app(AppState::with_store(
        Arc::new(store.clone()),
        Arc::new(LogNotifier),
    ))
}

fn token(role: &str) -> String {
    let claims = Claims {
        sub: Uuid::new_v4().to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp() as usize,
        role: Some(role.to_string()),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap()
}

fn request(method: &str, uri: &str, role: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(role) = role {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token(role)));
    }
    match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn seeded() -> (MemoryStore, Uuid) {
    let store = MemoryStore::new();
    let template_id = store.create_template("Spiritual Formation", TemplateStatus::Draft);
    store
        .seed_question(
            template_id,
            QuestionContent {
                label: "Describe your prayer rhythm".to_string(),
                help_text: None,
                required: true,
                config: QuestionConfig::ShortText(ShortTextConfig::default()),
                max_points: Decimal::from(3),
            },
        )
        .unwrap();
    (store, template_id)
}

#[tokio::test]
async fn health_is_public() {
    let (store, _) = seeded();
    let response = app(&store)
        .oneshot(request("GET", "/health", None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "ok");
}

#[tokio::test]
async fn template_routes_require_a_staff_token() {
    let (store, template_id) = seeded();
    let uri = format!("/api/templates/{}/questions", template_id);

    let response = app(&store)
        .oneshot(request("GET", &uri, None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app(&store)
        .oneshot(request("GET", &uri, Some("student"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn editor_round_trip_through_http() {
    let (store, template_id) = seeded();
    let uri = format!("/api/templates/{}/questions", template_id);

    let response = app(&store)
        .oneshot(request("GET", &uri, Some("instructor"), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    let stable_id = view["questions"][0]["stable_id"].clone();

    let body = json!({
        "expected_version": 0,
        "questions": [
            {
                "identity": { "existing": stable_id },
                "label": "Describe your weekly prayer rhythm",
                "config": { "type": "short_text" },
                "max_points": "3"
            },
            {
                "label": "Which discipline is hardest?",
                "config": { "type": "single_choice" },
                "max_points": "2",
                "options": [
                    { "text": "Fasting", "is_correct": false },
                    { "text": "Silence", "is_correct": false }
                ]
            }
        ]
    });
    let response = app(&store)
        .oneshot(request("PUT", &uri, Some("admin"), Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = json_body(response).await;
    assert_eq!(result["breaking"], false);
    assert_eq!(result["version"], 1);
    assert_eq!(store.questions(template_id).len(), 2);
}

#[tokio::test]
async fn malformed_spec_is_unprocessable() {
    let (store, template_id) = seeded();
    let uri = format!("/api/templates/{}/questions", template_id);
    let body = json!({
        "questions": [
            {
                "label": "Pick one",
                "config": { "type": "multiple_choice" },
                "max_points": "1",
                "options": []
            }
        ]
    });

    let response = app(&store)
        .oneshot(request("PUT", &uri, Some("admin"), Some(body)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let error = json_body(response).await;
    assert!(error["error"]
        .as_str()
        .unwrap()
        .starts_with("questions[0].options"));
}

#[tokio::test]
async fn status_transition_endpoint_enforces_lifecycle() {
    let (store, template_id) = seeded();
    let uri = format!("/api/templates/{}/status", template_id);

    let response = app(&store)
        .oneshot(request("POST", &uri, Some("admin"), Some(json!({ "status": "archived" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app(&store)
        .oneshot(request("POST", &uri, Some("admin"), Some(json!({ "status": "published" }))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "published");
}
