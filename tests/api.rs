use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use campus_club_hub::{chatbot::ChatBackend, config::Config, connect_to_db, email::Mailer};
use tower::ServiceExt;

const JWT_SECRET: &str = "dGVzdC1zZWNyZXQtZm9yLXVuaXQtdGVzdHM=";

/// The router over a pool that never connects: every request below has to
/// be answered before a connection is checked out.
fn app() -> Router {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    let config = Config {
        db_url: "postgres://nobody@127.0.0.1:1/none".to_string(),
        port: 0,
        frontend_host: "http://localhost:3000".to_string(),
        media_root: std::env::temp_dir()
            .join("campus-club-hub-tests")
            .to_string_lossy()
            .into_owned(),
        smtp_relay: "localhost".to_string(),
        email_username: None,
        email_password: None,
        chatbot_api_key: None,
        chatbot_api_url: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        chatbot_model: "test".to_string(),
    };
    let pool = connect_to_db(&config.db_url).unwrap();
    let mailer = Mailer::disabled(config.frontend_host.clone());
    campus_club_hub::app(config, pool, mailer, ChatBackend::default())
}

fn request(method: Method, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{}"))
        .unwrap()
}

async fn status_of(req: Request<Body>) -> StatusCode {
    app().oneshot(req).await.unwrap().status()
}

#[tokio::test]
async fn protected_routes_require_a_token() {
    for (method, uri) in [
        (Method::GET, "/api/account/me"),
        (Method::GET, "/api/account/dashboard"),
        (Method::GET, "/api/account/history"),
        (Method::DELETE, "/api/account/me"),
        (Method::GET, "/api/notifications/unread-count"),
        (Method::GET, "/api/notifications"),
        (Method::POST, "/api/chatbot"),
        (Method::POST, "/api/forums"),
        (Method::POST, "/api/events/1/register"),
        (Method::POST, "/api/surveys/1/vote"),
        (Method::POST, "/api/threads/1/posts"),
        (Method::POST, "/api/resources/1/favorite"),
        (Method::GET, "/api/favorites"),
        (Method::GET, "/api/aid-requests"),
        (Method::POST, "/api/uploads/resources"),
        (Method::GET, "/api/admin/users"),
        (Method::POST, "/api/admin/badges"),
        (Method::POST, "/api/admin/users/1/badges"),
    ] {
        assert_eq!(
            status_of(request(method.clone(), uri)).await,
            StatusCode::UNAUTHORIZED,
            "{method} {uri}"
        );
    }
}

#[tokio::test]
async fn malformed_tokens_are_rejected() {
    let req = Request::builder()
        .uri("/api/account/me")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(req).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn anonymous_reads_with_a_bad_token_are_not_downgraded() {
    let req = Request::builder()
        .uri("/api/forums")
        .header(header::AUTHORIZATION, "Bearer not-a-jwt")
        .body(Body::empty())
        .unwrap();
    assert_eq!(status_of(req).await, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    assert_eq!(
        status_of(request(Method::GET, "/api/does-not-exist")).await,
        StatusCode::NOT_FOUND
    );
    assert_eq!(
        status_of(request(Method::GET, "/nothing/here")).await,
        StatusCode::NOT_FOUND
    );
}

#[tokio::test]
async fn errors_are_rendered_as_json() {
    let res = app()
        .oneshot(request(Method::GET, "/api/account/me"))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let body = hyper::body::to_bytes(res.into_body()).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], 401);
    assert_eq!(body["message"], "missing or malformed bearer token");
    assert!(body.get("fields").is_none());
}
