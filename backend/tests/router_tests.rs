// Requests that are answered before the database is touched: CORS, host
// validation, authentication failures and payload validation.
use axum::{
    body::Body,
    http::{header, HeaderMap, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt; // for .collect()
use serde_json::{json, Value};
use tower::ServiceExt; // for .oneshot()

use notes_backend::auth::{encode_token, TokenType};

mod helpers;
use helpers::{test_app, test_settings};

async fn send(app: Router, request: Request<Body>) -> (StatusCode, HeaderMap, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "localhost:8000")
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::HOST, "localhost:8000")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn preflight(origin: &str) -> Request<Body> {
    Request::builder()
        .method("OPTIONS")
        .uri("/api/notes/")
        .header(header::HOST, "localhost:8000")
        .header(header::ORIGIN, origin)
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .header(
            header::ACCESS_CONTROL_REQUEST_HEADERS,
            "authorization,content-type",
        )
        .body(Body::empty())
        .unwrap()
}

// --- CORS ---

#[tokio::test]
async fn debug_mode_allows_any_origin_with_credentials() {
    let app = test_app(&[("DEBUG", "true")]);

    let (status, headers, _) = send(app, preflight("https://anywhere.example")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "https://anywhere.example"
    );
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
    let allowed_methods = headers[header::ACCESS_CONTROL_ALLOW_METHODS]
        .to_str()
        .unwrap();
    for method in ["DELETE", "GET", "OPTIONS", "PATCH", "POST", "PUT"] {
        assert!(allowed_methods.contains(method), "missing {method}");
    }
    let allowed_headers = headers[header::ACCESS_CONTROL_ALLOW_HEADERS]
        .to_str()
        .unwrap();
    assert!(allowed_headers.contains("authorization"));
    assert!(allowed_headers.contains("x-csrftoken"));
}

#[tokio::test]
async fn production_mode_only_allows_configured_origins() {
    let (status, headers, _) = send(test_app(&[]), preflight("http://localhost:5173")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://localhost:5173"
    );

    let (_, headers, _) = send(test_app(&[]), preflight("https://anywhere.example")).await;
    assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
}

#[tokio::test]
async fn simple_requests_carry_cors_headers_too() {
    let app = test_app(&[("DEBUG", "1")]);
    let mut request = get("/api/notes/");
    request
        .headers_mut()
        .insert(header::ORIGIN, "http://127.0.0.1:5173".parse().unwrap());

    let (status, headers, _) = send(app, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        "http://127.0.0.1:5173"
    );
}

// --- Host validation ---

#[tokio::test]
async fn unknown_hosts_are_rejected() {
    let app = test_app(&[("ALLOWED_HOSTS", "notes.example.com")]);
    let request = Request::builder()
        .uri("/api/notes/")
        .header(header::HOST, "evil.example")
        .body(Body::empty())
        .unwrap();

    let (status, _, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({ "detail": "Invalid HTTP_HOST header: 'evil.example'." })
    );
}

#[tokio::test]
async fn listed_hosts_reach_the_api() {
    let app = test_app(&[("ALLOWED_HOSTS", "notes.example.com, .internal")]);
    let request = Request::builder()
        .uri("/api/notes/")
        .header(header::HOST, "api.internal:8000")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(app, request).await;

    // Past host validation, stopped by authentication.
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn requests_without_a_host_are_rejected() {
    let request = Request::builder()
        .uri("/api/notes/")
        .body(Body::empty())
        .unwrap();

    let (status, _, _) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn debug_mode_with_empty_allowlist_accepts_localhost_only() {
    let (status, _, _) = send(
        test_app(&[("DEBUG", "true"), ("ALLOWED_HOSTS", " , ")]),
        get("/api/notes/"),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/api/notes/")
        .header(header::HOST, "notes.example.com")
        .body(Body::empty())
        .unwrap();
    let (status, _, _) = send(
        test_app(&[("DEBUG", "true"), ("ALLOWED_HOSTS", " , ")]),
        request,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// --- Authentication ---

#[tokio::test]
async fn note_routes_require_credentials() {
    let delete = Request::builder()
        .method("DELETE")
        .uri("/api/notes/delete/1/")
        .header(header::HOST, "localhost")
        .body(Body::empty())
        .unwrap();

    for request in [
        get("/api/notes/"),
        post_json("/api/notes/", json!({ "title": "t", "content": "c" })),
        delete,
    ] {
        let (status, headers, body) = send(test_app(&[]), request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(headers[header::WWW_AUTHENTICATE], "Bearer realm=\"api\"");
        assert_eq!(
            body,
            json!({ "detail": "Authentication credentials were not provided." })
        );
    }
}

#[tokio::test]
async fn non_bearer_schemes_count_as_missing_credentials() {
    let mut request = get("/api/notes/");
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Basic dXNlcjpwYXNz".parse().unwrap());

    let (status, _, body) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body["detail"],
        "Authentication credentials were not provided."
    );
}

#[tokio::test]
async fn garbage_tokens_are_not_valid() {
    let mut request = get("/api/notes/");
    request
        .headers_mut()
        .insert(header::AUTHORIZATION, "Bearer not-a-jwt".parse().unwrap());

    let (status, _, body) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_not_valid");
}

#[tokio::test]
async fn refresh_tokens_cannot_be_used_as_access_tokens() {
    let settings = test_settings(&[]);
    let refresh = encode_token(1, TokenType::Refresh, &settings.jwt).unwrap();

    let mut request = get("/api/notes/");
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {refresh}").parse().unwrap(),
    );

    let (status, _, body) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_not_valid");
}

#[tokio::test]
async fn tokens_signed_with_another_key_are_not_valid() {
    let other = test_settings(&[("SECRET_KEY", "a-different-secret")]);
    let access = encode_token(1, TokenType::Access, &other.jwt).unwrap();

    let mut request = get("/api/notes/");
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {access}").parse().unwrap(),
    );

    let (status, _, body) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["code"], "token_not_valid");
}

#[tokio::test]
async fn refresh_endpoint_rejects_bad_tokens() {
    let settings = test_settings(&[]);
    let access = encode_token(1, TokenType::Access, &settings.jwt).unwrap();

    for token in ["garbage", access.as_str()] {
        let (status, _, body) = send(
            test_app(&[]),
            post_json("/api/token/refresh/", json!({ "refresh": token })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "token_not_valid");
    }

    let (status, _, body) = send(
        test_app(&[]),
        post_json("/api/token/refresh/", json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "refresh": ["This field may not be blank."] }));
}

// --- Payload validation ---

#[tokio::test]
async fn registration_reports_field_errors() {
    let (status, _, body) = send(
        test_app(&[]),
        post_json("/api/user/register/", json!({ "password": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "username": ["This field may not be blank."] }));

    let (status, _, body) = send(
        test_app(&[]),
        post_json(
            "/api/user/register/",
            json!({ "username": "bad name!", "password": "x" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["username"][0]
        .as_str()
        .unwrap()
        .starts_with("Enter a valid username."));
}

#[tokio::test]
async fn registration_enforces_password_policy() {
    let (status, _, body) = send(
        test_app(&[]),
        post_json(
            "/api/user/register/",
            json!({ "username": "alice", "password": "48213" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "password": [
                "This password is too short. It must contain at least 8 characters.",
                "This password is entirely numeric.",
            ]
        })
    );
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let request = Request::builder()
        .method("POST")
        .uri("/api/token/")
        .header(header::HOST, "localhost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();

    let (status, _, body) = send(test_app(&[]), request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].is_string());
}

// --- Wiring ---

#[tokio::test]
async fn responses_carry_security_headers_and_a_request_id() {
    let (_, headers, _) = send(test_app(&[]), get("/api/notes/")).await;

    assert_eq!(headers[header::X_FRAME_OPTIONS], "DENY");
    assert_eq!(headers[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
    assert_eq!(headers[header::REFERRER_POLICY], "same-origin");
    assert_eq!(headers["cross-origin-opener-policy"], "same-origin");
    assert!(headers.contains_key("x-request-id"));
}

#[tokio::test]
async fn request_ids_are_kept_or_generated() {
    let request = Request::builder()
        .uri("/api/notes/")
        .header(header::HOST, "localhost")
        .header("x-request-id", "client-chosen-id")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(test_app(&[]), request).await;
    assert_eq!(headers["x-request-id"], "client-chosen-id");

    // Rejected before routing, still tagged.
    let request = Request::builder()
        .uri("/api/notes/")
        .header(header::HOST, "evil.example")
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(test_app(&[]), request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let id = headers["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36, "expected a uuid, got {id}");
}

#[tokio::test]
async fn openapi_schema_lists_every_endpoint() {
    let (status, _, body) = send(test_app(&[]), get("/api/schema/")).await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/api/user/register/",
        "/api/token/",
        "/api/token/refresh/",
        "/api/notes/",
        "/api/notes/delete/{id}/",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
    assert!(body["components"]["securitySchemes"]["bearer_auth"].is_object());
}

#[tokio::test]
async fn unknown_routes_are_not_found() {
    let (status, _, _) = send(test_app(&[]), get("/api/nope/")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
