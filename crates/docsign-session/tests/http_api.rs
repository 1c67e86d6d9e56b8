//! HttpSigningApi against a local axum backend

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use docsign_session::{
    ApiError, ClientConfig, Connectivity, ConnectivityMonitor, HttpSigningApi,
    PollingConnectivity, SignBatch, SignatureSubmission, SigningApi,
};
use serde_json::{json, Value};
use shared_types::{PackageDocId, PackageId, PackageStatus};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Recorded {
    sign_bodies: Vec<Value>,
    authorization: Vec<String>,
    upload_content_types: Vec<String>,
}

type AppState = Arc<Mutex<Recorded>>;

fn record_auth(state: &AppState, headers: &HeaderMap) {
    if let Some(value) = headers.get("authorization").and_then(|v| v.to_str().ok()) {
        state.lock().unwrap().authorization.push(value.to_string());
    }
}

async fn get_package(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> impl IntoResponse {
    record_auth(&state, &headers);
    if id == "missing" {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "Package not found" })),
        );
    }
    // Deliberately out of order
    (
        StatusCode::OK,
        Json(json!({
            "id": id,
            "title": "Lease bundle",
            "status": "PENDING",
            "documents": [
                { "id": "pd-2", "documentId": "doc-2", "versionId": "v1", "title": "Addendum", "order": 1 },
                { "id": "pd-1", "documentId": "doc-1", "versionId": "v3", "title": "Lease", "order": 0 }
            ]
        })),
    )
}

async fn get_content(Path((document_id, version_id)): Path<(String, String)>) -> Vec<u8> {
    format!("%PDF-1.7 {}@{}", document_id, version_id).into_bytes()
}

async fn suggestions(Path(document_id): Path<String>) -> impl IntoResponse {
    if document_id == "broken" {
        return (StatusCode::OK, "not json".to_string()).into_response();
    }
    Json(json!({
        "suggestions": [
            { "pageNumber": 2, "positionX": 0.6, "positionY": 0.8, "width": 0.3, "height": 0.08 }
        ]
    }))
    .into_response()
}

async fn upload(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    state.lock().unwrap().upload_content_types.push(content_type);
    Json(json!({ "url": format!("https://cdn.example.com/sig-{}.png", body.len()) }))
}

async fn sign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    state.lock().unwrap().sign_bodies.push(body);
    match id.as_str() {
        "done" => (
            StatusCode::CONFLICT,
            Json(json!({ "error": "Package already completed" })),
        ),
        "signed" => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "message": "This document is already signed" })),
        ),
        "invalid" => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({ "error": "positionX out of range" })),
        ),
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            (StatusCode::OK, Json(json!({ "success": true })))
        }
        _ => (StatusCode::OK, Json(json!({ "success": true }))),
    }
}

async fn spawn_backend() -> (String, AppState) {
    let state = AppState::default();
    let api = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/packages/:id", get(get_package))
        .route("/packages/:id/sign", post(sign))
        .route(
            "/documents/:document_id/versions/:version_id/content",
            get(get_content),
        )
        .route(
            "/documents/:document_id/signature-suggestions",
            post(suggestions),
        )
        .route("/signature-images", post(upload));
    let app = Router::new().nest("/api", api).with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}/api/", addr), state)
}

fn client(base: &str) -> HttpSigningApi {
    let config = ClientConfig {
        api_base_url: base.to_string(),
        api_token: Some("secret-token".to_string()),
        request_timeout_ms: 2_000,
        ..ClientConfig::default()
    };
    HttpSigningApi::new(&config).unwrap()
}

fn batch() -> SignBatch {
    SignBatch {
        signatures: vec![SignatureSubmission {
            package_doc_id: PackageDocId::from("pd-1"),
            signature_image_url: "https://cdn.example.com/sig.png".to_string(),
            page_number: 1,
            position_x: 0.6,
            position_y: 0.85,
            width: 0.3,
            height: 0.08,
            display_qr_code: true,
        }],
    }
}

#[tokio::test]
async fn test_fetch_package_orders_documents_and_sends_token() {
    let (base, state) = spawn_backend().await;
    let api = client(&base);

    let package = api.fetch_package(&PackageId::from("pkg-7")).await.unwrap();

    assert_eq!(package.id, PackageId::from("pkg-7"));
    assert_eq!(package.status, PackageStatus::Pending);
    let ids: Vec<&str> = package.documents.iter().map(|d| d.id.0.as_str()).collect();
    assert_eq!(ids, vec!["pd-1", "pd-2"]);
    assert_eq!(
        state.lock().unwrap().authorization,
        vec!["Bearer secret-token".to_string()]
    );
}

#[tokio::test]
async fn test_missing_package_is_not_found() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);

    let err = api
        .fetch_package(&PackageId::from("missing"))
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::NotFound("Package not found".to_string()));
}

#[tokio::test]
async fn test_fetch_document_returns_binary() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);

    let bytes = api.fetch_document("doc-1", "v3").await.unwrap();

    assert_eq!(bytes, b"%PDF-1.7 doc-1@v3".to_vec());
}

#[tokio::test]
async fn test_suggestions_decode_camel_case() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);

    let suggestions = api.suggest_placements("doc-1").await.unwrap();

    assert_eq!(suggestions.len(), 1);
    assert_eq!(suggestions[0].page_number, 2);
    assert_eq!(suggestions[0].position_x, 0.6);
}

#[tokio::test]
async fn test_malformed_suggestions_are_decode_errors() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);

    let err = api.suggest_placements("broken").await.unwrap_err();

    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn test_upload_signature_image_as_png() {
    let (base, state) = spawn_backend().await;
    let api = client(&base);

    let image = api.upload_signature_image(vec![0u8; 42]).await.unwrap();

    assert_eq!(image.url(), "https://cdn.example.com/sig-42.png");
    assert_eq!(
        state.lock().unwrap().upload_content_types,
        vec!["image/png".to_string()]
    );
}

#[tokio::test]
async fn test_submit_sends_camel_case_batch() {
    let (base, state) = spawn_backend().await;
    let api = client(&base);

    api.submit_signatures(&PackageId::from("pkg-7"), &batch(), Duration::from_secs(5))
        .await
        .unwrap();

    let bodies = state.lock().unwrap().sign_bodies.clone();
    assert_eq!(
        bodies,
        vec![json!({
            "signatures": [{
                "packageDocId": "pd-1",
                "signatureImageUrl": "https://cdn.example.com/sig.png",
                "pageNumber": 1,
                "positionX": 0.6,
                "positionY": 0.85,
                "width": 0.3,
                "height": 0.08,
                "displayQrCode": true
            }]
        })]
    );
}

#[tokio::test]
async fn test_submit_error_classification() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);
    let timeout = Duration::from_secs(5);

    let done = api
        .submit_signatures(&PackageId::from("done"), &batch(), timeout)
        .await
        .unwrap_err();
    assert!(done.is_conflict());

    let signed = api
        .submit_signatures(&PackageId::from("signed"), &batch(), timeout)
        .await
        .unwrap_err();
    assert!(signed.is_conflict());

    let invalid = api
        .submit_signatures(&PackageId::from("invalid"), &batch(), timeout)
        .await
        .unwrap_err();
    assert_eq!(
        invalid,
        ApiError::Validation("positionX out of range".to_string())
    );
}

#[tokio::test]
async fn test_submit_honours_its_own_timeout() {
    let (base, _state) = spawn_backend().await;
    let api = client(&base);

    let err = api
        .submit_signatures(
            &PackageId::from("slow"),
            &batch(),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();

    assert_eq!(err, ApiError::Timeout);
}

#[tokio::test]
async fn test_unreachable_backend_is_offline() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = client(&format!("http://{}/api", addr));

    let err = api.fetch_package(&PackageId::from("pkg-7")).await.unwrap_err();

    assert!(err.is_connectivity());
    assert!(matches!(err, ApiError::Offline(_)));
}

#[tokio::test]
async fn test_polling_connectivity_tracks_health() {
    let (base, _state) = spawn_backend().await;
    let monitor = PollingConnectivity::start(client(&base), Duration::from_millis(50));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(monitor.current(), Connectivity::Online);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let dead = PollingConnectivity::start(
        client(&format!("http://{}/api", addr)),
        Duration::from_millis(50),
    );

    let mut rx = dead.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| *state == Connectivity::Offline),
    )
    .await
    .unwrap()
    .unwrap();
}

#[tokio::test]
async fn test_backend_without_health_route_stays_online() {
    let app = Router::new().route("/api/packages/:id", get(|| async { "{}" }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let api = client(&format!("http://{}/api/", addr));
    let err = api.ping().await.unwrap_err();
    assert!(!err.is_connectivity());

    let monitor = PollingConnectivity::start(api, Duration::from_millis(50));
    let mut transitions = monitor.transitions();
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(monitor.current(), Connectivity::Online);
    assert!(transitions.try_recv().is_err(), "went offline on a 404");
}

#[tokio::test]
async fn test_zero_poll_interval_does_not_panic() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let dead = PollingConnectivity::start(
        client(&format!("http://{}/api", addr)),
        Duration::ZERO,
    );

    let mut rx = dead.subscribe();
    tokio::time::timeout(
        Duration::from_secs(2),
        rx.wait_for(|state| *state == Connectivity::Offline),
    )
    .await
    .unwrap()
    .unwrap();
}
