//! Indexer client against an in-process HTTP stub.

use std::collections::HashMap;

use axum::extract::Query;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;

use inft_agent::storage::{content_address, IndexerClient, RemoteStore};
use inft_agent::{ContentAddress, InftError};

// ═══════════════════════════════════════════════════════════════════════════════
// HELPER FUNCTIONS
// ═══════════════════════════════════════════════════════════════════════════════

fn missing() -> ContentAddress {
    content_address(b"missing")
}

fn broken() -> ContentAddress {
    content_address(b"broken")
}

fn empty() -> ContentAddress {
    content_address(b"empty")
}

fn failing() -> ContentAddress {
    content_address(b"failing")
}

fn present() -> ContentAddress {
    content_address(b"present")
}

async fn download(Query(query): Query<HashMap<String, String>>) -> Response {
    let root = query.get("root").cloned().unwrap_or_default();

    if root == missing().to_string() {
        Json(json!({"code": 101, "message": "file not found"})).into_response()
    } else if root == failing().to_string() {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"code": 500, "message": "node unavailable"})),
        )
            .into_response()
    } else if root == broken().to_string() {
        (StatusCode::BAD_GATEWAY, "upstream down").into_response()
    } else if root == empty().to_string() {
        (StatusCode::OK, [(header::CONTENT_TYPE, "application/octet-stream")], Vec::<u8>::new())
            .into_response()
    } else if root == present().to_string() {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            b"present".to_vec(),
        )
            .into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

async fn upload(Query(query): Query<HashMap<String, String>>, body: axum::body::Bytes) -> Response {
    let root = query.get("root").cloned().unwrap_or_default();
    if body.is_empty() {
        return Json(json!({"code": 400, "message": "empty upload"})).into_response();
    }
    if root != content_address(&body).to_string() {
        return Json(json!({"code": 422, "message": "root mismatch"})).into_response();
    }
    Json(json!({"code": 0, "data": {"txHash": "0xfeed"}})).into_response()
}

async fn spawn_indexer() -> IndexerClient {
    let app = Router::new()
        .route("/file", get(download))
        .route("/file/upload", post(upload));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    IndexerClient::new(format!("http://{addr}/")).unwrap()
}

// ═══════════════════════════════════════════════════════════════════════════════
// DOWNLOAD TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_download_returns_raw_bytes() {
    let client = spawn_indexer().await;
    assert_eq!(client.download(&present()).await.unwrap(), b"present");
}

#[tokio::test]
async fn test_not_found_envelope_maps_to_not_found() {
    let client = spawn_indexer().await;
    let err = client.download(&missing()).await.unwrap_err();
    assert!(matches!(err, InftError::NotFound(_)), "got {err:?}");
}

#[tokio::test]
async fn test_other_envelope_codes_are_transport_errors() {
    let client = spawn_indexer().await;
    let err = client.download(&failing()).await.unwrap_err();
    let InftError::Transport(message) = &err else {
        panic!("expected transport error, got {err:?}");
    };
    assert!(message.contains("download failed: node unavailable"));
}

#[tokio::test]
async fn test_non_json_error_is_transport_error() {
    let client = spawn_indexer().await;
    let err = client.download(&broken()).await.unwrap_err();
    let InftError::Transport(message) = &err else {
        panic!("expected transport error, got {err:?}");
    };
    assert!(message.contains("502"));
}

#[tokio::test]
async fn test_empty_body_is_an_error() {
    let client = spawn_indexer().await;
    let err = client.download(&empty()).await.unwrap_err();
    let InftError::Transport(message) = &err else {
        panic!("expected transport error, got {err:?}");
    };
    assert_eq!(message, "downloaded file is empty");
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPLOAD TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_upload_returns_tx_hash() {
    let client = spawn_indexer().await;
    let data = b"encrypted blob";
    let tx = client.upload(data, &content_address(data)).await.unwrap();
    assert_eq!(tx, "0xfeed");
}

#[tokio::test]
async fn test_upload_error_envelope() {
    let client = spawn_indexer().await;
    let err = client
        .upload(b"encrypted blob", &content_address(b"other"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("root mismatch"));
}

#[tokio::test]
async fn test_base_url_trailing_slash_trimmed() {
    let client = IndexerClient::new("http://indexer.local/").unwrap();
    assert_eq!(client.base_url(), "http://indexer.local");
}
