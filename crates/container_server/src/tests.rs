use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        Request,
        StatusCode,
    },
};
use container_broker::BrokerRegistry;
use container_path::MountGuard;
use tempfile::TempDir;
use tower::ServiceExt;

use crate::{
    config::Config,
    router::router,
    state::AppStateInner,
};

fn test_state(devices: &TempDir) -> crate::state::AppState {
    let config = Config {
        devices: devices.path().to_path_buf(),
        mount_check: false,
        node_timeout: 3.0,
        conn_timeout: 0.5,
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: "error".to_string(),
        listing_limit: 10_000,
    };
    let mount_guard = MountGuard::new(config.devices.clone(), config.mount_check);
    let account_http = account_client::build_client(config.conn_timeout()).unwrap();
    Arc::new(AppStateInner {
        config,
        mount_guard,
        brokers: BrokerRegistry::new(),
        account_http,
    })
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

fn put_container(uri: &str, ts: f64) -> Request<Body> {
    Request::builder()
        .method("PUT")
        .uri(uri)
        .header("x-timestamp", ts.to_string())
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn container_lifecycle_put_get_delete() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let (status, _) = send(&app, put_container("/sda1/0/AUTH_acct/pics", 100.0)).await;
    assert_eq!(status, StatusCode::CREATED);

    let put_obj = Request::builder()
        .method("PUT")
        .uri("/sda1/0/AUTH_acct/pics/cat.jpg")
        .header("x-timestamp", "101.0")
        .header("x-size", "12")
        .header("x-content-type", "image/jpeg")
        .header("x-etag", "abc123")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, put_obj).await;
    assert_eq!(status, StatusCode::CREATED);

    let get = Request::builder()
        .method("GET")
        .uri("/sda1/0/AUTH_acct/pics")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, get).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cat.jpg"));

    let head = Request::builder()
        .method("HEAD")
        .uri("/sda1/0/AUTH_acct/pics")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(head).await.unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        response.headers().get("x-container-object-count").unwrap(),
        "1"
    );

    let delete_obj = Request::builder()
        .method("DELETE")
        .uri("/sda1/0/AUTH_acct/pics/cat.jpg")
        .header("x-timestamp", "102.0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete_obj).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let delete_container = Request::builder()
        .method("DELETE")
        .uri("/sda1/0/AUTH_acct/pics")
        .header("x-timestamp", "103.0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete_container).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let head_after = Request::builder()
        .method("HEAD")
        .uri("/sda1/0/AUTH_acct/pics")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, head_after).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_object_against_missing_container_is_404() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let put_obj = Request::builder()
        .method("PUT")
        .uri("/sda1/0/AUTH_acct/missing/obj")
        .header("x-timestamp", "101.0")
        .header("x-size", "1")
        .header("x-content-type", "text/plain")
        .header("x-etag", "a")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, put_obj).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn put_without_timestamp_is_400() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let req = Request::builder()
        .method("PUT")
        .uri("/sda1/0/AUTH_acct/pics")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn non_empty_container_delete_is_conflict() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    send(&app, put_container("/sda1/0/AUTH_acct/pics", 100.0)).await;
    let put_obj = Request::builder()
        .method("PUT")
        .uri("/sda1/0/AUTH_acct/pics/cat.jpg")
        .header("x-timestamp", "101.0")
        .header("x-size", "1")
        .header("x-content-type", "text/plain")
        .header("x-etag", "a")
        .body(Body::empty())
        .unwrap();
    send(&app, put_obj).await;

    let delete_container = Request::builder()
        .method("DELETE")
        .uri("/sda1/0/AUTH_acct/pics")
        .header("x-timestamp", "102.0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete_container).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn empty_container_listing_is_204() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    send(&app, put_container("/sda1/0/AUTH_acct/empty", 100.0)).await;
    let get = Request::builder()
        .method("GET")
        .uri("/sda1/0/AUTH_acct/empty")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, get).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn json_format_listing_round_trips_through_format_query() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    send(&app, put_container("/sda1/0/AUTH_acct/pics", 100.0)).await;
    let put_obj = Request::builder()
        .method("PUT")
        .uri("/sda1/0/AUTH_acct/pics/cat.jpg")
        .header("x-timestamp", "101.0")
        .header("x-size", "12")
        .header("x-content-type", "image/jpeg")
        .header("x-etag", "abc123")
        .body(Body::empty())
        .unwrap();
    send(&app, put_obj).await;

    let get = Request::builder()
        .method("GET")
        .uri("/sda1/0/AUTH_acct/pics?format=json")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(get).await.unwrap();
    assert_eq!(
        response.headers().get(axum::http::header::CONTENT_TYPE).unwrap(),
        "application/json; charset=utf-8"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(parsed[0]["name"], "cat.jpg");
}

#[tokio::test]
async fn unmounted_drive_is_507() {
    let devices = TempDir::new().unwrap();
    let config = Config {
        devices: devices.path().to_path_buf(),
        mount_check: true,
        node_timeout: 3.0,
        conn_timeout: 0.5,
        bind_address: "127.0.0.1:0".parse().unwrap(),
        log_level: "error".to_string(),
        listing_limit: 10_000,
    };
    let mount_guard = MountGuard::new(config.devices.clone(), config.mount_check);
    let account_http = account_client::build_client(config.conn_timeout()).unwrap();
    let state = Arc::new(AppStateInner {
        config,
        mount_guard,
        brokers: BrokerRegistry::new(),
        account_http,
    });
    let app = router(state);

    let (status, _) = send(&app, put_container("/sda1/0/AUTH_acct/pics", 100.0)).await;
    assert_eq!(status, StatusCode::from_u16(507).unwrap());
}

#[tokio::test]
async fn healthcheck_and_metrics_are_reachable() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let health = Request::builder().uri("/healthcheck").body(Body::empty()).unwrap();
    let (status, body) = send(&app, health).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "OK");

    let metrics = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let response = app.oneshot(metrics).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn delete_object_against_missing_container_is_404() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let delete_obj = Request::builder()
        .method("DELETE")
        .uri("/sda1/0/AUTH_acct/missing/obj")
        .header("x-timestamp", "101.0")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, delete_obj).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn listing_over_the_configured_limit_is_412() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    send(&app, put_container("/sda1/0/AUTH_acct/pics", 100.0)).await;
    let get = Request::builder()
        .method("GET")
        .uri("/sda1/0/AUTH_acct/pics?limit=20000")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, get).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(body.contains("Maximum limit is 10000"));
}

#[tokio::test]
async fn percent_encoded_control_character_in_path_is_412() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let req = Request::builder()
        .method("GET")
        .uri("/sda1/0/AUTH_acct/pics%00")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn replication_dispatches_merge_items() {
    let devices = TempDir::new().unwrap();
    let app = router(test_state(&devices));

    let hash = container_path::hash_container("AUTH_acct", "pics");
    let body = serde_json::json!({
        "method": "merge_items",
        "args": [[{
            "name": "obj",
            "created_at": 100.0,
            "size": 3,
            "content_type": "text/plain",
            "etag": "a",
            "deleted": false,
        }]],
    });
    let req = Request::builder()
        .method("POST")
        .uri(format!("/sda1/0/{hash}"))
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let (status, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
}
