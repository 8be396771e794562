//! Tests for the PocketBase client.

use std::time::Duration;

use serde_json::json;
use serial_test::serial;
use wiremock::matchers::{body_json, body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::client::{PocketBaseClient, PocketBaseConfig};
use crate::error::StoreError;
use crate::filter;
use crate::retry::RetryConfig;
use crate::store::RecordStore;
use crate::types::{FileUpload, Fields, ListQuery, Precondition};

// =============================================================================
// Test Helpers
// =============================================================================

const LOGIN_PATH: &str = "/api/collections/_superusers/auth-with-password";

fn test_config(base_url: &str) -> PocketBaseConfig {
    let mut config = PocketBaseConfig::new(base_url, "worker@example.com", "secret");
    config.timeout = Duration::from_secs(5);
    config.connect_timeout = Duration::from_secs(2);
    config.retry = RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    config
}

async fn mount_login(server: &MockServer, token: &str) {
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": token,
            "record": {"id": "su1"}
        })))
        .mount(server)
        .await;
}

fn fields(value: serde_json::Value) -> Fields {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Fields::new(),
    }
}

fn job_json(id: &str, status: &str) -> serde_json::Value {
    json!({
        "id": id,
        "collectionName": "circle_jobs",
        "owner": "u1",
        "input_media": "v.mp4",
        "output_media": "",
        "status": status,
        "created": "2025-01-01 10:00:00.000Z"
    })
}

// =============================================================================
// Error Type Tests
// =============================================================================

#[test]
fn test_error_from_http_status_429() {
    let err = StoreError::from_http_status(429, "rate limited");
    assert!(matches!(err, StoreError::RateLimited(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_error_from_http_status_500() {
    let err = StoreError::from_http_status(500, "internal error");
    assert!(matches!(err, StoreError::ServerError(500, _)));
    assert!(err.is_retryable());
}

#[test]
fn test_error_from_http_status_400() {
    let err = StoreError::from_http_status(400, "bad request");
    assert!(matches!(err, StoreError::RequestFailed(_)));
    assert!(!err.is_retryable());
}

#[test]
fn test_error_from_http_status_404() {
    let err = StoreError::from_http_status(404, "not found");
    assert!(err.is_not_found());
    assert!(!err.is_retryable());
}

#[test]
fn test_error_from_http_status_413_keeps_body() {
    let err = StoreError::from_http_status(413, "request entity too large");
    assert!(matches!(err, StoreError::RequestFailed(_)));
    assert!(err.to_string().contains("request entity too large"));
    assert!(!err.to_string().contains("0 bytes"));
}

#[test]
fn test_error_from_http_status_not_unique() {
    let body = r#"{"code":400,"message":"Failed to create record.","data":{"id":{"code":"validation_not_unique","message":"Value must be unique."}}}"#;
    let err = StoreError::from_http_status(400, body);
    assert!(err.is_already_exists());
    assert!(!err.is_retryable());
}

#[test]
fn test_error_http_status_getter() {
    assert_eq!(StoreError::RateLimited(1000).http_status(), Some(429));
    assert_eq!(
        StoreError::ServerError(502, "bad gateway".into()).http_status(),
        Some(502)
    );
    assert_eq!(StoreError::precondition_failed("x").http_status(), Some(412));
    assert_eq!(StoreError::config("x").http_status(), None);
}

// =============================================================================
// Config Tests
// =============================================================================

#[test]
#[serial]
fn test_config_from_env() {
    std::env::set_var("POCKETBASE_URL", "http://127.0.0.1:8090");
    std::env::set_var("POCKETBASE_LOGIN", "worker@example.com");
    std::env::set_var("POCKETBASE_PASSWORD", "secret");
    std::env::set_var("POCKETBASE_AUTH_COLLECTION", "admins");
    std::env::set_var("POCKETBASE_ATOMIC_INCREMENT", "false");

    let config = PocketBaseConfig::from_env().unwrap();
    assert_eq!(config.base_url, "http://127.0.0.1:8090");
    assert_eq!(config.credentials.auth_collection, "admins");
    assert!(!config.atomic_increment);
    assert_eq!(config.timeout, Duration::from_secs(30));

    std::env::remove_var("POCKETBASE_AUTH_COLLECTION");
    std::env::remove_var("POCKETBASE_ATOMIC_INCREMENT");
    let config = PocketBaseConfig::from_env().unwrap();
    assert_eq!(config.credentials.auth_collection, "_superusers");
    assert!(config.atomic_increment);

    std::env::remove_var("POCKETBASE_URL");
    std::env::remove_var("POCKETBASE_LOGIN");
    std::env::remove_var("POCKETBASE_PASSWORD");
}

#[test]
#[serial]
fn test_config_requires_credentials() {
    std::env::set_var("POCKETBASE_URL", "http://127.0.0.1:8090");
    std::env::remove_var("POCKETBASE_LOGIN");
    std::env::remove_var("POCKETBASE_PASSWORD");

    let err = PocketBaseConfig::from_env().unwrap_err();
    assert!(matches!(err, StoreError::Config(ref msg) if msg.contains("POCKETBASE_LOGIN")));

    std::env::remove_var("POCKETBASE_URL");
}

#[test]
fn test_client_rejects_bad_url() {
    let err = PocketBaseClient::new(test_config("ftp://example.com")).err().unwrap();
    assert!(matches!(err, StoreError::Config(_)));
    assert!(PocketBaseClient::new(test_config("not a url")).is_err());
}

// =============================================================================
// HTTP Tests
// =============================================================================

#[tokio::test]
async fn test_connect_fails_on_bad_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "message": "Failed to authenticate."
        })))
        .mount(&server)
        .await;

    let err = PocketBaseClient::connect(test_config(&server.uri())).await.err().unwrap();
    assert!(matches!(err, StoreError::AuthError(_)));
}

#[tokio::test]
async fn test_list_sends_query_and_token() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/circle_jobs/records"))
        .and(header("Authorization", "tok"))
        .and(query_param("filter", r#"status = "queued""#))
        .and(query_param("sort", "created,id"))
        .and(query_param("perPage", "1"))
        .and(query_param("skipTotal", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "page": 1,
            "perPage": 1,
            "totalItems": -1,
            "totalPages": -1,
            "items": [job_json("abc", "queued")]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PocketBaseClient::connect(test_config(&server.uri())).await.unwrap();
    let query = ListQuery::new()
        .filter(filter::eq("status", "queued"))
        .sort("created,id")
        .per_page(1)
        .skip_total();
    let list = client.list("circle_jobs", &query).await.unwrap();

    assert_eq!(list.items.len(), 1);
    assert_eq!(list.items[0].id(), Some("abc"));
}

#[tokio::test]
async fn test_get_missing_record_is_none() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/circle_jobs/records/nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "message": "The requested resource wasn't found."
        })))
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    assert!(client.get("circle_jobs", "nope").await.unwrap().is_none());
}

#[tokio::test]
async fn test_expired_token_triggers_login() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(LOGIN_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"token": "old"})))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_login(&server, "new").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .and(header("Authorization", "old"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .and(header("Authorization", "new"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1", "tgid": 42})))
        .expect(1)
        .mount(&server)
        .await;

    let client = PocketBaseClient::connect(test_config(&server.uri())).await.unwrap();
    let user = client.get("users", "u1").await.unwrap().unwrap();
    assert_eq!(user.get_i64("tgid"), Some(42));
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "u1"})))
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    assert!(client.get("users", "u1").await.unwrap().is_some());
}

#[tokio::test]
async fn test_rate_limit_honors_retry_after() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.retry = RetryConfig::none();
    let client = PocketBaseClient::new(config).unwrap();

    let err = client.get("users", "u1").await.unwrap_err();
    assert!(matches!(err, StoreError::RateLimited(7000)));
}

#[tokio::test]
async fn test_patch_if_rejects_when_precondition_fails() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "processing")))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "processing")))
        .expect(0)
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    let err = client
        .patch_if(
            "circle_jobs",
            "abc",
            &Precondition::field_equals("status", "queued"),
            fields(json!({"status": "processing"})),
        )
        .await
        .unwrap_err();

    assert!(err.is_precondition_failed());
}

#[tokio::test]
async fn test_patch_if_detects_concurrent_overwrite() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "queued")))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .and(body_json(json!({"status": "processing", "claimed_by": "w1"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "processing")))
        .expect(1)
        .mount(&server)
        .await;

    // Another worker's claim landed after ours
    let mut stolen = job_json("abc", "processing");
    stolen["claimed_by"] = json!("w2");
    Mock::given(method("GET"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(stolen))
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    let err = client
        .patch_if(
            "circle_jobs",
            "abc",
            &Precondition::field_equals("status", "queued"),
            fields(json!({"status": "processing", "claimed_by": "w1"})),
        )
        .await
        .unwrap_err();

    assert!(err.is_precondition_failed());
}

#[tokio::test]
async fn test_increment_uses_number_modifier() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("PATCH"))
        .and(path("/api/collections/users/records/u1"))
        .and(body_json(json!({"circle_count+": 1})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "circle_count": 5
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    assert_eq!(client.increment("users", "u1", "circle_count", 1).await.unwrap(), 5);
}

#[tokio::test]
async fn test_increment_is_not_retried_after_server_error() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    // The gateway may fail after the server applied the modifier
    Mock::given(method("PATCH"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "circle_count": 7
        })))
        .expect(0)
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    let err = client.increment("users", "u1", "circle_count", 1).await.unwrap_err();

    assert!(matches!(err, StoreError::ServerError(502, _)));
}

#[tokio::test]
async fn test_create_with_taken_id_is_already_exists() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("POST"))
        .and(path("/api/collections/job_claims/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc",
            "job": "abc",
            "worker": "worker-a"
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/collections/job_claims/records"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "message": "Failed to create record.",
            "data": {"id": {"code": "validation_not_unique", "message": "Value must be unique."}}
        })))
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    let claim = |worker: &str| fields(json!({"id": "abc", "job": "abc", "worker": worker}));

    let first = client.create("job_claims", claim("worker-a")).await.unwrap();
    let second = client.create("job_claims", claim("worker-b")).await.unwrap_err();

    assert_eq!(first.get_str("worker"), Some("worker-a"));
    assert!(second.is_already_exists(), "{}", second);
}

#[tokio::test]
async fn test_delete_missing_record_is_ok() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("DELETE"))
        .and(path("/api/collections/job_claims/records/abc"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    client.delete("job_claims", "abc").await.unwrap();
}

#[tokio::test]
async fn test_increment_read_modify_write() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "circle_count": 4
        })))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/api/collections/users/records/u1"))
        .and(body_json(json!({"circle_count": 5})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "circle_count": 5
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/collections/users/records/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u1",
            "circle_count": 5
        })))
        .mount(&server)
        .await;

    let mut config = test_config(&server.uri());
    config.atomic_increment = false;
    let client = PocketBaseClient::new(config).unwrap();

    assert_eq!(client.increment("users", "u1", "circle_count", 1).await.unwrap(), 5);
}

#[tokio::test]
async fn test_patch_with_file_sends_multipart() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("PATCH"))
        .and(path("/api/collections/circle_jobs/records/abc"))
        .and(body_string_contains("name=\"output_media\"; filename=\"abc_output.mp4\""))
        .and(body_string_contains("completed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_json("abc", "completed")))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("abc_output.mp4");
    std::fs::write(&output, b"fake mp4").unwrap();

    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();
    let record = client
        .patch_with_file(
            "circle_jobs",
            "abc",
            fields(json!({"status": "completed"})),
            &FileUpload::new("output_media", &output),
        )
        .await
        .unwrap();

    assert_eq!(record.get_str("status"), Some("completed"));
}

#[tokio::test]
async fn test_download_file() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/files/circle_jobs/abc/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("abc_input.mp4");
    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();

    let written = client
        .download_file("circle_jobs", "abc", "v.mp4", &dest, 1024)
        .await
        .unwrap();
    assert_eq!(written, 64);
    assert_eq!(std::fs::read(&dest).unwrap(), vec![7u8; 64]);
}

#[tokio::test]
async fn test_download_file_over_limit_leaves_nothing() {
    let server = MockServer::start().await;
    mount_login(&server, "tok").await;

    Mock::given(method("GET"))
        .and(path("/api/files/circle_jobs/abc/v.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 4096]))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("abc_input.mp4");
    let client = PocketBaseClient::new(test_config(&server.uri())).unwrap();

    let err = client
        .download_file("circle_jobs", "abc", "v.mp4", &dest, 1000)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::PayloadTooLarge { limit: 1000, .. }));
    assert!(!dest.exists());
}
