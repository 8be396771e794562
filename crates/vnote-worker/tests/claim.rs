//! Claiming against an HTTP record store.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use vnote_models::{Job, JobStatus};
use vnote_store::{PocketBaseClient, PocketBaseConfig, RetryConfig};
use vnote_worker::{ClaimOutcome, StatusManager};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CLAIMS_PATH: &str = "/api/collections/job_claims/records";
const JOB_PATH: &str = "/api/collections/circle_jobs/records/abc";

async fn store_for(server: &MockServer) -> Arc<PocketBaseClient> {
    Mock::given(method("POST"))
        .and(path("/api/collections/_superusers/auth-with-password"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok",
            "record": {"id": "su1"}
        })))
        .mount(server)
        .await;

    let mut config = PocketBaseConfig::new(server.uri(), "worker@example.com", "secret");
    config.timeout = Duration::from_secs(5);
    config.retry = RetryConfig {
        max_retries: 2,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    Arc::new(PocketBaseClient::new(config).unwrap())
}

fn manager(store: &Arc<PocketBaseClient>, worker: &str) -> StatusManager {
    StatusManager::new(store.clone(), "circle_jobs", "job_claims", worker)
}

#[tokio::test]
async fn test_interleaved_claims_have_one_winner() {
    let server = MockServer::start().await;
    let store = store_for(&server).await;

    // The first insert is still in flight when the second one is rejected
    Mock::given(method("POST"))
        .and(path(CLAIMS_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"id": "abc", "job": "abc", "worker": "worker-a"}))
                .set_delay(Duration::from_millis(300)),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CLAIMS_PATH))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": 400,
            "message": "Failed to create record.",
            "data": {"id": {"code": "validation_not_unique", "message": "Value must be unique."}}
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(JOB_PATH))
        .and(body_partial_json(json!({"status": "processing"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "abc",
            "status": "processing"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let worker_a = manager(&store, "worker-a");
    let worker_b = manager(&store, "worker-b");
    let mut job_a = Job::queued("abc", "u1", "v.mp4");
    let mut job_b = job_a.clone();

    let (a, b) = tokio::join!(worker_a.claim(&mut job_a), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        worker_b.claim(&mut job_b).await
    });

    let outcomes = [a.unwrap(), b.unwrap()];
    let winners = outcomes.iter().filter(|o| **o == ClaimOutcome::Claimed).count();
    assert_eq!(winners, 1, "{:?}", outcomes);

    let (winner, loser) = if outcomes[0] == ClaimOutcome::Claimed {
        (&job_a, &job_b)
    } else {
        (&job_b, &job_a)
    };
    assert_eq!(winner.status, JobStatus::Processing);
    assert_eq!(loser.status, JobStatus::Queued);
    assert_eq!(loser.claimed_by, None);
}

#[tokio::test]
async fn test_missing_claims_collection_is_a_failure() {
    let server = MockServer::start().await;
    let store = store_for(&server).await;

    Mock::given(method("POST"))
        .and(path(CLAIMS_PATH))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": 404,
            "message": "Missing collection context."
        })))
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path(JOB_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut job = Job::queued("abc", "u1", "v.mp4");
    let err = manager(&store, "worker-a").claim(&mut job).await.unwrap_err();

    assert!(err.0.is_not_found());
    assert_eq!(job.status, JobStatus::Queued);
}
