//! End-to-end tests for listening sessions and daily quotas

mod common;

use common::{sine_wav, TestClient, TestServer};
use mist_server::quota::{QuotaLimit, QuotaPolicy};
use mist_server::server::KeyCachePolicy;
use reqwest::StatusCode;
use serde_json::Value;

fn assert_close(actual: &Value, expected: f64) {
    let actual = actual.as_f64().expect("number");
    assert!(
        (actual - expected).abs() < 1e-6,
        "{} != {}",
        actual,
        expected
    );
}

async fn quota_of(response: reqwest::Response) -> Value {
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    body["quota"].clone()
}

#[tokio::test]
async fn test_heartbeats_account_forward_progress_only() {
    let server = TestServer::spawn().await;
    let admin = TestClient::admin(&server);
    let listener = TestClient::listener(&server);
    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;

    let session = listener.start_session(track_id).await;

    let quota = quota_of(listener.heartbeat(&session, 0.0).await).await;
    assert_close(&quota["used"], 0.0);

    let quota = quota_of(listener.heartbeat(&session, 30.0).await).await;
    assert_close(&quota["used"], 0.5);

    let quota = quota_of(listener.heartbeat(&session, 90.0).await).await;
    assert_close(&quota["used"], 1.5);

    // Seeking back never gives minutes back, nor counts them twice
    let quota = quota_of(listener.heartbeat(&session, 60.0).await).await;
    assert_close(&quota["used"], 1.5);
    let quota = quota_of(listener.heartbeat(&session, 90.0).await).await;
    assert_close(&quota["used"], 1.5);

    assert_eq!(quota["tier"], "free");
    assert_close(&quota["limit"], 30.0);
    assert_close(&quota["remaining"], 28.5);
    assert_eq!(quota["hasQuota"], true);
    assert_eq!(quota["tracksStarted"], 1);
}

#[tokio::test]
async fn test_completion_is_counted_once() {
    let server = TestServer::spawn().await;
    let admin = TestClient::admin(&server);
    let listener = TestClient::listener(&server);
    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;

    let session = listener.start_session(track_id).await;
    listener.heartbeat(&session, 60.0).await;

    let quota = quota_of(listener.complete_listening(&session, 120.0).await).await;
    assert_close(&quota["used"], 2.0);
    assert_eq!(quota["tracksCompleted"], 1);

    let quota = quota_of(listener.complete_listening(&session, 120.0).await).await;
    assert_close(&quota["used"], 2.0);
    assert_eq!(quota["tracksCompleted"], 1);

    let quota = quota_of(listener.get_quota().await).await;
    assert_close(&quota["used"], 2.0);
}

#[tokio::test]
async fn test_exhausted_quota_rejects_new_sessions() {
    let policy = QuotaPolicy {
        anonymous: QuotaLimit::Limited(1.0),
        ..QuotaPolicy::default()
    };
    let server = TestServer::spawn_with(policy, KeyCachePolicy::Public).await;
    let admin = TestClient::admin(&server);
    let anonymous = TestClient::new(server.base_url.clone());
    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;

    let session = anonymous.start_session(track_id).await;
    let quota = quota_of(anonymous.heartbeat(&session, 75.0).await).await;
    assert_eq!(quota["tier"], "anonymous");
    assert_eq!(quota["hasQuota"], false);
    assert_close(&quota["remaining"], 0.0);

    let response = anonymous.start_listening(track_id).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["kind"], "quota_exceeded");
    assert_eq!(body["quota"]["hasQuota"], false);
    assert_close(&body["quota"]["remaining"], 0.0);

    // Quota is tracked per address
    let elsewhere = TestClient::new(server.base_url.clone()).from_ip("198.51.100.77");
    let response = elsewhere.start_listening(track_id).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_premium_quota_is_unlimited() {
    let server = TestServer::spawn().await;
    let admin = TestClient::admin(&server);
    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;

    let session = admin.start_session(track_id).await;
    let quota = quota_of(admin.heartbeat(&session, 100_000.0).await).await;

    assert_eq!(quota["tier"], "premium");
    assert_eq!(quota["unlimited"], true);
    assert_eq!(quota["hasQuota"], true);
    assert!(quota["limit"].is_null());
    assert!(quota["remaining"].is_null());
}

#[tokio::test]
async fn test_sessions_belong_to_their_caller() {
    let server = TestServer::spawn().await;
    let admin = TestClient::admin(&server);
    let listener = TestClient::listener(&server);
    let other = TestClient::with_token(server.base_url.clone(), &server.other_listener_token);
    let anonymous = TestClient::new(server.base_url.clone());
    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;

    let session = listener.start_session(track_id).await;

    let response = other.heartbeat(&session, 30.0).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let response = anonymous.complete_listening(&session, 30.0).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let quota = quota_of(listener.get_quota().await).await;
    assert_close(&quota["used"], 0.0);
}

#[tokio::test]
async fn test_listening_input_validation() {
    let server = TestServer::spawn().await;
    let admin = TestClient::admin(&server);
    let listener = TestClient::listener(&server);

    let response = listener.start_listening(999).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = listener.heartbeat("no-such-session", 10.0).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let track_id = admin.ingest("Tone", sine_wav(440.0, 5)).await;
    let session = listener.start_session(track_id).await;
    let response = listener.heartbeat(&session, -5.0).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_anonymous_quota_is_reported() {
    let server = TestServer::spawn().await;
    let anonymous = TestClient::new(server.base_url.clone());

    let quota = quota_of(anonymous.get_quota().await).await;
    assert_eq!(quota["tier"], "anonymous");
    assert_close(&quota["limit"], 10.0);
    assert_close(&quota["used"], 0.0);
    assert_eq!(quota["hasQuota"], true);
}
