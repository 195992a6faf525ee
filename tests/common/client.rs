//! HTTP client for end-to-end tests
//!
//! Wraps reqwest and provides methods for every server endpoint. When API
//! routes or request formats change, update only this file.

use super::constants::*;
use super::server::TestServer;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};

/// HTTP test client carrying an optional bearer token.
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    pub base_url: String,
    token: Option<String>,
    ip: String,
}

impl TestClient {
    /// Anonymous client.
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self {
            client,
            base_url,
            token: None,
            ip: CLIENT_IP.to_string(),
        }
    }

    pub fn with_token(base_url: String, token: &str) -> Self {
        Self {
            token: Some(token.to_string()),
            ..Self::new(base_url)
        }
    }

    pub fn admin(server: &TestServer) -> Self {
        Self::with_token(server.base_url.clone(), &server.admin_token)
    }

    pub fn listener(server: &TestServer) -> Self {
        Self::with_token(server.base_url.clone(), &server.listener_token)
    }

    /// Same client, seen as coming from `ip`.
    pub fn from_ip(mut self, ip: &str) -> Self {
        self.ip = ip.to_string();
        self
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("x-forwarded-for", &self.ip);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(reqwest::Method::POST, path)
    }

    async fn send(builder: RequestBuilder) -> Response {
        builder.send().await.expect("Request failed")
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// POST /v1/upload
    pub async fn request_upload(&self, filename: &str, title: Option<&str>) -> Response {
        Self::send(self.post("/v1/upload").json(&json!({
            "filename": filename,
            "title": title,
            "artist": "Test Artist",
        })))
        .await
    }

    /// PUT /v1/upload/{job_id}/data
    pub async fn upload_data(&self, job_id: &str, data: Vec<u8>) -> Response {
        Self::send(
            self.request(reqwest::Method::PUT, &format!("/v1/upload/{}/data", job_id))
                .body(data),
        )
        .await
    }

    /// POST /v1/upload/{job_id}/complete
    pub async fn complete_upload(&self, job_id: &str) -> Response {
        Self::send(self.post(&format!("/v1/upload/{}/complete", job_id))).await
    }

    /// GET /v1/jobs/{job_id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        Self::send(self.get(&format!("/v1/jobs/{}", job_id))).await
    }

    /// GET /v1/jobs
    pub async fn list_jobs(&self, status: Option<&str>) -> Response {
        let path = match status {
            Some(status) => format!("/v1/jobs?status={}", status),
            None => "/v1/jobs".to_string(),
        };
        Self::send(self.get(&path)).await
    }

    /// Runs a whole upload and returns the job id without waiting for the
    /// pipeline.
    pub async fn upload(&self, filename: &str, title: &str, data: Vec<u8>) -> String {
        let response = self.request_upload(filename, Some(title)).await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body: Value = response.json().await.expect("upload response");
        let job_id = body["jobId"].as_str().expect("jobId").to_string();

        let response = self.upload_data(&job_id, data).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = self.complete_upload(&job_id).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        job_id
    }

    /// Polls the job until it is `completed` or `failed`.
    pub async fn wait_for_job(&self, job_id: &str) -> Value {
        let start = Instant::now();
        loop {
            let response = self.get_job(job_id).await;
            assert_eq!(response.status(), StatusCode::OK);
            let job: Value = response.json().await.expect("job snapshot");
            match job["status"].as_str() {
                Some("completed") | Some("failed") => return job,
                _ if start.elapsed() > Duration::from_millis(JOB_TIMEOUT_MS) => {
                    panic!("Job {} did not finish: {}", job_id, job)
                }
                _ => tokio::time::sleep(Duration::from_millis(JOB_POLL_INTERVAL_MS)).await,
            }
        }
    }

    /// Uploads `data` and returns the id of the resulting completed track.
    pub async fn ingest(&self, title: &str, data: Vec<u8>) -> i64 {
        let job_id = self.upload("tone.wav", title, data).await;
        let job = self.wait_for_job(&job_id).await;
        assert_eq!(job["status"], "completed", "job failed: {}", job);
        job["track"]["id"].as_i64().expect("track id")
    }

    // ========================================================================
    // Tracks
    // ========================================================================

    /// GET /v1/tracks/{id}
    pub async fn get_track(&self, id: i64) -> Response {
        Self::send(self.get(&format!("/v1/tracks/{}", id))).await
    }

    /// PATCH /v1/tracks/{id}
    pub async fn update_track(&self, id: i64, patch: Value) -> Response {
        Self::send(
            self.request(reqwest::Method::PATCH, &format!("/v1/tracks/{}", id))
                .json(&patch),
        )
        .await
    }

    /// DELETE /v1/tracks/{id}
    pub async fn delete_track(&self, id: i64) -> Response {
        Self::send(self.request(reqwest::Method::DELETE, &format!("/v1/tracks/{}", id))).await
    }

    /// GET /v1/tracks/{id}/stream
    pub async fn get_stream_info(&self, id: i64) -> Response {
        Self::send(self.get(&format!("/v1/tracks/{}/stream", id))).await
    }

    /// GET /v1/tracks/{id}/similar
    pub async fn get_similar(&self, id: i64, limit: usize) -> Response {
        Self::send(self.get(&format!("/v1/tracks/{}/similar?limit={}", id, limit))).await
    }

    /// GET on a path below /media
    pub async fn get_media(&self, path: &str) -> Response {
        Self::send(self.get(path)).await
    }

    // ========================================================================
    // Keys
    // ========================================================================

    /// GET /v1/keys/{track_id}
    pub async fn get_key(&self, track_id: i64) -> Response {
        Self::send(self.get(&format!("/v1/keys/{}", track_id))).await
    }

    /// GET /v1/keys/{track_id} with If-None-Match
    pub async fn get_key_if_none_match(&self, track_id: i64, etag: &str) -> Response {
        Self::send(
            self.get(&format!("/v1/keys/{}", track_id))
                .header("if-none-match", etag),
        )
        .await
    }

    /// POST /v1/admin/keys/{track_id}/rotate
    pub async fn rotate_key(&self, track_id: i64, key_base64: Option<&str>) -> Response {
        let builder = self.post(&format!("/v1/admin/keys/{}/rotate", track_id));
        let builder = match key_base64 {
            Some(key) => builder.json(&json!({ "key": key })),
            None => builder,
        };
        Self::send(builder).await
    }

    // ========================================================================
    // Listening
    // ========================================================================

    /// POST /v1/listen/start
    pub async fn start_listening(&self, track_id: i64) -> Response {
        Self::send(
            self.post("/v1/listen/start")
                .json(&json!({ "trackId": track_id })),
        )
        .await
    }

    /// POST /v1/listen/heartbeat
    pub async fn heartbeat(&self, session_id: &str, current_time: f64) -> Response {
        Self::send(self.post("/v1/listen/heartbeat").json(&json!({
            "sessionId": session_id,
            "currentTime": current_time,
        })))
        .await
    }

    /// POST /v1/listen/complete
    pub async fn complete_listening(&self, session_id: &str, total_duration: f64) -> Response {
        Self::send(self.post("/v1/listen/complete").json(&json!({
            "sessionId": session_id,
            "totalDuration": total_duration,
        })))
        .await
    }

    /// GET /v1/listen/quota
    pub async fn get_quota(&self) -> Response {
        Self::send(self.get("/v1/listen/quota")).await
    }

    /// Starts a session and returns its id.
    pub async fn start_session(&self, track_id: i64) -> String {
        let response = self.start_listening(track_id).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = response.json().await.expect("start response");
        body["sessionId"].as_str().expect("sessionId").to_string()
    }

    // ========================================================================
    // Admin
    // ========================================================================

    /// GET /v1/admin/blocked-ips
    pub async fn list_blocked_ips(&self) -> Response {
        Self::send(self.get("/v1/admin/blocked-ips")).await
    }

    /// POST /v1/admin/blocked-ips
    pub async fn block_ip(&self, body: Value) -> Response {
        Self::send(self.post("/v1/admin/blocked-ips").json(&body)).await
    }

    /// DELETE /v1/admin/blocked-ips/{ip}
    pub async fn unblock_ip(&self, ip: &str) -> Response {
        Self::send(self.request(
            reqwest::Method::DELETE,
            &format!("/v1/admin/blocked-ips/{}", ip),
        ))
        .await
    }

    /// POST /v1/admin/blocked-ips/cleanup
    pub async fn cleanup_blocked_ips(&self) -> Response {
        Self::send(self.post("/v1/admin/blocked-ips/cleanup")).await
    }
}
