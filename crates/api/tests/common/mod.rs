#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use kingz_api::auth::jwt::{JwtConfig, SessionKeys};
use kingz_api::background::analysis::AnalysisDispatcher;
use kingz_api::config::{AnalysisConfig, ServerConfig, StorageConfig};
use kingz_api::router::build_app_router;
use kingz_api::state::AppState;
use kingz_cloud::scoring::{parse_report, OracleResponse, ScoringError, ScoringOracle};
use kingz_cloud::signing::LinkSigner;
use kingz_cloud::storage::{BlobStore, StorageError};
use kingz_core::types::DbId;
use kingz_db::models::user::CreateUser;
use kingz_db::models::venue::CreateVenue;
use kingz_db::repositories::{SportRepo, UserRepo, VenueRepo};
use serde_json::Value;
use sqlx::PgPool;
use tokio::sync::Notify;
use tower::ServiceExt;

pub const VENUE_LAT: f64 = 48.2082;
pub const VENUE_LON: f64 = 16.3738;

/// Test `ServerConfig` with safe defaults and a fixed JWT secret.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        jwt: JwtConfig {
            secret: "integration-test-secret-long-enough".to_string(),
            access_token_expiry_mins: 15,
        },
        storage: StorageConfig::Local {
            root: "unused".into(),
            public_url: "http://localhost:3000".to_string(),
        },
        analysis: AnalysisConfig {
            api_url: "http://scoring.invalid".to_string(),
            api_key: None,
            poll_interval_secs: 1,
            max_attempts: 3,
        },
        presence_sweep_interval_secs: 600,
        challenge_sweep_interval_secs: 60,
        upload_sweep_interval_secs: 60,
        upload_reservation_timeout_secs: 900,
    }
}

// ---------------------------------------------------------------------------
// Collaborator doubles
// ---------------------------------------------------------------------------

/// Blob store keeping objects in memory. Writes can be made to fail or stall.
#[derive(Default)]
pub struct MemoryBlobStore {
    objects: Mutex<HashMap<String, Bytes>>,
    fail_writes: AtomicBool,
    write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl MemoryBlobStore {
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make every write sleep for `delay` before it lands.
    pub fn set_write_delay(&self, delay: Option<Duration>) {
        *self.write_delay.lock().unwrap() = delay;
    }

    /// Writes attempted so far, failed ones included.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(
        &self,
        bytes: Bytes,
        key: &str,
        _content_type: &str,
    ) -> Result<String, StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let delay = *self.write_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::S3("simulated outage".into()));
        }
        self.objects.lock().unwrap().insert(key.to_string(), bytes);
        Ok(key.to_string())
    }

    async fn retrieve(&self, url_ref: &str) -> Result<Bytes, StorageError> {
        self.objects
            .lock()
            .unwrap()
            .get(url_ref)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(url_ref.to_string()))
    }

    async fn signed_url(&self, url_ref: &str, ttl: Duration) -> Result<String, StorageError> {
        Ok(format!("mem://{url_ref}?ttl={}", ttl.as_secs()))
    }
}

/// Oracle that replays queued answers; an empty queue answers 503.
#[derive(Default)]
pub struct ScriptedOracle {
    answers: Mutex<VecDeque<Result<Value, u16>>>,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn push_scores(&self, player1: i32, player2: i32) {
        self.answers.lock().unwrap().push_back(Ok(serde_json::json!({
            "player1Score": player1,
            "player2Score": player2,
            "confidence": 0.9,
        })));
    }

    pub fn push_failure(&self, status: u16) {
        self.answers.lock().unwrap().push_back(Err(status));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    async fn analyze(&self, _video_url: &str) -> Result<OracleResponse, ScoringError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.answers.lock().unwrap().pop_front().unwrap_or(Err(503));
        match next {
            Ok(raw) => Ok(OracleResponse {
                report: parse_report(&raw),
                raw,
            }),
            Err(status) => Err(ScoringError::Api {
                status,
                body: "scripted failure".into(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// App construction
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryBlobStore>,
    pub oracle: Arc<ScriptedOracle>,
}

impl TestApp {
    /// A dispatcher sharing this app's pool, store and oracle.
    pub fn dispatcher(&self) -> AnalysisDispatcher {
        AnalysisDispatcher::new(
            self.state.pool.clone(),
            self.store.clone(),
            self.oracle.clone(),
            Arc::clone(&self.state.analysis_wakeup),
            &self.state.config.analysis,
        )
    }
}

/// Build the full application router (same middleware stack as production)
/// backed by in-memory collaborators.
pub fn build_test_app(pool: PgPool) -> TestApp {
    build_test_app_with(pool, test_config())
}

pub fn build_test_app_with(pool: PgPool, config: ServerConfig) -> TestApp {
    let store = Arc::new(MemoryBlobStore::default());
    let oracle = Arc::new(ScriptedOracle::default());

    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        session_keys: Arc::new(SessionKeys::new(&config.jwt)),
        blob_store: store.clone(),
        link_signer: Arc::new(LinkSigner::new(config.jwt.secret.as_bytes())),
        analysis_wakeup: Arc::new(Notify::new()),
    };

    TestApp {
        router: build_app_router(state.clone(), &config),
        state,
        store,
        oracle,
    }
}

pub fn token_for(user_id: DbId) -> String {
    SessionKeys::new(&test_config().jwt).issue(user_id).unwrap()
}

// ---------------------------------------------------------------------------
// Seeding
// ---------------------------------------------------------------------------

pub async fn seed_user(pool: &PgPool, username: &str) -> DbId {
    UserRepo::create(
        pool,
        &CreateUser {
            username: username.to_string(),
            avatar_url: None,
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn seed_venue(pool: &PgPool, name: &str, lat: f64, lon: f64) -> DbId {
    VenueRepo::create(
        pool,
        &CreateVenue {
            name: name.to_string(),
            latitude: Some(lat),
            longitude: Some(lon),
            district: Some("Leopoldstadt".to_string()),
        },
    )
    .await
    .unwrap()
    .id
}

pub async fn seed_sport(pool: &PgPool) -> DbId {
    SportRepo::create(pool, "basketball").await.unwrap().id
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub async fn send(
    app: &TestApp,
    method: Method,
    uri: &str,
    user: Option<DbId>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(user_id) = user {
        builder = builder.header("authorization", format!("Bearer {}", token_for(user_id)));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &TestApp, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_as(app: &TestApp, uri: &str, user: DbId) -> Response<Body> {
    send(app, Method::GET, uri, Some(user), None).await
}

pub async fn post_json(app: &TestApp, uri: &str, user: DbId, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(user), Some(body)).await
}

pub async fn put_json(app: &TestApp, uri: &str, user: DbId, body: Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(user), Some(body)).await
}

pub async fn delete_as(app: &TestApp, uri: &str, user: DbId) -> Response<Body> {
    send(app, Method::DELETE, uri, Some(user), None).await
}

/// Multipart upload of `size` bytes as field `video`.
pub async fn upload_video(
    app: &TestApp,
    match_id: DbId,
    user: DbId,
    content_type: &str,
    size: usize,
) -> Response<Body> {
    const BOUNDARY: &str = "kingz-test-boundary";
    let mut body = Vec::with_capacity(size + 256);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"video\"; filename=\"match.mp4\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.resize(body.len() + size, 0u8);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

    let request = Request::builder()
        .method(Method::POST)
        .uri(format!("/api/v1/matches/{match_id}/upload"))
        .header("authorization", format!("Bearer {}", token_for(user)))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();
    app.router.clone().oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
