//! Client for the external video scoring service.
//!
//! The service is opaque and unreliable: it may fail, time out, or answer
//! without usable scores. Callers get the raw JSON body alongside the parsed
//! [`ScoreReport`] so they can keep an audit copy.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

/// Default timeout for one analysis request.
pub const DEFAULT_ANALYSIS_TIMEOUT_SECS: u64 = 120;

/// Scores extracted from a match video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreReport {
    #[serde(alias = "player1Score", deserialize_with = "whole_score")]
    pub player1_score: i32,
    #[serde(alias = "player2Score", deserialize_with = "whole_score")]
    pub player2_score: i32,
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// Accept any JSON number with no fractional part, so `15` and `15.0` agree.
/// Range and sign are left to the outcome rules.
fn whole_score<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i32, D::Error> {
    let value = f64::deserialize(deserializer)?;
    if value.fract() != 0.0 || value < f64::from(i32::MIN) || value > f64::from(i32::MAX) {
        return Err(serde::de::Error::custom(format!(
            "score {value} is not a whole number"
        )));
    }
    Ok(value as i32)
}

/// One oracle answer: the parsed scores, if any, plus the raw body.
#[derive(Debug, Clone)]
pub struct OracleResponse {
    pub report: Option<ScoreReport>,
    pub raw: serde_json::Value,
}

/// Errors from the scoring service client.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Scoring API error ({status}): {body}")]
    Api { status: u16, body: String },
}

#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Analyse the video reachable at `video_url`.
    async fn analyze(&self, video_url: &str) -> Result<OracleResponse, ScoringError>;
}

/// Interpret a response body. Anything without two numeric scores is "no
/// result" rather than an error.
pub fn parse_report(raw: &serde_json::Value) -> Option<ScoreReport> {
    let candidate = raw.get("result").unwrap_or(raw);
    if candidate.is_null() {
        return None;
    }
    serde_json::from_value(candidate.clone()).ok()
}

/// HTTP implementation: `POST {api_url}/analyze` with `{"video_url": ...}`.
pub struct HttpScoringOracle {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

impl HttpScoringOracle {
    pub fn new(api_url: String, api_key: Option<String>) -> Result<Self, ScoringError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_ANALYSIS_TIMEOUT_SECS))
            .build()?;
        Ok(Self::with_client(client, api_url, api_key))
    }

    /// Reuse an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    /// Ensure the response has a success status code, capturing the body
    /// text otherwise.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ScoringError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ScoringError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl ScoringOracle for HttpScoringOracle {
    async fn analyze(&self, video_url: &str) -> Result<OracleResponse, ScoringError> {
        let mut request = self
            .client
            .post(format!("{}/analyze", self.api_url))
            .json(&serde_json::json!({ "video_url": video_url }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = Self::ensure_success(request.send().await?).await?;
        let raw: serde_json::Value = response.json().await?;
        let report = parse_report(&raw);
        if report.is_none() {
            tracing::warn!(video_url, "Scoring service returned no scores");
        }
        Ok(OracleResponse { report, raw })
    }
}
