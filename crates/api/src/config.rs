use std::path::PathBuf;

use crate::auth::jwt::JwtConfig;

/// Where match videos and analysis audit records are kept.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    /// Files below a local directory, served back through `/media` links
    /// rooted at `public_url`.
    Local { root: PathBuf, public_url: String },
    /// Objects in an S3 bucket (credentials from the AWS default chain).
    S3 { bucket: String },
}

/// Settings for the external video scoring service and its dispatcher.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    /// How often the dispatcher polls for due jobs when not woken.
    pub poll_interval_secs: u64,
    /// Oracle calls per match before it is completed without scores.
    pub max_attempts: i32,
}

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development. In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// JWT validation settings for the session tokens.
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub analysis: AnalysisConfig,
    /// Interval of the stale presence sweep (default: `600`).
    pub presence_sweep_interval_secs: u64,
    /// Interval of the pending challenge expiry sweep (default: `60`).
    pub challenge_sweep_interval_secs: u64,
    /// Interval of the abandoned upload sweep (default: `60`).
    pub upload_sweep_interval_secs: u64,
    /// Age after which an unsettled upload reservation is released
    /// (default: `900`). Keep it well above the longest expected store.
    pub upload_reservation_timeout_secs: u64,
}

fn env_or<T: std::str::FromStr>(name: &str, default: &str) -> T {
    std::env::var(name)
        .unwrap_or_else(|_| default.into())
        .parse()
        .unwrap_or_else(|_| panic!("{name} must be a valid {}", std::any::type_name::<T>()))
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                   |
    /// |-----------------------------------|---------------------------|
    /// | `HOST`                            | `0.0.0.0`                 |
    /// | `PORT`                            | `3000`                    |
    /// | `CORS_ORIGINS`                    | `http://localhost:5173`   |
    /// | `REQUEST_TIMEOUT_SECS`            | `30`                      |
    /// | `STORAGE_BACKEND`                 | `local` (`local` or `s3`) |
    /// | `STORAGE_ROOT`                    | `storage`                 |
    /// | `PUBLIC_URL`                      | `http://localhost:{PORT}` |
    /// | `S3_BUCKET`                       | required when `s3`        |
    /// | `SCORING_API_URL`                 | `http://localhost:8090`   |
    /// | `SCORING_API_KEY`                 | unset                     |
    /// | `ANALYSIS_POLL_INTERVAL_SECS`     | `5`                       |
    /// | `ANALYSIS_MAX_ATTEMPTS`           | `3`                       |
    /// | `PRESENCE_SWEEP_INTERVAL_SECS`    | `600`                     |
    /// | `CHALLENGE_SWEEP_INTERVAL_SECS`   | `60`                      |
    /// | `UPLOAD_SWEEP_INTERVAL_SECS`      | `60`                      |
    /// | `UPLOAD_RESERVATION_TIMEOUT_SECS` | `900`                     |
    ///
    /// JWT variables are documented on [`JwtConfig::from_env`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port: u16 = env_or("PORT", "3000");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = env_or("REQUEST_TIMEOUT_SECS", "30");

        let storage = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".into())
            .as_str()
        {
            "local" => StorageConfig::Local {
                root: std::env::var("STORAGE_ROOT")
                    .unwrap_or_else(|_| "storage".into())
                    .into(),
                public_url: std::env::var("PUBLIC_URL")
                    .unwrap_or_else(|_| format!("http://localhost:{port}")),
            },
            "s3" => StorageConfig::S3 {
                bucket: std::env::var("S3_BUCKET")
                    .expect("S3_BUCKET must be set when STORAGE_BACKEND=s3"),
            },
            other => panic!("STORAGE_BACKEND must be 'local' or 's3', got '{other}'"),
        };

        let analysis = AnalysisConfig {
            api_url: std::env::var("SCORING_API_URL")
                .unwrap_or_else(|_| "http://localhost:8090".into()),
            api_key: std::env::var("SCORING_API_KEY").ok().filter(|k| !k.is_empty()),
            poll_interval_secs: env_or("ANALYSIS_POLL_INTERVAL_SECS", "5"),
            max_attempts: env_or("ANALYSIS_MAX_ATTEMPTS", "3"),
        };

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            jwt: JwtConfig::from_env(),
            storage,
            analysis,
            presence_sweep_interval_secs: env_or("PRESENCE_SWEEP_INTERVAL_SECS", "600"),
            challenge_sweep_interval_secs: env_or("CHALLENGE_SWEEP_INTERVAL_SECS", "60"),
            upload_sweep_interval_secs: env_or("UPLOAD_SWEEP_INTERVAL_SECS", "60"),
            upload_reservation_timeout_secs: env_or("UPLOAD_RESERVATION_TIMEOUT_SECS", "900"),
        }
    }
}
