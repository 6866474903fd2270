//! Serves locally stored blobs behind signed `/media` links.

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub token: String,
}

/// GET /media/{*key}?token=
///
/// Streams the object back when `token` was signed for exactly `key` and has
/// not expired. No session is needed; the token is the credential.
pub async fn serve_media(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<MediaQuery>,
) -> AppResult<impl IntoResponse> {
    state.link_signer.verify(&query.token, &key)?;
    let bytes = state.blob_store.retrieve(&key).await?;

    tracing::debug!(%key, size = bytes.len(), "Media served");
    Ok((
        [
            (CONTENT_TYPE, content_type_for(&key)),
            (CACHE_CONTROL, "private, no-store"),
        ],
        bytes,
    ))
}

fn content_type_for(key: &str) -> &'static str {
    let extension = key.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match extension.as_deref() {
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        Some("mov") => "video/quicktime",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
