//! HTTP integration tests for the match lifecycle.

mod common;

use std::time::Duration;

use axum::http::StatusCode;
use common::{body_json, get, get_as, post_json, upload_video, TestApp};
use kingz_core::types::DbId;
use kingz_db::models::status::AnalysisJobStatus;
use kingz_db::repositories::{AnalysisJobRepo, MatchRepo, PlayerStatsRepo};
use serde_json::json;
use sqlx::PgPool;

const TEN_MB: usize = 10 * 1024 * 1024;

struct Players {
    p1: DbId,
    p2: DbId,
    outsider: DbId,
    venue: DbId,
    sport: DbId,
}

async fn seed(pool: &PgPool) -> Players {
    Players {
        p1: common::seed_user(pool, "challenger").await,
        p2: common::seed_user(pool, "king").await,
        outsider: common::seed_user(pool, "spectator").await,
        venue: common::seed_venue(pool, "Donaukanal Court", common::VENUE_LAT, common::VENUE_LON)
            .await,
        sport: common::seed_sport(pool).await,
    }
}

async fn create_challenge(app: &TestApp, p: &Players) -> DbId {
    let response = post_json(
        app,
        "/api/v1/matches",
        p.p1,
        json!({ "opponent_id": p.p2, "venue_id": p.venue, "sport_id": p.sport }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "pending");
    assert_eq!(json["data"]["role"], "challenger");
    json["data"]["id"].as_i64().unwrap()
}

/// Challenge, accept, and start recording as player 1.
async fn recording_match(app: &TestApp, p: &Players) -> DbId {
    let id = create_challenge(app, p).await;

    let response = post_json(
        app,
        &format!("/api/v1/matches/{id}/respond"),
        p.p2,
        json!({ "accept": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "accepted");

    let response = post_json(app, &format!("/api/v1/matches/{id}/start"), p.p1, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["status"], "in_progress");
    assert_eq!(json["data"]["recording_by"], p.p1);
    id
}

async fn job_count(pool: &PgPool, id: DbId) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM analysis_jobs WHERE match_id = $1")
        .bind(id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn status_of(pool: &PgPool, id: DbId) -> String {
    MatchRepo::find_by_id(pool, id)
        .await
        .unwrap()
        .unwrap()
        .status()
        .unwrap()
        .as_str()
        .to_string()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn full_match_happy_path(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    let response = upload_video(&app, id, p.p1, "video/mp4", TEN_MB).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["success"], true);
    assert_eq!(json["data"]["status"], "analyzing");
    assert_eq!(json["data"]["video_url"], format!("matches/match_{id}.mp4"));

    // Results report analysis in progress until the oracle answers.
    let response = get_as(&app, &format!("/api/v1/matches/{id}/results"), p.p2).await;
    assert_eq!(body_json(response).await["data"]["analyzing"], true);

    app.oracle.push_scores(15, 10);
    assert!(app.dispatcher().run_once().await.unwrap());
    assert!(app.store.contains(&format!("analysis/match_{id}.json")));

    let response = get_as(&app, &format!("/api/v1/matches/{id}/results"), p.p1).await;
    assert_eq!(response.status(), StatusCode::OK);
    let results = body_json(response).await["data"].clone();
    assert_eq!(results["status"], "completed");
    assert_eq!(results["winner_id"], p.p1);
    assert_eq!(results["you_won"], true);
    assert_eq!(results["xp_earned"], 150);
    assert!(results["rewards"]["winner_xp"].as_i64().unwrap() <= 200);
    assert_eq!(results["rewards"]["loser_xp"], 50);

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/agree"),
        p.p1,
        json!({ "agree": true }),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["both_agreed"], false);

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/agree"),
        p.p2,
        json!({ "agree": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["both_agreed"], true);
    assert_eq!(json["data"]["status"], "completed");

    let winner = PlayerStatsRepo::find(&pool, p.p1, p.sport).await.unwrap().unwrap();
    assert_eq!(winner.total_xp, 150);
    assert_eq!(winner.rank_points, 25);
    assert_eq!(winner.matches_won, 1);
    let loser = PlayerStatsRepo::find(&pool, p.p2, p.sport).await.unwrap().unwrap();
    assert_eq!(loser.total_xp, 50);
    assert_eq!(loser.matches_played, 1);

    // A repeated confirmation never pays out twice.
    post_json(
        &app,
        &format!("/api/v1/matches/{id}/agree"),
        p.p2,
        json!({ "agree": true }),
    )
    .await;
    let winner = PlayerStatsRepo::find(&pool, p.p1, p.sport).await.unwrap().unwrap();
    assert_eq!(winner.total_xp, 150);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn duplicate_upload_is_rejected(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    let first = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(first.status(), StatusCode::OK);

    let second = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(second.status(), StatusCode::BAD_REQUEST);
    let json = body_json(second).await;
    assert!(
        json["error"].as_str().unwrap().contains("already uploaded"),
        "{json}"
    );

    assert_eq!(app.store.count_with_prefix("matches/"), 1);
    app.oracle.push_scores(3, 1);
    let dispatcher = app.dispatcher();
    assert!(dispatcher.run_once().await.unwrap());
    assert!(!dispatcher.run_once().await.unwrap());
    assert_eq!(app.oracle.calls(), 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upload_rejections(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    // Only the recording player may upload.
    let response = upload_video(&app, id, p.p2, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "Only the recording player can upload the video");

    let response = upload_video(&app, id, p.p1, "image/png", 1024).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = upload_video(&app, id, p.outsider, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    assert_eq!(status_of(&pool, id).await, "in_progress");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn failed_storage_releases_the_upload(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    app.store.set_fail_writes(true);
    let response = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(status_of(&pool, id).await, "in_progress");

    app.store.set_fail_writes(false);
    let response = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_uploads_store_once(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    let (a, b) = tokio::join!(
        upload_video(&app, id, p.p1, "video/mp4", 1024),
        upload_video(&app, id, p.p1, "video/mp4", 1024),
    );
    let mut statuses = [a.status(), b.status()];
    statuses.sort();
    assert_eq!(statuses, [StatusCode::OK, StatusCode::BAD_REQUEST]);

    assert_eq!(app.store.write_count(), 1);
    assert_eq!(app.store.count_with_prefix("matches/"), 1);
    assert_eq!(job_count(&pool, id).await, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn upload_outlives_request_timeout(pool: PgPool) {
    let mut config = common::test_config();
    config.request_timeout_secs = 1;
    let app = common::build_test_app_with(pool.clone(), config);
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    app.store.set_write_delay(Some(Duration::from_secs(2)));
    let response = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    assert_eq!(status_of(&pool, id).await, "uploading");

    // The store keeps running without the request and settles the reservation.
    let mut status = String::new();
    for _ in 0..50 {
        status = status_of(&pool, id).await;
        if status != "uploading" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(status, "analyzing");
    assert!(app.store.contains(&format!("matches/match_{id}.mp4")));
    assert_eq!(job_count(&pool, id).await, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn abandoned_upload_is_reclaimed(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    // A reservation whose request died before settling it.
    MatchRepo::begin_upload(&pool, id, p.p1).await.unwrap().unwrap();

    let response = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(
        json["error"].as_str().unwrap().contains("upload already in progress"),
        "{json}"
    );

    let released = MatchRepo::release_stale_uploads(&pool, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(released, 1);
    assert_eq!(status_of(&pool, id).await, "in_progress");

    let response = upload_video(&app, id, p.p1, "video/mp4", 1024).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(status_of(&pool, id).await, "analyzing");
}

// ---------------------------------------------------------------------------
// Recording lock
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn recording_lock_handoff(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;

    // Player 2 cannot start while player 1 records.
    let response = post_json(&app, &format!("/api/v1/matches/{id}/start"), p.p2, json!({})).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/cancel-recording"),
        p.p1,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["success"], true);

    let response = post_json(&app, &format!("/api/v1/matches/{id}/start"), p.p2, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["recording_by"], p.p2);

    // Restarting as the holder is a no-op.
    let response = post_json(&app, &format!("/api/v1/matches/{id}/start"), p.p2, json!({})).await;
    assert_eq!(response.status(), StatusCode::OK);
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn expired_challenge_is_cancelled(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = create_challenge(&app, &p).await;

    sqlx::query("UPDATE matches SET expires_at = NOW() - INTERVAL '1 minute' WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await
        .unwrap();

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/respond"),
        p.p2,
        json!({ "accept": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await["error"], "Challenge has expired");
    assert_eq!(status_of(&pool, id).await, "cancelled");
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn challenge_validation(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;

    let response = post_json(
        &app,
        "/api/v1/matches",
        p.p1,
        json!({ "opponent_id": p.p1, "venue_id": p.venue, "sport_id": p.sport }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = post_json(
        &app,
        "/api/v1/matches",
        p.p1,
        json!({ "opponent_id": 999_999, "venue_id": p.venue, "sport_id": p.sport }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The challenger cannot accept their own challenge, only withdraw it.
    let id = create_challenge(&app, &p).await;
    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/respond"),
        p.p1,
        json!({ "accept": true }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/respond"),
        p.p1,
        json!({ "accept": false }),
    )
    .await;
    assert_eq!(body_json(response).await["data"]["status"], "declined");

    let response = get_as(&app, "/api/v1/matches?status=declined", p.p2).await;
    let json = body_json(response).await;
    assert_eq!(json["data"].as_array().unwrap().len(), 1);
    assert_eq!(json["data"][0]["role"], "opponent");

    let response = get_as(&app, "/api/v1/matches?status=bogus", p.p2).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn non_participant_cannot_view_match(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = create_challenge(&app, &p).await;

    let response = get_as(&app, &format!("/api/v1/matches/{id}"), p.outsider).await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["code"], "FORBIDDEN");

    let response = get_as(&app, &format!("/api/v1/matches/{id}"), p.p2).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["role"], "opponent");
    assert_eq!(json["data"]["poll_interval_secs"], 3);

    let response = get_as(&app, "/api/v1/matches/999999", p.p2).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn missing_token_is_unauthorized(pool: PgPool) {
    let app = common::build_test_app(pool);
    let response = get(&app, "/api/v1/matches").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Analysis failures and disputes
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn exhausted_analysis_completes_without_scores(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;
    upload_video(&app, id, p.p1, "video/mp4", 1024).await;

    let dispatcher = app.dispatcher();
    for _ in 0..3 {
        app.oracle.push_failure(503);
        assert!(dispatcher.run_once().await.unwrap());
        // Skip the back-off.
        sqlx::query("UPDATE analysis_jobs SET next_attempt_at = NOW() WHERE match_id = $1")
            .bind(id)
            .execute(&pool)
            .await
            .unwrap();
    }
    assert!(!dispatcher.run_once().await.unwrap());

    let record = MatchRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(record.status().unwrap().as_str(), "completed");
    assert_eq!(record.player1_score, None);
    assert_eq!(record.winner_id, None);

    let job = AnalysisJobRepo::find_by_match(&pool, id).await.unwrap().unwrap();
    assert_eq!(job.status_id, AnalysisJobStatus::Failed.id());
    assert_eq!(job.attempts, 3);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn dispute_during_analysis_wins(pool: PgPool) {
    let app = common::build_test_app(pool.clone());
    let p = seed(&pool).await;
    let id = recording_match(&app, &p).await;
    upload_video(&app, id, p.p1, "video/mp4", 1024).await;

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/dispute"),
        p.p2,
        json!({ "reason": "Camera missed the last point" }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["data"]["status"], "disputed");

    app.oracle.push_scores(15, 10);
    assert!(app.dispatcher().run_once().await.unwrap());

    let record = MatchRepo::find_by_id(&pool, id).await.unwrap().unwrap();
    assert_eq!(record.status().unwrap().as_str(), "disputed");
    assert_eq!(record.winner_id, None);
    assert_eq!(record.disputed_by, Some(p.p2));

    let response = post_json(
        &app,
        &format!("/api/v1/matches/{id}/dispute"),
        p.p1,
        json!({}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
}
