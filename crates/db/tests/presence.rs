//! Integration tests for venue presence: check-in, heartbeat, sweep, discovery reads.

use chrono::{Duration, Utc};
use kingz_core::presence::{stale_cutoff, STALE_PRESENCE_HOURS};
use kingz_db::models::user::CreateUser;
use kingz_db::models::venue::CreateVenue;
use kingz_db::repositories::{PresenceRepo, UserRepo, VenueRepo};
use sqlx::PgPool;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn seed_user(pool: &PgPool, name: &str) -> i64 {
    UserRepo::create(
        pool,
        &CreateUser {
            username: name.to_string(),
            avatar_url: None,
        },
    )
    .await
    .unwrap()
    .id
}

async fn seed_venue(pool: &PgPool, name: &str) -> i64 {
    VenueRepo::create(
        pool,
        &CreateVenue {
            name: name.to_string(),
            latitude: Some(48.2082),
            longitude: Some(16.3738),
            district: Some("Innere Stadt".to_string()),
        },
    )
    .await
    .unwrap()
    .id
}

fn cutoff() -> chrono::DateTime<Utc> {
    stale_cutoff(Utc::now(), STALE_PRESENCE_HOURS)
}

async fn presence_count(pool: &PgPool, user_id: i64) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM venue_presence WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

async fn backdate(pool: &PgPool, user_id: i64, hours: i64) {
    sqlx::query("UPDATE venue_presence SET last_seen_at = NOW() - make_interval(hours => $2) WHERE user_id = $1")
        .bind(user_id)
        .bind(hours as i32)
        .execute(pool)
        .await
        .unwrap();
}

// ---------------------------------------------------------------------------
// Check-in
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn check_in_at_new_venue_replaces_old(pool: PgPool) {
    let user = seed_user(&pool, "alice").await;
    let a = seed_venue(&pool, "Court A").await;
    let b = seed_venue(&pool, "Court B").await;

    let first = PresenceRepo::check_in(&pool, user, a, 48.2, 16.3, cutoff()).await.unwrap();
    assert!(!first.moved_from_other_venue);

    let second = PresenceRepo::check_in(&pool, user, b, 48.2, 16.3, cutoff()).await.unwrap();
    assert!(second.moved_from_other_venue);
    assert_eq!(second.presence.venue_id, b);

    assert_eq!(presence_count(&pool, user).await, 1);
    assert!(PresenceRepo::get_status(&pool, user, a).await.unwrap().is_none());
    assert!(PresenceRepo::get_status(&pool, user, b).await.unwrap().is_some());
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn repeated_check_in_refreshes_single_record(pool: PgPool) {
    let user = seed_user(&pool, "bob").await;
    let venue = seed_venue(&pool, "Court A").await;

    PresenceRepo::check_in(&pool, user, venue, 48.2, 16.3, cutoff()).await.unwrap();
    backdate(&pool, user, 1).await;
    let again = PresenceRepo::check_in(&pool, user, venue, 48.21, 16.31, cutoff()).await.unwrap();

    assert_eq!(presence_count(&pool, user).await, 1);
    assert!(again.presence.last_seen_at > Utc::now() - Duration::minutes(5));
    assert!((again.presence.latitude - 48.21).abs() < 1e-9);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_check_ins_leave_one_record(pool: PgPool) {
    let user = seed_user(&pool, "carol").await;
    let a = seed_venue(&pool, "Court A").await;
    let b = seed_venue(&pool, "Court B").await;

    let (ra, rb) = tokio::join!(
        PresenceRepo::check_in(&pool, user, a, 48.2, 16.3, cutoff()),
        PresenceRepo::check_in(&pool, user, b, 48.2, 16.3, cutoff()),
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(presence_count(&pool, user).await, 1);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn check_in_sweeps_other_users_stale_records(pool: PgPool) {
    let stale_user = seed_user(&pool, "stale").await;
    let user = seed_user(&pool, "fresh").await;
    let venue = seed_venue(&pool, "Court A").await;

    PresenceRepo::check_in(&pool, stale_user, venue, 48.2, 16.3, cutoff()).await.unwrap();
    backdate(&pool, stale_user, 3).await;

    let result = PresenceRepo::check_in(&pool, user, venue, 48.2, 16.3, cutoff()).await.unwrap();
    assert_eq!(result.stale_removed, 1);
    assert_eq!(presence_count(&pool, stale_user).await, 0);
}

// ---------------------------------------------------------------------------
// Heartbeat / check-out / sweep
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn heartbeat_only_updates_existing_record(pool: PgPool) {
    let user = seed_user(&pool, "dave").await;
    let a = seed_venue(&pool, "Court A").await;
    let b = seed_venue(&pool, "Court B").await;

    assert!(PresenceRepo::heartbeat(&pool, user, a, 48.2, 16.3).await.unwrap().is_none());
    assert_eq!(presence_count(&pool, user).await, 0);

    PresenceRepo::check_in(&pool, user, a, 48.2, 16.3, cutoff()).await.unwrap();
    assert!(PresenceRepo::heartbeat(&pool, user, b, 48.2, 16.3).await.unwrap().is_none());

    backdate(&pool, user, 1).await;
    let refreshed = PresenceRepo::heartbeat(&pool, user, a, 48.25, 16.35)
        .await
        .unwrap()
        .expect("record exists at venue a");
    assert!(refreshed.last_seen_at > Utc::now() - Duration::minutes(5));
    assert!((refreshed.longitude - 16.35).abs() < 1e-9);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn check_out_is_idempotent(pool: PgPool) {
    let user = seed_user(&pool, "erin").await;
    let venue = seed_venue(&pool, "Court A").await;

    PresenceRepo::check_in(&pool, user, venue, 48.2, 16.3, cutoff()).await.unwrap();
    assert!(PresenceRepo::check_out(&pool, user, venue).await.unwrap());
    assert!(!PresenceRepo::check_out(&pool, user, venue).await.unwrap());
    assert_eq!(presence_count(&pool, user).await, 0);
}

#[sqlx::test(migrations = "../../db/migrations")]
async fn sweep_removes_three_hour_old_keeps_one_hour_old(pool: PgPool) {
    let old = seed_user(&pool, "old").await;
    let recent = seed_user(&pool, "recent").await;
    let venue = seed_venue(&pool, "Court A").await;

    PresenceRepo::check_in(&pool, old, venue, 48.2, 16.3, cutoff()).await.unwrap();
    PresenceRepo::check_in(&pool, recent, venue, 48.2, 16.3, cutoff()).await.unwrap();
    backdate(&pool, old, 3).await;
    backdate(&pool, recent, 1).await;

    let removed = PresenceRepo::sweep_stale(&pool, cutoff()).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(presence_count(&pool, old).await, 0);
    assert_eq!(presence_count(&pool, recent).await, 1);

    // Idempotent.
    assert_eq!(PresenceRepo::sweep_stale(&pool, cutoff()).await.unwrap(), 0);
}

// ---------------------------------------------------------------------------
// Discovery reads
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../../db/migrations")]
async fn active_reads_skip_stale_and_sum_xp(pool: PgPool) {
    let fresh = seed_user(&pool, "fresh").await;
    let stale = seed_user(&pool, "stale").await;
    let a = seed_venue(&pool, "Court A").await;
    let b = seed_venue(&pool, "Court B").await;

    let sport: i64 = sqlx::query_scalar("INSERT INTO sports (name) VALUES ('padel') RETURNING id")
        .fetch_one(&pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO player_stats (user_id, sport_id, total_xp) VALUES ($1, $2, 420)")
        .bind(fresh)
        .bind(sport)
        .execute(&pool)
        .await
        .unwrap();

    PresenceRepo::check_in(&pool, fresh, a, 48.2, 16.3, cutoff()).await.unwrap();
    PresenceRepo::check_in(&pool, stale, b, 48.2, 16.3, cutoff()).await.unwrap();
    backdate(&pool, stale, 3).await;

    let venues = PresenceRepo::active_venues(&pool, cutoff()).await.unwrap();
    assert_eq!(venues.len(), 1);
    assert_eq!(venues[0].venue_id, a);

    let players = PresenceRepo::active_players(&pool, cutoff(), None).await.unwrap();
    assert_eq!(players.len(), 1);
    assert_eq!(players[0].user_id, fresh);
    assert_eq!(players[0].total_xp, 420);

    let other_sport = PresenceRepo::active_players(&pool, cutoff(), Some(sport + 1))
        .await
        .unwrap();
    assert_eq!(other_sport[0].total_xp, 0);
}
