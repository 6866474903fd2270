//! Background tasks.
//!
//! Each submodule provides a long-running async function (or service with a
//! `run` method) intended to be spawned via `tokio::spawn`. All tasks accept a
//! [`CancellationToken`](tokio_util::sync::CancellationToken) for graceful
//! shutdown.

pub mod analysis;
pub mod challenge_expiry;
pub mod presence_sweep;
pub mod upload_reclaim;
