//! A poll-based directory mirroring daemon.
//!
//! A [`mirror::Mirror`] periodically re-[`snapshot::Snapshot`]s an origin
//! directory, diffs it against what it last saw (and against the target
//! directory's own state), and replays the difference onto the target
//! through a [`file_service::FileService`]. See the [`config`] module for
//! how a mirror gets configured and [`scheduler`] for how its ticks are
//! driven.

pub mod config;
pub mod counters;
pub mod error;
pub mod file_service;
pub mod hashing;
pub mod library;
pub mod mirror;
pub mod scheduler;
pub mod snapshot;
