//! Drives a [`Mirror`]'s tick at a fixed interval.
//!
//! Each `Mirror` owns its own `Scheduler` - there's no shared global ticker -
//! built on `tokio::time::interval` with `MissedTickBehavior::Delay` so a
//! long tick doesn't cause a burst of immediately-re-fired ticks once it
//! finally returns. Blocking filesystem work runs via `spawn_blocking`, the
//! same pattern this codebase uses elsewhere to bridge blocking I/O into its
//! async plumbing (see [`crate::concurrently`]).

use std::sync::Arc;
use std::time::Duration;

use tracing::*;

use crate::error::MirrorError;
use crate::mirror::Mirror;

pub struct Scheduler {
    mirror: Arc<Mirror>,
    interval: Duration,
    run_initial_check: bool,
}

impl Scheduler {
    pub fn new(mirror: Arc<Mirror>, interval: Duration, run_initial_check: bool) -> Self {
        Self {
            mirror,
            interval,
            run_initial_check,
        }
    }

    /// Run ticks until a root becomes unreachable, at which point the error
    /// is returned so `main` can perform a single clean process exit.
    pub async fn run(self) -> Result<(), MirrorError> {
        if self.run_initial_check {
            info!("Running an initial sync before starting the {:?} timer", self.interval);
            self.tick().await?;
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick() fires immediately; we already ran the initial
        // check (or intentionally skipped it), so consume it without acting.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.tick().await?;
        }
    }

    async fn tick(&self) -> Result<(), MirrorError> {
        let mirror = self.mirror.clone();
        let result = tokio::task::spawn_blocking(move || mirror.check())
            .await
            .expect("mirror tick panicked");

        if let Err(e) = &result {
            error!("{e}; stopping this mirror's scheduler");
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::file_service::OsFileService;
    use camino::Utf8PathBuf;
    use std::fs;
    use tempfile::tempdir;

    fn utf8(p: std::path::PathBuf) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(p).unwrap()
    }

    #[tokio::test]
    async fn initial_check_runs_before_the_timer() {
        let origin_dir = tempdir().unwrap();
        let target_dir = tempdir().unwrap();
        let origin_root = utf8(origin_dir.path().to_owned());
        let target_root = utf8(target_dir.path().to_owned());
        fs::write(origin_root.join("a.txt"), b"hi").unwrap();

        let library_dir = tempdir().unwrap();
        let mirror = Arc::new(
            Mirror::new(
                origin_root,
                target_root.clone(),
                Box::new(OsFileService),
                4,
                u64::MAX,
                &utf8(library_dir.path().to_owned()),
            )
            .unwrap(),
        );

        let scheduler = Scheduler::new(mirror, Duration::from_secs(3600), true);
        let run = tokio::spawn(scheduler.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        run.abort();

        assert!(target_root.join("a.txt").exists());
    }
}
