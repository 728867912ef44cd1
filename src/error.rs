//! The error taxonomy at the config / tick / root-failure boundary.
//!
//! Most errors in this codebase just flow as `anyhow::Error`. This enum
//! exists only where the *kind* of failure changes what the caller does
//! with it: a configuration problem is fatal at startup, a root failure is
//! fatal mid-run, and everything else is an ordinary per-item `anyhow`
//! error that gets logged and skipped.

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum MirrorError {
    #[error("{0}")]
    Configuration(String),

    #[error("{side} root {path} is unreachable")]
    RootUnreachable { path: Utf8PathBuf, side: RootSide },
}

impl MirrorError {
    /// The process exit code this error maps to, per the CLI's documented
    /// exit code contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            MirrorError::Configuration(_) => 2,
            MirrorError::RootUnreachable { .. } => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootSide {
    Origin,
    Target,
}

impl std::fmt::Display for RootSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RootSide::Origin => write!(f, "origin"),
            RootSide::Target => write!(f, "target"),
        }
    }
}
