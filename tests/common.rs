#![allow(dead_code)]

use std::path::Path;

use anyhow::Result;
use assert_cmd::Command;

/// One invocation of the mirror binary against a given origin/mirror pair,
/// run from `cwd` (so each test gets its own `./mirrors` library directory).
pub fn cli_run(cwd: &Path, origin: &Path, mirror: &Path, extra: &[&str]) -> Result<Command> {
    let bin_name = env!("CARGO_PKG_NAME");
    let mut cmd = Command::cargo_bin(bin_name)?;
    cmd.current_dir(cwd);
    cmd.arg(format!("origin={}", origin.display()));
    cmd.arg(format!("mirror={}", mirror.display()));
    for token in extra {
        cmd.arg(token);
    }
    Ok(cmd)
}
