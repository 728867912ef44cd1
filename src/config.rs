//! Configuration: the outer argument vector (verbosity, `--help`) is parsed
//! with `clap::Parser` the way every `ui/*::Args` struct in this codebase
//! is. The `key=value` tokens themselves (§6's actual grammar) are hand
//! validated - `clap`'s derive model has no clean way to express "five
//! specific keys, each optional-or-required independently, arbitrary order,
//! custom diagnostics" the way a dozen lines of matching can.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;

use crate::error::MirrorError;

#[derive(Debug, Parser)]
#[command(
    name = "mirrorpak",
    version,
    about = "Keeps a target directory byte-for-byte synchronized with a source directory"
)]
pub struct Args {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,

    /// Configuration as `key=value` tokens: origin=, mirror=, interval=,
    /// maxsize=, and the optional buffermultiplier=.
    #[clap(required = true, verbatim_doc_comment)]
    pub tokens: Vec<String>,
}

/// Validated configuration for one mirror.
#[derive(Debug, Clone)]
pub struct Config {
    pub origin: Utf8PathBuf,
    pub mirror: Utf8PathBuf,
    pub interval: Duration,
    pub max_file_size: u64,
    pub buffer_kib: usize,
}

const DEFAULT_BUFFER_KIB: usize = 4;

impl Config {
    /// Parse and validate the `key=value` tokens from the command line.
    pub fn from_tokens(tokens: &[String]) -> Result<Config, MirrorError> {
        let mut values = BTreeMap::new();
        for token in tokens {
            let (key, value) = token.split_once('=').ok_or_else(|| {
                MirrorError::Configuration(format!(
                    "'{token}' isn't a key=value token"
                ))
            })?;
            if values.insert(key.to_owned(), value.to_owned()).is_some() {
                return Err(MirrorError::Configuration(format!(
                    "'{key}' was given more than once"
                )));
            }
        }

        let known = ["origin", "mirror", "interval", "maxsize", "buffermultiplier"];
        for key in values.keys() {
            if !known.contains(&key.as_str()) {
                return Err(MirrorError::Configuration(format!("Unknown key '{key}'")));
            }
        }

        let origin = require(&values, "origin")?;
        let mirror = require(&values, "mirror")?;
        let interval_ms = positive_int(&require(&values, "interval")?, "interval")?;
        let max_file_size = positive_int(&require(&values, "maxsize")?, "maxsize")?;
        let buffer_kib = match values.get("buffermultiplier") {
            Some(v) => positive_int(v, "buffermultiplier")? as usize,
            None => DEFAULT_BUFFER_KIB,
        };

        Ok(Config {
            origin: Utf8PathBuf::from(origin),
            mirror: Utf8PathBuf::from(mirror),
            interval: Duration::from_millis(interval_ms),
            max_file_size,
            buffer_kib,
        })
    }
}

fn require(values: &BTreeMap<String, String>, key: &str) -> Result<String, MirrorError> {
    values
        .get(key)
        .cloned()
        .ok_or_else(|| MirrorError::Configuration(format!("Missing required key '{key}'")))
}

fn positive_int(value: &str, key: &str) -> Result<u64, MirrorError> {
    let n: u64 = value
        .parse()
        .map_err(|_| MirrorError::Configuration(format!("'{key}={value}' isn't an integer")))?;
    if n == 0 {
        return Err(MirrorError::Configuration(format!(
            "'{key}' must be a positive integer, got 0"
        )));
    }
    Ok(n)
}

/// Log level implied by a `-v` repeat count, mirroring this codebase's
/// existing verbosity convention (0 = warn, 1 = info, 2 = debug, 3+ = trace).
pub fn verbosity_to_level(verbosity: u8) -> tracing::Level {
    match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// A fatal config message printed to stderr before exiting with code 2.
pub fn report_configuration_error(e: &MirrorError) {
    eprintln!("{e}");
}

#[cfg(test)]
mod test {
    use super::*;

    fn tok(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_a_full_config() -> Result<()> {
        let cfg = Config::from_tokens(&tok(&[
            "origin=/srv/origin",
            "mirror=/srv/mirror",
            "interval=5000",
            "maxsize=1048576",
            "buffermultiplier=16",
        ]))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

        assert_eq!(cfg.origin, Utf8PathBuf::from("/srv/origin"));
        assert_eq!(cfg.mirror, Utf8PathBuf::from("/srv/mirror"));
        assert_eq!(cfg.interval, Duration::from_millis(5000));
        assert_eq!(cfg.max_file_size, 1048576);
        assert_eq!(cfg.buffer_kib, 16);
        Ok(())
    }

    #[test]
    fn buffer_multiplier_defaults() -> Result<()> {
        let cfg = Config::from_tokens(&tok(&[
            "origin=/srv/origin",
            "mirror=/srv/mirror",
            "interval=5000",
            "maxsize=1048576",
        ]))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
        assert_eq!(cfg.buffer_kib, DEFAULT_BUFFER_KIB);
        Ok(())
    }

    #[test]
    fn missing_required_key_is_rejected() {
        let result = Config::from_tokens(&tok(&["origin=/srv/origin"]));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_key_is_rejected() {
        let result = Config::from_tokens(&tok(&[
            "origin=/srv/origin",
            "mirror=/srv/mirror",
            "interval=5000",
            "maxsize=5000",
            "nonsense=1",
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn duplicate_key_is_rejected() {
        let result = Config::from_tokens(&tok(&["origin=/a", "origin=/b"]));
        assert!(result.is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let result = Config::from_tokens(&tok(&[
            "origin=/srv/origin",
            "mirror=/srv/mirror",
            "interval=0",
            "maxsize=5000",
        ]));
        assert!(result.is_err());
    }
}
