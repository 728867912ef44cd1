//! Stable identifiers derived from a (origin, target) directory pair.

use camino::Utf8Path;
use data_encoding::BASE64URL_NOPAD;
use sha2::{Digest, Sha256};

/// A filename-safe identifier for the (origin, target) pair, used to name
/// this pair's persisted library.
///
/// Base64url without padding never contains `/`, `+`, or `=`, so there's
/// nothing left to substitute for filesystem safety, unlike standard base64.
pub fn mirror_name(origin: &Utf8Path, target: &Utf8Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(origin.as_str().as_bytes());
    hasher.update(b"-");
    hasher.update(target.as_str().as_bytes());
    BASE64URL_NOPAD.encode(&hasher.finalize())
}
