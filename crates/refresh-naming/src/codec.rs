//! Store name encoding.
//!
//! Format: `<prefix><created_at>_<digest>`, e.g.
//! `gtfs_nyct_subway_1712169379_0f1deb`.
//!
//! A name is ours iff it starts with the configured prefix followed by at
//! least [`MIN_TIMESTAMP_DIGITS`] decimal digits, a `_`, and exactly
//! [`DIGEST_LENGTH`] lowercase hex characters. The digit-width guard keeps
//! legacy or foreign stores that merely share the prefix out of the
//! catalog.

use std::sync::OnceLock;

use regex_lite::Regex;

use crate::digest::{is_digest, DIGEST_LENGTH};
use crate::record::StoreRecord;

/// Minimum number of decimal digits in the timestamp part of a name.
pub const MIN_TIMESTAMP_DIGITS: usize = 10;

fn suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let pattern = format!(
            r"^([0-9]{{{},}})_([0-9a-f]{{{}}})$",
            MIN_TIMESTAMP_DIGITS, DIGEST_LENGTH
        );
        Regex::new(&pattern).expect("static store name pattern is valid")
    })
}

/// Build the store name for `created_at` and `digest` under `prefix`.
pub fn encode(prefix: &str, created_at: i64, digest: &str) -> String {
    format!("{prefix}{created_at}_{digest}")
}

/// Parse `name` under `prefix`. Returns `None` for names that are not ours.
pub fn decode(name: &str, prefix: &str) -> Option<StoreRecord> {
    let rest = name.strip_prefix(prefix)?;
    let caps = suffix_pattern().captures(rest)?;
    let created_at: i64 = caps.get(1)?.as_str().parse().ok()?;
    let digest = caps.get(2)?.as_str();
    Some(StoreRecord::new(name.to_string(), created_at, digest.to_string()))
}

/// Codec bound to one store prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNameCodec {
    prefix: String,
}

impl StoreNameCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Build a [`StoreRecord`] for a store about to be created.
    pub fn record(&self, created_at: i64, digest: &str) -> StoreRecord {
        debug_assert!(is_digest(digest), "not a feed digest: {digest}");
        StoreRecord::new(
            encode(&self.prefix, created_at, digest),
            created_at,
            digest.to_string(),
        )
    }

    pub fn decode(&self, name: &str) -> Option<StoreRecord> {
        decode(name, &self.prefix)
    }

    /// Returns true if `name` belongs to this codec's namespace.
    pub fn is_ours(&self, name: &str) -> bool {
        self.decode(name).is_some()
    }
}
