//! Retention of stores across refresh cycles
//!
//! A policy decides which stores survive garbage collection; every other
//! catalog member is dropped. Policies are pure: they see the healed
//! history (most recent first, only stores that still exist) and the
//! catalog, and return the names to keep.
//!
//! Invariant enforced by [`verify_retention`]: the most recent history
//! entry is always kept. A policy that would drop it is a bug and fails
//! the cycle.

use std::collections::BTreeSet;

use refresh_naming::StoreRecord;

use crate::config::RetentionConfig;
use crate::error::{RefreshError, Result};

/// Chooses the stores that must survive this cycle.
pub trait RetentionPolicy: Send + Sync {
    /// `history` is most recent first; `catalog` is ascending by name.
    fn retain(&self, history: &[StoreRecord], catalog: &[StoreRecord]) -> BTreeSet<String>;
}

impl<F> RetentionPolicy for F
where
    F: Fn(&[StoreRecord], &[StoreRecord]) -> BTreeSet<String> + Send + Sync,
{
    fn retain(&self, history: &[StoreRecord], catalog: &[StoreRecord]) -> BTreeSet<String> {
        self(history, catalog)
    }
}

/// Keep the `keep` most recent imports.
///
/// With `keep_fallback`, the previously promoted import is kept as well
/// even when it falls outside the window, so a known-good store is always
/// available next to the current one. `keep = 1` without fallback is the
/// single-pointer behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepRecent {
    pub keep: usize,
    pub keep_fallback: bool,
}

impl KeepRecent {
    pub fn new(keep: usize) -> Self {
        Self {
            keep,
            keep_fallback: true,
        }
    }

    pub fn without_fallback(mut self) -> Self {
        self.keep_fallback = false;
        self
    }
}

impl Default for KeepRecent {
    fn default() -> Self {
        Self::from(&RetentionConfig::default())
    }
}

impl From<&RetentionConfig> for KeepRecent {
    fn from(cfg: &RetentionConfig) -> Self {
        Self {
            keep: cfg.keep,
            keep_fallback: cfg.keep_fallback,
        }
    }
}

impl RetentionPolicy for KeepRecent {
    fn retain(&self, history: &[StoreRecord], _catalog: &[StoreRecord]) -> BTreeSet<String> {
        // Never fewer than one, whatever the configuration says.
        let window = self.keep.max(1);
        let mut keep: BTreeSet<String> = history
            .iter()
            .take(window)
            .map(|record| record.name.clone())
            .collect();

        if self.keep_fallback {
            if let Some(previous) = history.get(1) {
                keep.insert(previous.name.clone());
            }
        }
        keep
    }
}

/// Keep every store under the prefix. Nothing is ever collected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeepAll;

impl RetentionPolicy for KeepAll {
    fn retain(&self, _history: &[StoreRecord], catalog: &[StoreRecord]) -> BTreeSet<String> {
        catalog.iter().map(|record| record.name.clone()).collect()
    }
}

/// Run `policy` and check its result.
///
/// Fails with [`RefreshError::PolicyViolation`] if the most recent history
/// entry is not retained. Names outside the catalog are discarded.
pub fn verify_retention(
    policy: &dyn RetentionPolicy,
    history: &[StoreRecord],
    catalog: &[StoreRecord],
) -> Result<BTreeSet<String>> {
    let keep = policy.retain(history, catalog);

    if let Some(current) = history.first() {
        if !keep.contains(&current.name) {
            return Err(RefreshError::PolicyViolation(format!(
                "policy would drop the current store {}",
                current.name
            )));
        }
    }

    let known: BTreeSet<&str> = catalog.iter().map(|record| record.name.as_str()).collect();
    Ok(keep
        .into_iter()
        .filter(|name| known.contains(name.as_str()))
        .collect())
}

/// Catalog members not in `keep`, in catalog order.
pub fn deletion_candidates(catalog: &[StoreRecord], keep: &BTreeSet<String>) -> Vec<String> {
    catalog
        .iter()
        .filter(|record| !keep.contains(&record.name))
        .map(|record| record.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use refresh_naming::StoreNameCodec;

    fn records(stamps: &[i64]) -> Vec<StoreRecord> {
        let codec = StoreNameCodec::new("feed_");
        stamps
            .iter()
            .map(|t| codec.record(*t, &format!("{:06x}", t % 0xffffff)))
            .collect()
    }

    fn names(records: &[StoreRecord]) -> BTreeSet<String> {
        records.iter().map(|r| r.name.clone()).collect()
    }

    #[test]
    fn test_keep_recent_window() {
        let history = records(&[1700000400, 1700000300, 1700000200, 1700000100]);
        let keep = KeepRecent::new(2).retain(&history, &history);
        assert_eq!(keep, names(&history[..2]));
    }

    #[test]
    fn test_keep_one_with_fallback_keeps_previous() {
        let history = records(&[1700000300, 1700000200, 1700000100]);
        let keep = KeepRecent::new(1).retain(&history, &history);
        assert_eq!(keep, names(&history[..2]));
    }

    #[test]
    fn test_keep_one_without_fallback_is_single_pointer() {
        let history = records(&[1700000300, 1700000200]);
        let keep = KeepRecent::new(1).without_fallback().retain(&history, &history);
        assert_eq!(keep, names(&history[..1]));
    }

    #[test]
    fn test_keep_zero_still_keeps_current() {
        let history = records(&[1700000300, 1700000200]);
        let policy = KeepRecent {
            keep: 0,
            keep_fallback: false,
        };
        let keep = verify_retention(&policy, &history, &history).unwrap();
        assert_eq!(keep, names(&history[..1]));
    }

    #[test]
    fn test_orphans_are_candidates() {
        let history = records(&[1700000300]);
        let mut catalog = records(&[1700000100, 1700000300, 1700000500]);
        catalog.sort_by(|a, b| a.name.cmp(&b.name));

        let keep = verify_retention(&KeepRecent::default(), &history, &catalog).unwrap();
        let doomed = deletion_candidates(&catalog, &keep);
        assert_eq!(doomed, vec![catalog[0].name.clone(), catalog[2].name.clone()]);
    }

    #[test]
    fn test_keep_all() {
        let catalog = records(&[1700000100, 1700000200]);
        let keep = verify_retention(&KeepAll, &[], &catalog).unwrap();
        assert!(deletion_candidates(&catalog, &keep).is_empty());
    }

    #[test]
    fn test_closure_dropping_current_is_rejected() {
        let history = records(&[1700000200, 1700000100]);
        let drop_newest = |h: &[StoreRecord], _: &[StoreRecord]| -> BTreeSet<String> {
            h.iter().skip(1).map(|r| r.name.clone()).collect()
        };

        let err = verify_retention(&drop_newest, &history, &history).unwrap_err();
        assert!(matches!(err, RefreshError::PolicyViolation(_)));
    }

    #[test]
    fn test_names_outside_catalog_are_ignored() {
        let history = records(&[1700000200]);
        let extra = |h: &[StoreRecord], _: &[StoreRecord]| -> BTreeSet<String> {
            let mut keep = names(h);
            keep.insert("someone_elses_db".to_string());
            keep
        };

        let keep = verify_retention(&extra, &history, &history).unwrap();
        assert_eq!(keep, names(&history));
    }

    #[test]
    fn test_default_policy_never_drops_current() {
        // Every prefix of a long history, with and without fallback.
        let all = records(&[
            1700000900, 1700000800, 1700000700, 1700000600, 1700000500, 1700000400,
        ]);
        for len in 0..=all.len() {
            let history = &all[..len];
            for keep in 0..=4 {
                for keep_fallback in [false, true] {
                    let policy = KeepRecent {
                        keep,
                        keep_fallback,
                    };
                    let kept = verify_retention(&policy, history, &all).unwrap();
                    if let Some(current) = history.first() {
                        assert!(kept.contains(&current.name));
                        assert!(!deletion_candidates(&all, &kept).contains(&current.name));
                    }
                }
            }
        }
    }
}
