//! Retention policy properties
//!
//! Exhaustive small cases: for every history length, window size and
//! fallback setting, with orphans and foreign names in the catalog, the
//! most recent import is never a deletion candidate.

use std::collections::BTreeSet;

use feed_refresh::retention::{deletion_candidates, verify_retention};
use feed_refresh::{KeepRecent, RefreshError, RetentionPolicy, StoreNameCodec, StoreRecord};

const T0: i64 = 1_700_000_000;

fn history(len: usize) -> Vec<StoreRecord> {
    let codec = StoreNameCodec::new("feed_");
    (0..len)
        .map(|i| codec.record(T0 - (i as i64) * 100, &format!("{:06x}", 0xa00000 + i)))
        .collect()
}

/// History stores plus two orphans, ascending by name.
fn catalog_for(history: &[StoreRecord]) -> Vec<StoreRecord> {
    let codec = StoreNameCodec::new("feed_");
    let mut catalog: Vec<StoreRecord> = history.to_vec();
    catalog.push(codec.record(T0 + 50, "0f0f0f"));
    catalog.push(codec.record(T0 - 10_000, "f0f0f0"));
    catalog.sort_by(|a, b| a.name.cmp(&b.name));
    catalog
}

#[test]
fn test_current_import_is_never_deleted() {
    for len in 0..6 {
        let history = history(len);
        let catalog = catalog_for(&history);

        for keep in 1..5 {
            for keep_fallback in [false, true] {
                let policy = KeepRecent {
                    keep,
                    keep_fallback,
                };
                let kept = verify_retention(&policy, &history, &catalog).unwrap();
                let doomed = deletion_candidates(&catalog, &kept);

                if let Some(current) = history.first() {
                    assert!(
                        !doomed.contains(&current.name),
                        "keep={keep} fallback={keep_fallback} len={len} would drop {}",
                        current.name
                    );
                }
                if keep_fallback {
                    if let Some(previous) = history.get(1) {
                        assert!(!doomed.contains(&previous.name));
                    }
                }
                // Orphans are always collected.
                assert!(doomed.iter().any(|name| name.ends_with("_0f0f0f")));
                assert!(doomed.iter().any(|name| name.ends_with("_f0f0f0")));
                assert_eq!(kept.len() + doomed.len(), catalog.len());
            }
        }
    }
}

#[test]
fn test_window_size() {
    let history = history(5);
    let catalog = catalog_for(&history);

    let kept = verify_retention(&KeepRecent::new(3), &history, &catalog).unwrap();
    let expected: BTreeSet<String> = history[..3].iter().map(|r| r.name.clone()).collect();
    assert_eq!(kept, expected);
}

struct DropEverything;

impl RetentionPolicy for DropEverything {
    fn retain(&self, _: &[StoreRecord], _: &[StoreRecord]) -> BTreeSet<String> {
        BTreeSet::new()
    }
}

#[test]
fn test_faulty_policy_is_rejected_only_with_history() {
    let catalog = catalog_for(&[]);
    let kept = verify_retention(&DropEverything, &[], &catalog).unwrap();
    assert!(kept.is_empty());

    let history = history(1);
    let catalog = catalog_for(&history);
    let err = verify_retention(&DropEverything, &history, &catalog).unwrap_err();
    assert!(matches!(err, RefreshError::PolicyViolation(_)));
}
