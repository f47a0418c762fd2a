//! Batch planning for bulk operations.
//!
//! Planning is pure: the orchestrators walk the returned plan and perform
//! one invocation per batch.

use serde::Serialize;

use crate::protocol::SearchMode;

/// Most features a single N:M repository-add invocation may carry.
pub const REPO_ADD_BATCH_MAX: u64 = 1_000_000;
/// Most queries a single N:M search invocation may carry.
pub const SEARCH_BATCH_MAX: u64 = 6;

/// One hardware-bounded slice of a bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Batch {
    /// Items already covered by earlier batches.
    pub offset: u64,
    /// Items in this batch.
    pub count: u64,
}

/// Split `total` items into consecutive batches of at most `max` items.
///
/// Counts sum to `total`, every count is `<= max`, and there are
/// `ceil(total / max)` batches. `total == 0` yields no batches. A `max` of 0
/// is treated as 1.
pub fn split(total: u64, max: u64) -> Vec<Batch> {
    let max = max.max(1);
    let mut batches = Vec::with_capacity(total.div_ceil(max) as usize);
    let mut offset = 0;
    while offset < total {
        let count = (total - offset).min(max);
        batches.push(Batch { offset, count });
        offset += count;
    }
    batches
}

/// A broadcast is always exactly one batch; the kernel replicates internally.
pub fn broadcast(total: u64) -> Vec<Batch> {
    vec![Batch { offset: 0, count: total }]
}

/// Batch plan for an operation in `mode`.
pub fn plan(mode: SearchMode, total: u64, max: u64) -> Vec<Batch> {
    match mode {
        SearchMode::OneToN => broadcast(total),
        SearchMode::NToM => split(total, max),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_example() {
        assert_eq!(
            split(2_500_000, REPO_ADD_BATCH_MAX),
            vec![
                Batch { offset: 0, count: 1_000_000 },
                Batch { offset: 1_000_000, count: 1_000_000 },
                Batch { offset: 2_000_000, count: 500_000 },
            ]
        );
    }

    #[test]
    fn test_split_empty() {
        assert!(split(0, 6).is_empty());
        assert!(split(0, 1).is_empty());
    }

    #[test]
    fn test_split_properties() {
        for total in [1u64, 5, 6, 7, 12, 13, 1200, 1024, 999_999, 1_000_001] {
            for max in [1u64, 2, 6, 7, 1000, 1_000_000] {
                let batches = split(total, max);
                assert_eq!(batches.len() as u64, total.div_ceil(max), "total={total} max={max}");
                assert_eq!(batches.iter().map(|b| b.count).sum::<u64>(), total);
                assert!(batches.iter().all(|b| b.count >= 1 && b.count <= max));
                let mut expected = 0;
                for b in &batches {
                    assert_eq!(b.offset, expected);
                    expected += b.count;
                }
            }
        }
    }

    #[test]
    fn test_search_batches() {
        let batches = split(1200, SEARCH_BATCH_MAX);
        assert_eq!(batches.len(), 200);
        assert_eq!(batches.last(), Some(&Batch { offset: 1194, count: 6 }));
    }

    #[test]
    fn test_broadcast_ignores_count() {
        assert_eq!(plan(SearchMode::OneToN, 5_000_000, REPO_ADD_BATCH_MAX).len(), 1);
        assert_eq!(plan(SearchMode::OneToN, 0, 6), vec![Batch { offset: 0, count: 0 }]);
        assert_eq!(plan(SearchMode::NToM, 13, 6).len(), 3);
    }

    #[test]
    fn test_zero_max_treated_as_one() {
        assert_eq!(split(3, 0).len(), 3);
    }
}
