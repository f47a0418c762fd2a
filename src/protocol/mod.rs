//! Kernel-side protocol: limits, operation tags, device struct layouts and
//! the argument buffer format.

pub mod args;
pub mod layout;

use serde::{Deserialize, Serialize};

/// Largest partition key accepted for `id0` / `id1`.
pub const REPO_ID_MAX: u32 = 1023;
/// Only supported feature length (short features), in bytes.
pub const SHORT_FEATURE_LEN: u32 = 36;
/// Largest feature count a single record may carry.
pub const FEATURE_COUNT_MAX: u32 = 10_000_000;
/// Fixed query table entry length (32 KiB).
pub const QUERY_TABLE_ENTRY_LEN: u32 = 32_768;
/// Largest number of queries in one table.
pub const QUERY_COUNT_MAX: u32 = 1024;
/// Largest `topK` a search may request.
pub const TOP_K_MAX: u32 = 4800;
/// Largest repository capacity accepted by init.
pub const CAPACITY_MAX: u64 = 600_000_000;
/// Accepted range for the 1:N top-number limit.
pub const TOP_1N_RANGE: std::ops::RangeInclusive<u32> = 2..=4800;
/// Accepted range for the N:M top-number limit.
pub const TOP_NM_RANGE: std::ops::RangeInclusive<u32> = 500..=4800;
/// Default 1:N top-number limit.
pub const TOP_1N_DEFAULT: u32 = 4800;
/// Default N:M top-number limit.
pub const TOP_NM_DEFAULT: u32 = 500;
/// Result code the host writes before the kernel has run.
pub const DEVICE_RESULT_UNSET: i32 = -2;
/// Every retrieval kernel runs on a single block.
pub const KERNEL_BLOCK_DIM: u32 = 1;

/// Search / repository mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// One source replicated across many repository slots (broadcast).
    OneToN,
    /// Many-to-many; bulk work is split into hardware-bounded batches.
    NToM,
}

impl SearchMode {
    /// Tag value as the kernel reads it.
    pub fn tag(self) -> u32 {
        match self {
            SearchMode::OneToN => 0,
            SearchMode::NToM => 1,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(SearchMode::OneToN),
            1 => Some(SearchMode::NToM),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchMode::OneToN => f.write_str("1:N"),
            SearchMode::NToM => f.write_str("N:M"),
        }
    }
}

/// Accurate operation on a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccurateKind {
    Delete,
    Modify,
}

impl AccurateKind {
    pub fn tag(self) -> u32 {
        match self {
            AccurateKind::Delete => 0,
            AccurateKind::Modify => 1,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(AccurateKind::Delete),
            1 => Some(AccurateKind::Modify),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags() {
        assert_eq!(SearchMode::OneToN.tag(), 0);
        assert_eq!(SearchMode::from_tag(1), Some(SearchMode::NToM));
        assert_eq!(SearchMode::from_tag(2), None);
        assert_eq!(AccurateKind::from_tag(AccurateKind::Modify.tag()), Some(AccurateKind::Modify));
        assert_eq!(SearchMode::NToM.to_string(), "N:M");
    }
}
