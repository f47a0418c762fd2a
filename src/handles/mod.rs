//! Caller-facing handles.
//!
//! Each handle is built by a validating `create` factory that also allocates
//! its device mirror. `destroy` frees the mirror and is safe to repeat; drop
//! does the same.

pub mod feature;
pub mod init;
pub mod range;
pub mod search;

pub use feature::FeatureRecord;
pub use init::InitParams;
pub use range::RepoRange;
pub use search::{QueryTable, SearchOutputs, SearchRequest, SearchResult};

use crate::error::{FvError, Result};

/// Reject with [`FvError::InvalidParam`] unless `ok`.
pub(crate) fn ensure(ok: bool, param: &'static str, reason: impl FnOnce() -> String) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(FvError::invalid(param, reason()))
    }
}

/// Address of a host buffer as the kernel sees it.
pub(crate) fn host_addr<T>(buf: &[T]) -> u64 {
    buf.as_ptr() as u64
}
