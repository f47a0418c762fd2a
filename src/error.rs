//! Error taxonomy for the feature-vector offload protocol.
//!
//! Every public call returns [`Result`]; nothing panics across the crate
//! boundary. Host-side validation failures are always reported before any
//! device interaction happens.

use thiserror::Error;

use crate::runtime::RuntimeError;

/// Result type for offload operations.
pub type Result<T> = std::result::Result<T, FvError>;

/// Numeric code for a rejected parameter.
pub const CODE_INVALID_PARAM: i32 = 100_000;
/// Numeric code for exhausted device memory.
pub const CODE_BAD_ALLOC: i32 = 200_000;
/// Numeric code for a kernel that ran and reported failure.
pub const CODE_FAILURE: i32 = 500_000;
/// Numeric code for a failed device-runtime primitive.
pub const CODE_RT_FAILURE: i32 = 507_000;

#[derive(Debug, Error)]
pub enum FvError {
    /// Host-side validation rejected an argument.
    #[error("invalid parameter {param}: {reason}")]
    InvalidParam { param: &'static str, reason: String },

    /// Device memory could not be allocated.
    #[error("failed to allocate {bytes} bytes of device memory: {source}")]
    AllocationFailure {
        bytes: usize,
        #[source]
        source: RuntimeError,
    },

    /// An event or stream primitive failed.
    #[error("{what} failed: {source}")]
    SyncFailure {
        what: &'static str,
        #[source]
        source: RuntimeError,
    },

    /// The kernel launch facility rejected the enqueue.
    #[error("launch of kernel {kernel} rejected: {source}")]
    LaunchFailure {
        kernel: String,
        #[source]
        source: RuntimeError,
    },

    /// The kernel ran and wrote a nonzero result code.
    #[error("{operation} failed on device with result {device_result}")]
    OperationFailure {
        operation: &'static str,
        device_result: i32,
    },

    /// A host/device copy failed.
    #[error("{direction} copy of {bytes} bytes failed: {source}")]
    CopyFailure {
        direction: &'static str,
        bytes: usize,
        #[source]
        source: RuntimeError,
    },

    /// An argument buffer write ran past its precomputed capacity.
    #[error("argument buffer overflow: need {needed} bytes, capacity {capacity}")]
    ArgsOverflow { needed: usize, capacity: usize },
}

impl FvError {
    /// Build an [`FvError::InvalidParam`] and report it through the input
    /// error channel.
    pub fn invalid(param: &'static str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        crate::logging::report_input_error(
            crate::logging::INPUT_ERROR_BAD_PARAM,
            &[("param", param), ("reason", reason.as_str())],
        );
        FvError::InvalidParam { param, reason }
    }

    /// Stable numeric code, matching the codes of the C-level API.
    pub fn code(&self) -> i32 {
        match self {
            FvError::InvalidParam { .. } => CODE_INVALID_PARAM,
            FvError::AllocationFailure { .. } => CODE_BAD_ALLOC,
            FvError::OperationFailure { .. } => CODE_FAILURE,
            FvError::SyncFailure { .. }
            | FvError::LaunchFailure { .. }
            | FvError::CopyFailure { .. }
            | FvError::ArgsOverflow { .. } => CODE_RT_FAILURE,
        }
    }

    pub fn is_invalid_param(&self) -> bool {
        matches!(self, FvError::InvalidParam { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        let rt = RuntimeError::new("rtMalloc", 207001);
        assert_eq!(FvError::invalid("topK", "too large").code(), CODE_INVALID_PARAM);
        assert_eq!(
            FvError::AllocationFailure { bytes: 36, source: rt.clone() }.code(),
            CODE_BAD_ALLOC
        );
        assert_eq!(
            FvError::OperationFailure { operation: "search", device_result: 3 }.code(),
            CODE_FAILURE
        );
        assert_eq!(
            FvError::LaunchFailure { kernel: "k".into(), source: rt }.code(),
            CODE_RT_FAILURE
        );
        assert_eq!(FvError::ArgsOverflow { needed: 40, capacity: 36 }.code(), CODE_RT_FAILURE);
    }

    #[test]
    fn test_display_includes_context() {
        let err = FvError::OperationFailure { operation: "repo add", device_result: -7 };
        assert_eq!(err.to_string(), "repo add failed on device with result -7");
        assert!(FvError::invalid("id0", "out of range").is_invalid_param());
    }
}
