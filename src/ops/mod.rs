//! Public repository operations.
//!
//! Every operation runs the same pipeline on a fresh stream:
//! validate, create the completion signal, copy the mirrors in once, then
//! per batch marshal the arguments, launch and wait; finally synchronize,
//! copy the result mirror out once and check the device result code.
//!
//! Batches share the result mirror, so a failure code written by any batch
//! is what the host reads back.
//!
//! Validation never touches the device. Any later failure aborts the call;
//! the stream, signal and ephemeral buffers are released on the way out.
//! Batches already applied before a failure are not rolled back.

mod lifecycle;
mod repo;
mod search;

use std::sync::Arc;

use tracing::error;

use crate::batch::Batch;
use crate::config::{BatchingConfig, KernelConfig, OffloadConfig};
use crate::device::{CompletionSignal, KernelInvoker, Stream};
use crate::error::{FvError, Result};
use crate::runtime::{DeviceRuntime, RunMode};

/// Entry point for repository operations against one device runtime.
pub struct FvRepository {
    runtime: Arc<dyn DeviceRuntime>,
    invoker: KernelInvoker,
    kernels: KernelConfig,
    batching: BatchingConfig,
}

impl FvRepository {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self::with_config(runtime, &OffloadConfig::default())
    }

    pub fn with_config(runtime: Arc<dyn DeviceRuntime>, config: &OffloadConfig) -> Self {
        Self {
            runtime,
            invoker: KernelInvoker::new(config.kernels.library.clone()),
            kernels: config.kernels.clone(),
            batching: config.batching.clone(),
        }
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    pub fn batching(&self) -> &BatchingConfig {
        &self.batching
    }

    fn run_mode(&self) -> Result<RunMode> {
        self.runtime.run_mode().map_err(|source| {
            error!(error = %source, "get run mode failed");
            FvError::SyncFailure {
                what: "run mode query",
                source,
            }
        })
    }

    /// Stream and completion signal for one signalled call.
    fn open_call(&self) -> Result<SignalledCall<'_>> {
        let run_mode = self.run_mode()?;
        let stream = Stream::create(&*self.runtime)?;
        let signal = CompletionSignal::create(&stream)?;
        Ok(SignalledCall {
            signal,
            stream,
            run_mode,
        })
    }
}

impl std::fmt::Debug for FvRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FvRepository")
            .field("library", &self.invoker.library())
            .field("batching", &self.batching)
            .finish()
    }
}

/// Per-call device resources. The signal is destroyed before the stream.
struct SignalledCall<'rt> {
    signal: CompletionSignal<'rt>,
    stream: Stream<'rt>,
    run_mode: RunMode,
}

/// Kernel-side `(count, offset)` scalars of one batch.
fn batch_scalars(batch: &Batch) -> Result<(u32, u32)> {
    match (u32::try_from(batch.count), u32::try_from(batch.offset)) {
        (Ok(count), Ok(offset)) => Ok((count, offset)),
        _ => Err(FvError::invalid(
            "batch",
            format!(
                "count {} at offset {} does not fit a u32 kernel scalar",
                batch.count, batch.offset
            ),
        )),
    }
}

/// Map a device result code to the call outcome.
fn check_device_result(operation: &'static str, ret: i32) -> Result<()> {
    if ret != 0 {
        error!(operation, device_result = ret, "device reported failure");
        return Err(FvError::OperationFailure {
            operation,
            device_result: ret,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_scalars_fit() {
        let b = Batch {
            offset: 2_000_000,
            count: 500_000,
        };
        assert_eq!(batch_scalars(&b).unwrap(), (500_000, 2_000_000));
    }

    #[test]
    fn test_batch_scalars_out_of_range() {
        let b = Batch {
            offset: u64::from(u32::MAX) + 1,
            count: 1,
        };
        assert!(batch_scalars(&b).unwrap_err().is_invalid_param());
        let b = Batch {
            offset: 0,
            count: u64::from(u32::MAX) + 7,
        };
        assert!(batch_scalars(&b).unwrap_err().is_invalid_param());
    }
}
