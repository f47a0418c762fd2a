use tracing::{debug, error};

use super::signal::CompletionSignal;
use super::stream::Stream;
use crate::error::{FvError, Result};
use crate::protocol::args::KernelArgs;
use crate::protocol::KERNEL_BLOCK_DIM;
use crate::runtime::KernelLaunch;

/// Launches named kernels from one kernel library.
///
/// [`KernelInvoker::invoke`] only enqueues; completion is observed separately
/// through a [`CompletionSignal`] so batched callers can reuse one signal.
#[derive(Debug, Clone)]
pub struct KernelInvoker {
    library: String,
}

impl KernelInvoker {
    pub fn new(library: impl Into<String>) -> Self {
        Self {
            library: library.into(),
        }
    }

    pub fn library(&self) -> &str {
        &self.library
    }

    /// Enqueue `kernel` with `args` on `stream`. A rejected enqueue fails
    /// immediately.
    pub fn invoke(&self, kernel: &str, args: &KernelArgs, stream: &Stream<'_>) -> Result<()> {
        let launch = KernelLaunch {
            library: &self.library,
            kernel,
            block_dim: KERNEL_BLOCK_DIM,
            args: args.as_bytes(),
        };
        debug!(kernel, args_len = args.len(), "cpu kernel launch begin");
        stream
            .runtime()
            .launch_cpu_kernel(&launch, stream.handle())
            .map_err(|source| {
                error!(kernel, error = %source, "cpu kernel launch failed");
                FvError::LaunchFailure {
                    kernel: kernel.to_string(),
                    source,
                }
            })
    }

    /// Enqueue, then block on `signal` until the kernel reports completion.
    pub fn invoke_and_wait(
        &self,
        kernel: &str,
        args: &KernelArgs,
        stream: &Stream<'_>,
        signal: &CompletionSignal<'_>,
    ) -> Result<()> {
        self.invoke(kernel, args, stream)?;
        signal.wait(stream)
    }
}
