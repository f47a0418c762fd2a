use tracing::{debug, error};

use crate::error::{FvError, Result};
use crate::runtime::{DeviceRuntime, StreamHandle};

/// A stream owned by one orchestrator call. Destroyed on drop.
pub struct Stream<'rt> {
    runtime: &'rt dyn DeviceRuntime,
    handle: StreamHandle,
}

impl<'rt> Stream<'rt> {
    pub fn create(runtime: &'rt dyn DeviceRuntime) -> Result<Self> {
        let handle = runtime.create_stream().map_err(|source| {
            error!(error = %source, "stream create failed");
            FvError::SyncFailure {
                what: "stream create",
                source,
            }
        })?;
        debug!(stream = handle.0, "stream created");
        Ok(Self { runtime, handle })
    }

    pub fn handle(&self) -> StreamHandle {
        self.handle
    }

    pub fn runtime(&self) -> &'rt dyn DeviceRuntime {
        self.runtime
    }

    /// Block until everything queued on this stream has completed.
    pub fn synchronize(&self) -> Result<()> {
        self.runtime.synchronize_stream(self.handle).map_err(|source| {
            error!(stream = self.handle.0, error = %source, "stream synchronize failed");
            FvError::SyncFailure {
                what: "stream synchronize",
                source,
            }
        })
    }
}

impl Drop for Stream<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.runtime.destroy_stream(self.handle) {
            error!(stream = self.handle.0, error = %e, "stream destroy failed");
        }
    }
}
