//! Device-runtime seam.
//!
//! The offload protocol never talks to hardware directly. Streams, events,
//! device memory, copies and kernel launches all go through [`DeviceRuntime`],
//! which a vendor binding implements. [`sim::SimRuntime`] is an in-process
//! implementation used by the tests and the CLI.

pub mod sim;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DevicePtr(pub u64);

impl DevicePtr {
    pub fn addr(self) -> u64 {
        self.0
    }
}

/// Opaque stream handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamHandle(pub u64);

/// Opaque event handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventHandle(pub u64);

/// Opaque context handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Where the calling process lives relative to the accelerator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Host-resident process; host structs live in host memory.
    Host,
    /// Device-resident process; host structs already live in device memory.
    Device,
}

impl RunMode {
    /// Copy kind for pushing a host struct into its device mirror.
    pub fn copy_in_kind(self) -> MemcpyKind {
        match self {
            RunMode::Host => MemcpyKind::HostToDevice,
            RunMode::Device => MemcpyKind::DeviceToDevice,
        }
    }

    /// Copy kind for pulling a device mirror back into its host struct.
    pub fn copy_out_kind(self) -> MemcpyKind {
        match self {
            RunMode::Host => MemcpyKind::DeviceToHost,
            RunMode::Device => MemcpyKind::DeviceToDevice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MemcpyKind {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Failure reported by a device-runtime primitive.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} returned {code}")]
pub struct RuntimeError {
    /// Name of the runtime call that failed.
    pub op: &'static str,
    /// Raw runtime status code.
    pub code: i32,
}

impl RuntimeError {
    pub fn new(op: &'static str, code: i32) -> Self {
        Self { op, code }
    }
}

pub type RtResult<T> = std::result::Result<T, RuntimeError>;

/// One CPU-kernel launch request.
#[derive(Debug, Clone, Copy)]
pub struct KernelLaunch<'a> {
    pub library: &'a str,
    pub kernel: &'a str,
    pub block_dim: u32,
    pub args: &'a [u8],
}

/// Device runtime and kernel launch facility.
///
/// Enqueue operations (`memcpy_async`, `launch_cpu_kernel`, `reset_event`)
/// return as soon as the work is queued on the stream. Their effects are only
/// guaranteed visible after `stream_wait_event` on a signal the kernel
/// records, or after `synchronize_stream`.
pub trait DeviceRuntime: Send + Sync {
    fn create_stream(&self) -> RtResult<StreamHandle>;
    fn destroy_stream(&self, stream: StreamHandle) -> RtResult<()>;
    /// Block until all work queued on `stream` has completed.
    fn synchronize_stream(&self, stream: StreamHandle) -> RtResult<()>;

    fn create_event(&self) -> RtResult<EventHandle>;
    /// Numeric id the device side uses to record `event`.
    fn event_id(&self, event: EventHandle) -> RtResult<u32>;
    /// Re-arm `event` on `stream` so it can be recorded again.
    fn reset_event(&self, event: EventHandle, stream: StreamHandle) -> RtResult<()>;
    /// Block `stream` until `event` has been recorded. No timeout.
    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> RtResult<()>;
    fn destroy_event(&self, event: EventHandle) -> RtResult<()>;

    fn malloc(&self, size: usize) -> RtResult<DevicePtr>;
    fn free(&self, ptr: DevicePtr) -> RtResult<()>;

    /// Queue a copy of `src` into device memory at `dst`. The source bytes are
    /// captured at enqueue time.
    fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: &[u8],
        kind: MemcpyKind,
        stream: StreamHandle,
    ) -> RtResult<()>;

    /// Synchronously copy `dst.len()` bytes from device memory at `src`.
    fn memcpy(&self, dst: &mut [u8], src: DevicePtr, kind: MemcpyKind) -> RtResult<()>;

    fn run_mode(&self) -> RtResult<RunMode>;

    fn launch_cpu_kernel(&self, launch: &KernelLaunch<'_>, stream: StreamHandle) -> RtResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_kinds_follow_run_mode() {
        assert_eq!(RunMode::Host.copy_in_kind(), MemcpyKind::HostToDevice);
        assert_eq!(RunMode::Host.copy_out_kind(), MemcpyKind::DeviceToHost);
        assert_eq!(RunMode::Device.copy_in_kind(), MemcpyKind::DeviceToDevice);
        assert_eq!(RunMode::Device.copy_out_kind(), MemcpyKind::DeviceToDevice);
    }

    #[test]
    fn test_run_mode_serde() {
        let mode: RunMode = serde_json::from_str("\"device\"").unwrap();
        assert_eq!(mode, RunMode::Device);
        assert_eq!(serde_json::to_string(&RunMode::Host).unwrap(), "\"host\"");
    }
}
