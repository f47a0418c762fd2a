//! Device-resident mirrors of host structs.
//!
//! A [`DeviceMirror`] exclusively owns one device allocation of exactly
//! `T::SIZE` bytes. It is freed once, either by [`DeviceMirror::destroy`] or
//! on drop, and never aliased by another handle.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, error};

use super::stream::Stream;
use crate::error::{FvError, Result};
use crate::protocol::layout::DeviceLayout;
use crate::runtime::{DevicePtr, DeviceRuntime, RunMode};

pub struct DeviceMirror<T: DeviceLayout> {
    runtime: Arc<dyn DeviceRuntime>,
    ptr: Option<DevicePtr>,
    len: usize,
    _layout: PhantomData<fn() -> T>,
}

impl<T: DeviceLayout> DeviceMirror<T> {
    /// Allocate a device buffer of `T::SIZE` bytes.
    pub fn create(runtime: &Arc<dyn DeviceRuntime>) -> Result<Self> {
        let ptr = runtime.malloc(T::SIZE).map_err(|source| {
            error!(layout = T::NAME, bytes = T::SIZE, error = %source, "device malloc failed");
            FvError::AllocationFailure {
                bytes: T::SIZE,
                source,
            }
        })?;
        debug!(layout = T::NAME, addr = ptr.addr(), bytes = T::SIZE, "device mirror allocated");
        Ok(Self {
            runtime: Arc::clone(runtime),
            ptr: Some(ptr),
            len: T::SIZE,
            _layout: PhantomData,
        })
    }

    pub fn ptr(&self) -> Option<DevicePtr> {
        self.ptr
    }

    /// Device byte length; 0 once destroyed.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_destroyed(&self) -> bool {
        self.ptr.is_none()
    }

    /// Device address after confirming the mirror still matches its host
    /// struct size.
    pub fn checked_ptr(&self, param: &'static str) -> Result<DevicePtr> {
        let ptr = self
            .ptr
            .ok_or_else(|| FvError::invalid(param, "device buffer is null"))?;
        if self.len != T::SIZE {
            error!(
                host = T::SIZE,
                device = self.len,
                "memory size between host and device not equal"
            );
            return Err(FvError::invalid(
                param,
                format!("host size {} and device size {} not equal", T::SIZE, self.len),
            ));
        }
        Ok(ptr)
    }

    /// Queue a copy of `host` into the mirror. Complete after the next wait
    /// or synchronize on `stream`.
    pub fn copy_in(&self, host: &T, mode: RunMode, stream: &Stream<'_>) -> Result<()> {
        let ptr = self.checked_ptr(T::NAME)?;
        let kind = mode.copy_in_kind();
        stream
            .runtime()
            .memcpy_async(ptr, &host.to_bytes(), kind, stream.handle())
            .map_err(|source| {
                error!(layout = T::NAME, ?kind, error = %source, "memcpy between host and device failed");
                FvError::CopyFailure {
                    direction: "copy-in",
                    bytes: T::SIZE,
                    source,
                }
            })
    }

    /// Read the mirror back. Callers synchronize the stream first.
    pub fn copy_out(&self, mode: RunMode) -> Result<T> {
        let ptr = self.checked_ptr(T::NAME)?;
        let kind = mode.copy_out_kind();
        let mut host = vec![0u8; T::SIZE];
        self.runtime.memcpy(&mut host, ptr, kind).map_err(|source| {
            error!(layout = T::NAME, ?kind, error = %source, "memcpy between device and host failed");
            FvError::CopyFailure {
                direction: "copy-out",
                bytes: T::SIZE,
                source,
            }
        })?;
        T::decode(&host)
    }

    /// Free the device buffer. A second call is a no-op.
    pub fn destroy(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            if let Err(e) = self.runtime.free(ptr) {
                error!(layout = T::NAME, addr = ptr.addr(), error = %e, "free device mem failed");
            }
            self.len = 0;
        }
    }
}

impl<T: DeviceLayout> Drop for DeviceMirror<T> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<T: DeviceLayout> std::fmt::Debug for DeviceMirror<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceMirror")
            .field("layout", &T::NAME)
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::layout::RawRepoRange;
    use crate::runtime::sim::SimRuntime;

    fn runtime() -> (Arc<SimRuntime>, Arc<dyn DeviceRuntime>) {
        let sim = Arc::new(SimRuntime::new());
        let rt: Arc<dyn DeviceRuntime> = sim.clone();
        (sim, rt)
    }

    #[test]
    fn test_double_destroy_is_safe() {
        let (sim, rt) = runtime();
        let mut mirror = DeviceMirror::<RawRepoRange>::create(&rt).unwrap();
        assert_eq!(mirror.len(), RawRepoRange::SIZE);
        mirror.destroy();
        mirror.destroy();
        drop(mirror);
        let stats = sim.stats();
        assert_eq!(stats.mallocs, 1);
        assert_eq!(stats.frees, 1);
        assert_eq!(stats.live_allocations, 0);
    }

    #[test]
    fn test_destroyed_mirror_rejected() {
        let (_sim, rt) = runtime();
        let mut mirror = DeviceMirror::<RawRepoRange>::create(&rt).unwrap();
        mirror.destroy();
        assert!(mirror.checked_ptr("repoRange").unwrap_err().is_invalid_param());
    }

    #[test]
    fn test_copy_in_then_out() {
        let (_sim, rt) = runtime();
        let mirror = DeviceMirror::<RawRepoRange>::create(&rt).unwrap();
        let stream = Stream::create(&*rt).unwrap();
        let host = RawRepoRange { id0_min: 1, id0_max: 2, id1_min: 3, id1_max: 4, ret: -2 };
        mirror.copy_in(&host, RunMode::Host, &stream).unwrap();
        stream.synchronize().unwrap();
        assert_eq!(mirror.copy_out(RunMode::Host).unwrap(), host);
    }

    #[test]
    fn test_allocation_failure_maps() {
        let (sim, rt) = runtime();
        sim.fail_malloc_at(1);
        let err = DeviceMirror::<RawRepoRange>::create(&rt).unwrap_err();
        assert!(matches!(err, FvError::AllocationFailure { bytes: 20, .. }));
    }
}
