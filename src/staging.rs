//! Process-wide registry of per-stream staging memory.
//!
//! Execution paths that need scratch device memory per stream share a
//! grow-only [`StagingAllocator`] keyed by stream, or by context when no
//! stream is given. The registry is created on first access to
//! [`StagingRegistry::global`] and entries live until [`StagingRegistry::remove`].
//!
//! The registry lock only guards the map. Each allocator has its own lock,
//! and neither is ever held across a kernel call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};

use tracing::{debug, error, info};

use crate::error::{FvError, Result};
use crate::runtime::{ContextHandle, DevicePtr, DeviceRuntime, StreamHandle};

/// Registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StagingKey {
    Stream(StreamHandle),
    Context(ContextHandle),
}

impl StagingKey {
    /// A present stream wins over the context.
    pub fn resolve(context: ContextHandle, stream: Option<StreamHandle>) -> Self {
        match stream {
            Some(stream) => StagingKey::Stream(stream),
            None => StagingKey::Context(context),
        }
    }
}

#[derive(Debug, Default)]
struct Buffers {
    current: Option<(DevicePtr, usize)>,
    pending: Vec<DevicePtr>,
}

/// Grow-only scratch buffer for one key.
///
/// Outgrown buffers are parked as pending because work already queued may
/// still read them; callers free them with [`StagingAllocator::release_pending`]
/// once their stream is synchronized.
pub struct StagingAllocator {
    runtime: Arc<dyn DeviceRuntime>,
    buffers: Mutex<Buffers>,
}

impl StagingAllocator {
    fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            buffers: Mutex::new(Buffers::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A device buffer of at least `size` bytes.
    pub fn workspace(&self, size: usize) -> Result<DevicePtr> {
        let mut buffers = self.lock();
        if let Some((ptr, len)) = buffers.current {
            if len >= size {
                return Ok(ptr);
            }
        }
        let ptr = self.runtime.malloc(size).map_err(|source| {
            error!(bytes = size, error = %source, "staging malloc failed");
            FvError::AllocationFailure { bytes: size, source }
        })?;
        if let Some((old, _)) = buffers.current.replace((ptr, size)) {
            buffers.pending.push(old);
        }
        debug!(addr = ptr.addr(), bytes = size, "staging buffer grown");
        Ok(ptr)
    }

    pub fn current_size(&self) -> usize {
        self.lock().current.map_or(0, |(_, len)| len)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Free every outgrown buffer.
    pub fn release_pending(&self) {
        let pending = std::mem::take(&mut self.lock().pending);
        for ptr in pending {
            self.free(ptr);
        }
    }

    fn release_all(&self) {
        let (current, pending) = {
            let mut buffers = self.lock();
            (buffers.current.take(), std::mem::take(&mut buffers.pending))
        };
        for ptr in pending.into_iter().chain(current.map(|(ptr, _)| ptr)) {
            self.free(ptr);
        }
    }

    fn free(&self, ptr: DevicePtr) {
        if let Err(e) = self.runtime.free(ptr) {
            error!(addr = ptr.addr(), error = %e, "free staging memory failed");
        }
    }
}

impl Drop for StagingAllocator {
    fn drop(&mut self) {
        self.release_all();
    }
}

/// Map from [`StagingKey`] to its allocator.
#[derive(Default)]
pub struct StagingRegistry {
    allocators: Mutex<HashMap<StagingKey, Arc<StagingAllocator>>>,
}

static GLOBAL: OnceLock<StagingRegistry> = OnceLock::new();

impl StagingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry, created on first call.
    pub fn global() -> &'static StagingRegistry {
        GLOBAL.get_or_init(|| {
            info!("staging registry initialized");
            StagingRegistry::new()
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<StagingKey, Arc<StagingAllocator>>> {
        self.allocators.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get_or_create(
        &self,
        key: StagingKey,
        runtime: &Arc<dyn DeviceRuntime>,
    ) -> Arc<StagingAllocator> {
        let mut map = self.lock();
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(StagingAllocator::new(Arc::clone(runtime)))),
        )
    }

    pub fn get(&self, key: StagingKey) -> Option<Arc<StagingAllocator>> {
        self.lock().get(&key).cloned()
    }

    /// Drop the entry for `key` and free its memory. Returns whether an entry
    /// existed.
    pub fn remove(&self, key: StagingKey) -> bool {
        let removed = self.lock().remove(&key);
        match removed {
            Some(allocator) => {
                allocator.release_all();
                debug!(?key, "staging allocator removed");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sim::SimRuntime;

    fn rt() -> (Arc<SimRuntime>, Arc<dyn DeviceRuntime>) {
        let sim = Arc::new(SimRuntime::new());
        let rt: Arc<dyn DeviceRuntime> = sim.clone();
        (sim, rt)
    }

    #[test]
    fn test_key_prefers_stream() {
        let ctx = ContextHandle(1);
        assert_eq!(
            StagingKey::resolve(ctx, Some(StreamHandle(9))),
            StagingKey::Stream(StreamHandle(9))
        );
        assert_eq!(StagingKey::resolve(ctx, None), StagingKey::Context(ctx));
    }

    #[test]
    fn test_workspace_grows_and_parks_old_buffer() {
        let (sim, rt) = rt();
        let registry = StagingRegistry::new();
        let alloc = registry.get_or_create(StagingKey::Context(ContextHandle(1)), &rt);

        let a = alloc.workspace(128).unwrap();
        assert_eq!(alloc.workspace(64).unwrap(), a);
        let b = alloc.workspace(256).unwrap();
        assert_ne!(a, b);
        assert_eq!(alloc.current_size(), 256);
        assert_eq!(alloc.pending_count(), 1);

        alloc.release_pending();
        assert_eq!(alloc.pending_count(), 0);
        assert_eq!(sim.stats().live_allocations, 1);
    }

    #[test]
    fn test_same_key_same_allocator() {
        let (_sim, rt) = rt();
        let registry = StagingRegistry::new();
        let key = StagingKey::Stream(StreamHandle(4));
        let a = registry.get_or_create(key, &rt);
        let b = registry.get_or_create(key, &rt);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_frees_everything() {
        let (sim, rt) = rt();
        let registry = StagingRegistry::new();
        let key = StagingKey::Stream(StreamHandle(2));
        let alloc = registry.get_or_create(key, &rt);
        alloc.workspace(16).unwrap();
        alloc.workspace(32).unwrap();
        drop(alloc);

        assert!(registry.remove(key));
        assert!(!registry.remove(key));
        assert!(registry.is_empty());
        assert_eq!(sim.stats().live_allocations, 0);
    }

    #[test]
    fn test_global_is_shared() {
        let a = StagingRegistry::global() as *const StagingRegistry;
        let b = StagingRegistry::global() as *const StagingRegistry;
        assert_eq!(a, b);
    }
}
