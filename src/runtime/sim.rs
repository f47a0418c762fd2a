//! In-process simulated accelerator.
//!
//! Every runtime call completes immediately and is appended to an ordered
//! journal, so tests can assert exactly which device operations a call
//! performed and in what order. Launching one of the retrieval kernels runs a
//! small simulated kernel that decodes its argument buffer, applies the
//! operation to an in-memory repository model, records the completion signal
//! and writes a result code into the mirror.
//!
//! Faults can be injected on the N-th call (1-based) of most primitives.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, trace};

use super::{
    DevicePtr, DeviceRuntime, EventHandle, KernelLaunch, MemcpyKind, RtResult, RunMode,
    RuntimeError, StreamHandle,
};
use crate::config::KernelConfig;
use crate::protocol::args::ArgsView;
use crate::protocol::layout::{
    DeviceLayout, RawFeatureInfo, RawInitPara, RawRepoRange, RawSearchInput, RawSearchResult,
};
use crate::protocol::{AccurateKind, DEVICE_RESULT_UNSET};

/// Status returned for an injected fault.
pub const SIM_ERR_INJECTED: i32 = 507_899;
/// Status for an access outside any live allocation.
pub const SIM_ERR_BAD_ADDRESS: i32 = 507_011;
/// Status for a wait on an event no kernel will ever record.
pub const SIM_ERR_WOULD_HANG: i32 = 507_013;
/// Status for a launch naming an unknown library or kernel.
pub const SIM_ERR_UNKNOWN_KERNEL: i32 = 507_015;
/// Status for an unknown stream or event handle.
pub const SIM_ERR_BAD_HANDLE: i32 = 507_017;

/// Base of the synthetic device address space.
const DEVICE_ADDR_BASE: u64 = 0x1000_0000;
/// Allocation alignment.
const DEVICE_ADDR_ALIGN: u64 = 64;

/// One journaled runtime call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SimOp {
    Malloc { addr: u64, size: usize },
    Free { addr: u64 },
    CreateStream { stream: u64 },
    DestroyStream { stream: u64 },
    Synchronize { stream: u64 },
    CreateEvent { id: u32 },
    ResetEvent { id: u32 },
    WaitEvent { id: u32 },
    DestroyEvent { id: u32 },
    CopyIn { addr: u64, len: usize, kind: MemcpyKind },
    CopyOut { addr: u64, len: usize, kind: MemcpyKind },
    Launch { kernel: String, scalars: Vec<u32> },
}

/// Call counters. Failed attempts are counted too.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub mallocs: u64,
    pub frees: u64,
    pub live_allocations: usize,
    pub copies_in: u64,
    pub copies_out: u64,
    pub launches: u64,
    pub waits: u64,
    pub events_created: u64,
    pub events_destroyed: u64,
    pub streams_created: u64,
    pub streams_destroyed: u64,
}

/// A decoded kernel launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaunchRecord {
    pub library: String,
    pub kernel: String,
    pub block_dim: u32,
    pub io_addrs: Vec<u64>,
    pub scalars: Vec<u32>,
}

#[derive(Debug, Default)]
struct Faults {
    malloc_at: Option<u64>,
    memcpy_at: Option<u64>,
    launch_at: Option<u64>,
    event_create_at: Option<u64>,
    event_reset_at: Option<u64>,
    wait_at: Option<u64>,
    stream_create_at: Option<u64>,
    kernel_result: Option<i32>,
    kernel_result_at: Option<(u64, i32)>,
}

#[derive(Debug)]
struct SimEvent {
    id: u32,
    recorded: bool,
}

#[derive(Debug, Default)]
struct SimState {
    next_addr: u64,
    next_handle: u64,
    next_event_id: u32,
    memory: HashMap<u64, Vec<u8>>,
    streams: HashMap<u64, ()>,
    events: HashMap<u64, SimEvent>,
    journal: Vec<SimOp>,
    launches: Vec<LaunchRecord>,
    stats: SimStats,
    memcpy_calls: u64,
    reset_calls: u64,
    faults: Faults,
    repo: BTreeMap<(u32, u32), u64>,
    init: Option<RawInitPara>,
}

impl SimState {
    fn hit(at: Option<u64>, call: u64) -> bool {
        at == Some(call)
    }

    fn read<T: DeviceLayout>(&self, addr: u64) -> RtResult<T> {
        let bytes = self
            .memory
            .get(&addr)
            .filter(|m| m.len() >= T::SIZE)
            .ok_or(RuntimeError::new("kernel read", SIM_ERR_BAD_ADDRESS))?;
        T::decode(&bytes[..T::SIZE]).map_err(|_| RuntimeError::new("kernel read", SIM_ERR_BAD_ADDRESS))
    }

    /// A failure code already in the mirror survives a later success.
    fn write_ret(&mut self, addr: u64, offset: usize, ret: i32) -> RtResult<()> {
        let mem = self
            .memory
            .get_mut(&addr)
            .filter(|m| m.len() >= offset + 4)
            .ok_or(RuntimeError::new("kernel write", SIM_ERR_BAD_ADDRESS))?;
        let mut current = [0u8; 4];
        current.copy_from_slice(&mem[offset..offset + 4]);
        let current = i32::from_le_bytes(current);
        if ret == 0 && current != 0 && current != DEVICE_RESULT_UNSET {
            return Ok(());
        }
        mem[offset..offset + 4].copy_from_slice(&ret.to_le_bytes());
        Ok(())
    }

    fn record_signal(&mut self, id: u32) -> bool {
        match self.events.values_mut().find(|e| e.id == id) {
            Some(event) => {
                event.recorded = true;
                true
            }
            None => false,
        }
    }
}

/// Simulated device runtime.
pub struct SimRuntime {
    state: Mutex<SimState>,
    kernels: KernelConfig,
    run_mode: RunMode,
}

impl Default for SimRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRuntime {
    pub fn new() -> Self {
        Self::with_kernels(KernelConfig::default(), RunMode::Host)
    }

    pub fn with_run_mode(run_mode: RunMode) -> Self {
        Self::with_kernels(KernelConfig::default(), run_mode)
    }

    pub fn with_kernels(kernels: KernelConfig, run_mode: RunMode) -> Self {
        let state = SimState {
            next_addr: DEVICE_ADDR_BASE,
            next_handle: 1,
            next_event_id: 1,
            ..SimState::default()
        };
        Self {
            state: Mutex::new(state),
            kernels,
            run_mode,
        }
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- fault injection ----------------------------------------------------

    pub fn fail_malloc_at(&self, call: u64) {
        self.state().faults.malloc_at = Some(call);
    }

    /// Counts copies in both directions.
    pub fn fail_memcpy_at(&self, call: u64) {
        self.state().faults.memcpy_at = Some(call);
    }

    pub fn fail_launch_at(&self, call: u64) {
        self.state().faults.launch_at = Some(call);
    }

    pub fn fail_event_create_at(&self, call: u64) {
        self.state().faults.event_create_at = Some(call);
    }

    pub fn fail_event_reset_at(&self, call: u64) {
        self.state().faults.event_reset_at = Some(call);
    }

    pub fn fail_wait_at(&self, call: u64) {
        self.state().faults.wait_at = Some(call);
    }

    pub fn fail_stream_create_at(&self, call: u64) {
        self.state().faults.stream_create_at = Some(call);
    }

    /// Every kernel writes `code` instead of 0.
    pub fn set_kernel_result(&self, code: i32) {
        self.state().faults.kernel_result = Some(code);
    }

    /// Only the N-th launch writes `code`.
    pub fn set_kernel_result_at(&self, launch: u64, code: i32) {
        self.state().faults.kernel_result_at = Some((launch, code));
    }

    // -- inspection ---------------------------------------------------------

    pub fn stats(&self) -> SimStats {
        let state = self.state();
        SimStats {
            live_allocations: state.memory.len(),
            ..state.stats
        }
    }

    pub fn journal(&self) -> Vec<SimOp> {
        self.state().journal.clone()
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state().launches.clone()
    }

    pub fn clear_journal(&self) {
        let mut state = self.state();
        state.journal.clear();
        state.launches.clear();
    }

    /// Features stored under one `(id0, id1)` bucket.
    pub fn repo_count(&self, id0: u32, id1: u32) -> u64 {
        self.state().repo.get(&(id0, id1)).copied().unwrap_or(0)
    }

    pub fn repo_total(&self) -> u64 {
        self.state().repo.values().sum()
    }

    /// Parameters of the last successful init, if the repository is live.
    pub fn init_params(&self) -> Option<RawInitPara> {
        self.state().init
    }

    pub fn live_events(&self) -> usize {
        self.state().events.len()
    }

    pub fn live_streams(&self) -> usize {
        self.state().streams.len()
    }

    // -- simulated kernels --------------------------------------------------

    fn run_kernel(&self, state: &mut SimState, record: &LaunchRecord) -> RtResult<()> {
        let k = &self.kernels;
        let launch_no = state.stats.launches;
        let forced = match state.faults.kernel_result_at {
            Some((at, code)) if at == launch_no => Some(code),
            _ => state.faults.kernel_result,
        };
        let addr = |i: usize| {
            record
                .io_addrs
                .get(i)
                .copied()
                .ok_or(RuntimeError::new("kernel args", SIM_ERR_BAD_ADDRESS))
        };
        let scalar = |i: usize| record.scalars.get(i).copied().unwrap_or(0);

        let name = record.kernel.as_str();
        if name == k.init {
            let para: RawInitPara = state.read(addr(0)?)?;
            let ret = forced.unwrap_or(0);
            if ret == 0 {
                state.init = Some(RawInitPara { ret: 0, ..para });
            }
            state.write_ret(addr(0)?, RawInitPara::RET_OFFSET, ret)
        } else if name == k.release {
            let ret = forced.unwrap_or(0);
            if ret == 0 {
                state.repo.clear();
                state.init = None;
            }
            state.write_ret(addr(0)?, 0, ret)
        } else if name == k.repo_add {
            let info: RawFeatureInfo = state.read(addr(0)?)?;
            let ret = self.signalled(state, scalar(1), forced);
            if ret == 0 {
                *state.repo.entry((info.id0, info.id1)).or_default() += u64::from(scalar(2));
            }
            state.write_ret(addr(0)?, RawFeatureInfo::RET_OFFSET, ret)
        } else if name == k.repo_del {
            let range: RawRepoRange = state.read(addr(0)?)?;
            let ret = self.signalled(state, scalar(1), forced);
            if ret == 0 {
                state.repo.retain(|&(id0, id1), _| !range.contains(id0, id1));
            }
            state.write_ret(addr(0)?, RawRepoRange::RET_OFFSET, ret)
        } else if name == k.accurate_del_or_modify {
            let info: RawFeatureInfo = state.read(addr(0)?)?;
            let ret = self.signalled(state, scalar(1), forced);
            if ret == 0 && AccurateKind::from_tag(scalar(0)) == Some(AccurateKind::Delete) {
                let key = (info.id0, info.id1);
                if let Some(count) = state.repo.get_mut(&key) {
                    *count = count.saturating_sub(u64::from(info.feature_count));
                    if *count == 0 {
                        state.repo.remove(&key);
                    }
                }
            }
            state.write_ret(addr(0)?, RawFeatureInfo::RET_OFFSET, ret)
        } else if name == k.search {
            let _input: RawSearchInput = state.read(addr(0)?)?;
            let _result: RawSearchResult = state.read(addr(1)?)?;
            let ret = self.signalled(state, scalar(1), forced);
            state.write_ret(addr(1)?, RawSearchResult::RET_OFFSET, ret)
        } else {
            Err(RuntimeError::new("rtCpuKernelLaunch", SIM_ERR_UNKNOWN_KERNEL))
        }
    }

    /// Record the completion signal; a kernel that cannot find its signal
    /// reports failure.
    fn signalled(&self, state: &mut SimState, signal_id: u32, forced: Option<i32>) -> i32 {
        if !state.record_signal(signal_id) {
            return -1;
        }
        forced.unwrap_or(0)
    }
}

impl DeviceRuntime for SimRuntime {
    fn create_stream(&self) -> RtResult<StreamHandle> {
        let mut state = self.state();
        state.stats.streams_created += 1;
        if SimState::hit(state.faults.stream_create_at, state.stats.streams_created) {
            return Err(RuntimeError::new("rtStreamCreate", SIM_ERR_INJECTED));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        state.streams.insert(handle, ());
        state.journal.push(SimOp::CreateStream { stream: handle });
        Ok(StreamHandle(handle))
    }

    fn destroy_stream(&self, stream: StreamHandle) -> RtResult<()> {
        let mut state = self.state();
        state.stats.streams_destroyed += 1;
        state
            .streams
            .remove(&stream.0)
            .ok_or(RuntimeError::new("rtStreamDestroy", SIM_ERR_BAD_HANDLE))?;
        state.journal.push(SimOp::DestroyStream { stream: stream.0 });
        Ok(())
    }

    fn synchronize_stream(&self, stream: StreamHandle) -> RtResult<()> {
        let mut state = self.state();
        if !state.streams.contains_key(&stream.0) {
            return Err(RuntimeError::new("rtStreamSynchronize", SIM_ERR_BAD_HANDLE));
        }
        state.journal.push(SimOp::Synchronize { stream: stream.0 });
        Ok(())
    }

    fn create_event(&self) -> RtResult<EventHandle> {
        let mut state = self.state();
        state.stats.events_created += 1;
        if SimState::hit(state.faults.event_create_at, state.stats.events_created) {
            return Err(RuntimeError::new("rtEventCreateWithFlag", SIM_ERR_INJECTED));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        let id = state.next_event_id;
        state.next_event_id += 1;
        state.events.insert(handle, SimEvent { id, recorded: false });
        state.journal.push(SimOp::CreateEvent { id });
        Ok(EventHandle(handle))
    }

    fn event_id(&self, event: EventHandle) -> RtResult<u32> {
        self.state()
            .events
            .get(&event.0)
            .map(|e| e.id)
            .ok_or(RuntimeError::new("rtGetEventID", SIM_ERR_BAD_HANDLE))
    }

    fn reset_event(&self, event: EventHandle, stream: StreamHandle) -> RtResult<()> {
        let mut state = self.state();
        state.reset_calls += 1;
        if SimState::hit(state.faults.event_reset_at, state.reset_calls) {
            return Err(RuntimeError::new("rtEventReset", SIM_ERR_INJECTED));
        }
        if !state.streams.contains_key(&stream.0) {
            return Err(RuntimeError::new("rtEventReset", SIM_ERR_BAD_HANDLE));
        }
        let ev = state
            .events
            .get_mut(&event.0)
            .ok_or(RuntimeError::new("rtEventReset", SIM_ERR_BAD_HANDLE))?;
        ev.recorded = false;
        let id = ev.id;
        state.journal.push(SimOp::ResetEvent { id });
        Ok(())
    }

    fn stream_wait_event(&self, stream: StreamHandle, event: EventHandle) -> RtResult<()> {
        let mut state = self.state();
        state.stats.waits += 1;
        if SimState::hit(state.faults.wait_at, state.stats.waits) {
            return Err(RuntimeError::new("rtStreamWaitEvent", SIM_ERR_INJECTED));
        }
        if !state.streams.contains_key(&stream.0) {
            return Err(RuntimeError::new("rtStreamWaitEvent", SIM_ERR_BAD_HANDLE));
        }
        let ev = state
            .events
            .get(&event.0)
            .ok_or(RuntimeError::new("rtStreamWaitEvent", SIM_ERR_BAD_HANDLE))?;
        // Nothing recorded this event: a real device would block forever.
        if !ev.recorded {
            return Err(RuntimeError::new("rtStreamWaitEvent", SIM_ERR_WOULD_HANG));
        }
        let id = ev.id;
        state.journal.push(SimOp::WaitEvent { id });
        Ok(())
    }

    fn destroy_event(&self, event: EventHandle) -> RtResult<()> {
        let mut state = self.state();
        state.stats.events_destroyed += 1;
        let ev = state
            .events
            .remove(&event.0)
            .ok_or(RuntimeError::new("rtEventDestroy", SIM_ERR_BAD_HANDLE))?;
        state.journal.push(SimOp::DestroyEvent { id: ev.id });
        Ok(())
    }

    fn malloc(&self, size: usize) -> RtResult<DevicePtr> {
        let mut state = self.state();
        state.stats.mallocs += 1;
        if SimState::hit(state.faults.malloc_at, state.stats.mallocs) {
            return Err(RuntimeError::new("rtMalloc", SIM_ERR_INJECTED));
        }
        let addr = state.next_addr;
        let span = (size as u64).max(1).div_ceil(DEVICE_ADDR_ALIGN) * DEVICE_ADDR_ALIGN;
        state.next_addr += span;
        state.memory.insert(addr, vec![0u8; size]);
        state.journal.push(SimOp::Malloc { addr, size });
        trace!(addr, size, "sim malloc");
        Ok(DevicePtr(addr))
    }

    fn free(&self, ptr: DevicePtr) -> RtResult<()> {
        let mut state = self.state();
        state.stats.frees += 1;
        state
            .memory
            .remove(&ptr.0)
            .ok_or(RuntimeError::new("rtFree", SIM_ERR_BAD_ADDRESS))?;
        state.journal.push(SimOp::Free { addr: ptr.0 });
        Ok(())
    }

    fn memcpy_async(
        &self,
        dst: DevicePtr,
        src: &[u8],
        kind: MemcpyKind,
        stream: StreamHandle,
    ) -> RtResult<()> {
        let mut state = self.state();
        state.stats.copies_in += 1;
        state.memcpy_calls += 1;
        if SimState::hit(state.faults.memcpy_at, state.memcpy_calls) {
            return Err(RuntimeError::new("rtMemcpyAsync", SIM_ERR_INJECTED));
        }
        if !state.streams.contains_key(&stream.0) {
            return Err(RuntimeError::new("rtMemcpyAsync", SIM_ERR_BAD_HANDLE));
        }
        let mem = state
            .memory
            .get_mut(&dst.0)
            .filter(|m| m.len() >= src.len())
            .ok_or(RuntimeError::new("rtMemcpyAsync", SIM_ERR_BAD_ADDRESS))?;
        mem[..src.len()].copy_from_slice(src);
        state.journal.push(SimOp::CopyIn {
            addr: dst.0,
            len: src.len(),
            kind,
        });
        Ok(())
    }

    fn memcpy(&self, dst: &mut [u8], src: DevicePtr, kind: MemcpyKind) -> RtResult<()> {
        let mut state = self.state();
        state.stats.copies_out += 1;
        state.memcpy_calls += 1;
        if SimState::hit(state.faults.memcpy_at, state.memcpy_calls) {
            return Err(RuntimeError::new("rtMemcpy", SIM_ERR_INJECTED));
        }
        let mem = state
            .memory
            .get(&src.0)
            .filter(|m| m.len() >= dst.len())
            .ok_or(RuntimeError::new("rtMemcpy", SIM_ERR_BAD_ADDRESS))?;
        dst.copy_from_slice(&mem[..dst.len()]);
        state.journal.push(SimOp::CopyOut {
            addr: src.0,
            len: dst.len(),
            kind,
        });
        Ok(())
    }

    fn run_mode(&self) -> RtResult<RunMode> {
        Ok(self.run_mode)
    }

    fn launch_cpu_kernel(&self, launch: &KernelLaunch<'_>, stream: StreamHandle) -> RtResult<()> {
        let mut state = self.state();
        state.stats.launches += 1;
        if SimState::hit(state.faults.launch_at, state.stats.launches) {
            return Err(RuntimeError::new("rtCpuKernelLaunch", SIM_ERR_INJECTED));
        }
        if !state.streams.contains_key(&stream.0) {
            return Err(RuntimeError::new("rtCpuKernelLaunch", SIM_ERR_BAD_HANDLE));
        }
        if launch.library != self.kernels.library {
            return Err(RuntimeError::new("rtCpuKernelLaunch", SIM_ERR_UNKNOWN_KERNEL));
        }
        let view = ArgsView::parse(launch.args)
            .map_err(|_| RuntimeError::new("rtCpuKernelLaunch", SIM_ERR_BAD_ADDRESS))?;

        let record = LaunchRecord {
            library: launch.library.to_string(),
            kernel: launch.kernel.to_string(),
            block_dim: launch.block_dim,
            io_addrs: view.io_addrs,
            scalars: view.scalars,
        };
        debug!(kernel = %record.kernel, scalars = ?record.scalars, "sim kernel launch");
        self.run_kernel(&mut state, &record)?;

        state.journal.push(SimOp::Launch {
            kernel: record.kernel.clone(),
            scalars: record.scalars.clone(),
        });
        state.launches.push(record);
        Ok(())
    }
}
