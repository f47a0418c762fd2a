use std::sync::Arc;

use tracing::info;

use super::ensure;
use crate::device::DeviceMirror;
use crate::error::Result;
use crate::protocol::layout::RawInitPara;
use crate::protocol::{
    CAPACITY_MAX, DEVICE_RESULT_UNSET, TOP_1N_DEFAULT, TOP_1N_RANGE, TOP_NM_DEFAULT, TOP_NM_RANGE,
};
use crate::runtime::DeviceRuntime;

/// Repository init parameters.
#[derive(Debug)]
pub struct InitParams {
    capacity: u64,
    top_1n: u32,
    top_nm: u32,
    device_result: i32,
    mirror: DeviceMirror<RawInitPara>,
}

impl InitParams {
    /// `capacity` must be in `1..=600_000_000`. Top-number limits start at
    /// their defaults.
    pub fn create(runtime: &Arc<dyn DeviceRuntime>, capacity: u64) -> Result<Self> {
        validate_capacity(capacity)?;
        let mirror = DeviceMirror::create(runtime)?;
        info!(capacity, "init parameters created");
        Ok(Self {
            capacity,
            top_1n: TOP_1N_DEFAULT,
            top_nm: TOP_NM_DEFAULT,
            device_result: DEVICE_RESULT_UNSET,
            mirror,
        })
    }

    pub fn set_top_1n(&mut self, top_1n: u32) -> Result<()> {
        validate_top_1n(top_1n)?;
        self.top_1n = top_1n;
        Ok(())
    }

    pub fn set_top_nm(&mut self, top_nm: u32) -> Result<()> {
        validate_top_nm(top_nm)?;
        self.top_nm = top_nm;
        Ok(())
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn top_1n(&self) -> u32 {
        self.top_1n
    }

    pub fn top_nm(&self) -> u32 {
        self.top_nm
    }

    /// Result code from the last init; -2 until a kernel has written one.
    pub fn device_result(&self) -> i32 {
        self.device_result
    }

    pub fn destroy(&mut self) {
        self.mirror.destroy();
    }

    pub(crate) fn mirror(&self) -> &DeviceMirror<RawInitPara> {
        &self.mirror
    }

    pub(crate) fn raw(&self) -> RawInitPara {
        RawInitPara {
            capacity: self.capacity,
            top_1n: self.top_1n,
            top_nm: self.top_nm,
            len: 0,
            ret: DEVICE_RESULT_UNSET,
        }
    }

    pub(crate) fn set_device_result(&mut self, ret: i32) {
        self.device_result = ret;
    }
}

pub(crate) fn validate_capacity(capacity: u64) -> Result<()> {
    ensure(capacity > 0 && capacity <= CAPACITY_MAX, "capacity", || {
        format!("{capacity} should not be 0 or greater than {CAPACITY_MAX}")
    })
}

pub(crate) fn validate_top_1n(top_1n: u32) -> Result<()> {
    ensure(TOP_1N_RANGE.contains(&top_1n), "maxTopNumFor1N", || {
        format!("{top_1n} should be in [{}, {}]", TOP_1N_RANGE.start(), TOP_1N_RANGE.end())
    })
}

pub(crate) fn validate_top_nm(top_nm: u32) -> Result<()> {
    ensure(TOP_NM_RANGE.contains(&top_nm), "maxTopNumForNM", || {
        format!("{top_nm} should be in [{}, {}]", TOP_NM_RANGE.start(), TOP_NM_RANGE.end())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sim::SimRuntime;

    #[test]
    fn test_capacity_bounds() {
        let sim = Arc::new(SimRuntime::new());
        let rt: Arc<dyn DeviceRuntime> = sim.clone();
        assert!(InitParams::create(&rt, 0).unwrap_err().is_invalid_param());
        assert!(InitParams::create(&rt, CAPACITY_MAX + 1).unwrap_err().is_invalid_param());
        assert_eq!(sim.stats().mallocs, 0);

        let params = InitParams::create(&rt, CAPACITY_MAX).unwrap();
        assert_eq!(params.top_1n(), 4800);
        assert_eq!(params.top_nm(), 500);
        assert_eq!(params.device_result(), DEVICE_RESULT_UNSET);
    }

    #[test]
    fn test_top_limits() {
        let rt: Arc<dyn DeviceRuntime> = Arc::new(SimRuntime::new());
        let mut params = InitParams::create(&rt, 1000).unwrap();
        assert!(params.set_top_1n(1).is_err());
        assert!(params.set_top_1n(4801).is_err());
        params.set_top_1n(2).unwrap();
        assert!(params.set_top_nm(499).is_err());
        params.set_top_nm(4800).unwrap();
        let raw = params.raw();
        assert_eq!((raw.top_1n, raw.top_nm), (2, 4800));
    }
}
