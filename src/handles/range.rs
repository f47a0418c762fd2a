use std::sync::Arc;

use tracing::info;

use super::ensure;
use crate::device::DeviceMirror;
use crate::error::Result;
use crate::protocol::layout::RawRepoRange;
use crate::protocol::{DEVICE_RESULT_UNSET, REPO_ID_MAX};
use crate::runtime::DeviceRuntime;

/// Inclusive `(id0, id1)` rectangle of repository partitions.
#[derive(Debug)]
pub struct RepoRange {
    id0_min: u32,
    id0_max: u32,
    id1_min: u32,
    id1_max: u32,
    device_result: i32,
    mirror: DeviceMirror<RawRepoRange>,
}

impl RepoRange {
    pub fn create(
        runtime: &Arc<dyn DeviceRuntime>,
        id0_min: u32,
        id0_max: u32,
        id1_min: u32,
        id1_max: u32,
    ) -> Result<Self> {
        ensure(id0_min <= id0_max && id0_max <= REPO_ID_MAX, "id0Min/id0Max", || {
            format!("[{id0_min}, {id0_max}] is empty or exceeds {REPO_ID_MAX}")
        })?;
        ensure(id1_min <= id1_max && id1_max <= REPO_ID_MAX, "id1Min/id1Max", || {
            format!("[{id1_min}, {id1_max}] is empty or exceeds {REPO_ID_MAX}")
        })?;

        let mirror = DeviceMirror::create(runtime)?;
        info!(id0_min, id0_max, id1_min, id1_max, "repo range created");
        Ok(Self {
            id0_min,
            id0_max,
            id1_min,
            id1_max,
            device_result: DEVICE_RESULT_UNSET,
            mirror,
        })
    }

    pub fn id0(&self) -> (u32, u32) {
        (self.id0_min, self.id0_max)
    }

    pub fn id1(&self) -> (u32, u32) {
        (self.id1_min, self.id1_max)
    }

    pub fn device_result(&self) -> i32 {
        self.device_result
    }

    pub fn destroy(&mut self) {
        self.mirror.destroy();
    }

    pub(crate) fn mirror(&self) -> &DeviceMirror<RawRepoRange> {
        &self.mirror
    }

    pub(crate) fn raw(&self) -> RawRepoRange {
        RawRepoRange {
            id0_min: self.id0_min,
            id0_max: self.id0_max,
            id1_min: self.id1_min,
            id1_max: self.id1_max,
            ret: DEVICE_RESULT_UNSET,
        }
    }

    pub(crate) fn set_device_result(&mut self, ret: i32) {
        self.device_result = ret;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::sim::SimRuntime;

    #[test]
    fn test_range_validation() {
        let rt: Arc<dyn DeviceRuntime> = Arc::new(SimRuntime::new());
        assert!(RepoRange::create(&rt, 5, 4, 0, 0).unwrap_err().is_invalid_param());
        assert!(RepoRange::create(&rt, 0, 1024, 0, 0).unwrap_err().is_invalid_param());
        assert!(RepoRange::create(&rt, 0, 0, 3, 2).unwrap_err().is_invalid_param());
        let range = RepoRange::create(&rt, 0, 1023, 7, 7).unwrap();
        assert_eq!(range.id0(), (0, 1023));
        assert!(range.raw().contains(512, 7));
        assert!(!range.raw().contains(512, 8));
    }
}
