use std::sync::Arc;

use tracing::info;

use super::{ensure, host_addr};
use crate::device::DeviceMirror;
use crate::error::Result;
use crate::protocol::layout::RawFeatureInfo;
use crate::protocol::{DEVICE_RESULT_UNSET, FEATURE_COUNT_MAX, REPO_ID_MAX, SHORT_FEATURE_LEN};
use crate::runtime::DeviceRuntime;

/// A block of feature vectors stored under one `(id0, id1)` partition.
///
/// Owns its feature bytes and a 36-byte device mirror of the record header.
#[derive(Debug)]
pub struct FeatureRecord {
    id0: u32,
    id1: u32,
    offset: u32,
    feature_len: u32,
    feature_count: u32,
    data: Vec<u8>,
    device_result: i32,
    mirror: DeviceMirror<RawFeatureInfo>,
}

impl FeatureRecord {
    pub fn create(
        runtime: &Arc<dyn DeviceRuntime>,
        id0: u32,
        id1: u32,
        offset: u32,
        feature_len: u32,
        feature_count: u32,
        data: Vec<u8>,
    ) -> Result<Self> {
        ensure(id0 <= REPO_ID_MAX && id1 <= REPO_ID_MAX, "id0/id1", || {
            format!("id0:{id0} or id1:{id1} is not in range [0-{REPO_ID_MAX}]")
        })?;
        ensure(feature_len == SHORT_FEATURE_LEN, "featureLen", || {
            format!("{feature_len} should be {SHORT_FEATURE_LEN}")
        })?;
        ensure(feature_count <= FEATURE_COUNT_MAX, "featureCount", || {
            format!("{feature_count} can't be larger than {FEATURE_COUNT_MAX}")
        })?;
        ensure(feature_count == 0 || !data.is_empty(), "featureData", || {
            "feature data is empty".to_string()
        })?;
        let expected = u64::from(feature_len) * u64::from(feature_count);
        ensure(data.len() as u64 == expected, "featureDataLen", || {
            format!(
                "{} should be equal to featureLen:{feature_len} * featureCount:{feature_count}",
                data.len()
            )
        })?;

        let mirror = DeviceMirror::create(runtime)?;
        info!(id0, id1, offset, feature_count, "feature record created");
        Ok(Self {
            id0,
            id1,
            offset,
            feature_len,
            feature_count,
            data,
            device_result: DEVICE_RESULT_UNSET,
            mirror,
        })
    }

    pub fn id0(&self) -> u32 {
        self.id0
    }

    pub fn id1(&self) -> u32 {
        self.id1
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn feature_len(&self) -> u32 {
        self.feature_len
    }

    pub fn feature_count(&self) -> u32 {
        self.feature_count
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_len(&self) -> u32 {
        self.data.len() as u32
    }

    /// Result code written by the last kernel that ran on this record.
    pub fn device_result(&self) -> i32 {
        self.device_result
    }

    pub fn destroy(&mut self) {
        self.mirror.destroy();
    }

    pub(crate) fn mirror(&self) -> &DeviceMirror<RawFeatureInfo> {
        &self.mirror
    }

    pub(crate) fn raw(&self) -> RawFeatureInfo {
        RawFeatureInfo {
            id0: self.id0,
            id1: self.id1,
            offset: self.offset,
            feature_len: self.feature_len,
            feature_count: self.feature_count,
            data_addr: host_addr(&self.data),
            data_len: self.data_len(),
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

    fn rt() -> (Arc<SimRuntime>, Arc<dyn DeviceRuntime>) {
        let sim = Arc::new(SimRuntime::new());
        let rt: Arc<dyn DeviceRuntime> = sim.clone();
        (sim, rt)
    }

    #[test]
    fn test_valid_record() {
        let (sim, rt) = rt();
        let rec = FeatureRecord::create(&rt, 10, 10, 20, 36, 10, vec![7u8; 360]).unwrap();
        assert_eq!(rec.data_len(), 360);
        assert_eq!(rec.device_result(), -2);
        assert_eq!(rec.raw().data_addr, rec.data().as_ptr() as u64);
        assert_eq!(sim.stats().mallocs, 1);
    }

    #[test]
    fn test_rejections_allocate_nothing() {
        let (sim, rt) = rt();
        let cases = [
            FeatureRecord::create(&rt, 1024, 0, 0, 36, 1, vec![0; 36]),
            FeatureRecord::create(&rt, 0, 1024, 0, 36, 1, vec![0; 36]),
            FeatureRecord::create(&rt, 0, 0, 0, 32, 1, vec![0; 32]),
            FeatureRecord::create(&rt, 0, 0, 0, 36, 2, vec![0; 36]),
            FeatureRecord::create(&rt, 0, 0, 0, 36, 1, Vec::new()),
            FeatureRecord::create(&rt, 0, 0, 0, 36, FEATURE_COUNT_MAX + 1, Vec::new()),
        ];
        for case in cases {
            assert!(case.unwrap_err().is_invalid_param());
        }
        assert_eq!(sim.stats().mallocs, 0);
    }

    #[test]
    fn test_destroy_frees_once() {
        let (sim, rt) = rt();
        let mut rec = FeatureRecord::create(&rt, 0, 0, 0, 36, 0, Vec::new()).unwrap();
        rec.destroy();
        rec.destroy();
        drop(rec);
        assert_eq!(sim.stats().frees, 1);
        assert_eq!(sim.stats().live_allocations, 0);
    }
}
