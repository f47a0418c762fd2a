//! Search request and result handles.

use std::sync::Arc;

use tracing::info;

use super::{ensure, host_addr, RepoRange};
use crate::device::DeviceMirror;
use crate::error::Result;
use crate::protocol::layout::{RawQueryTable, RawRepoRange, RawSearchInput, RawSearchResult};
use crate::protocol::{DEVICE_RESULT_UNSET, QUERY_TABLE_ENTRY_LEN, TOP_K_MAX};
use crate::runtime::DeviceRuntime;

/// Host-only table of query entries, each exactly 32 KiB.
///
/// Construction does not cap `query_count`. The cap (1024 by default) is
/// `batching.query_count_max` and is checked by
/// [`FvRepository::search`](crate::ops::FvRepository::search), so a larger
/// table builds fine but only searches once that limit is raised.
#[derive(Debug, Clone)]
pub struct QueryTable {
    query_count: u32,
    entry_len: u32,
    data: Vec<u8>,
}

impl QueryTable {
    pub fn new(query_count: u32, entry_len: u32, data: Vec<u8>) -> Result<Self> {
        ensure(entry_len == QUERY_TABLE_ENTRY_LEN, "tableLen", || {
            format!("{entry_len} should be {QUERY_TABLE_ENTRY_LEN}")
        })?;
        let expected = u64::from(query_count) * u64::from(entry_len);
        ensure(data.len() as u64 == expected, "tableDataLen", || {
            format!(
                "{} should be equal to queryCnt:{query_count} * tableLen:{entry_len}",
                data.len()
            )
        })?;
        Ok(Self {
            query_count,
            entry_len,
            data,
        })
    }

    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    pub fn entry_len(&self) -> u32 {
        self.entry_len
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_len(&self) -> u32 {
        self.data.len() as u32
    }

    fn raw(&self) -> RawQueryTable {
        RawQueryTable {
            query_count: self.query_count,
            entry_len: self.entry_len,
            data_addr: host_addr(&self.data),
            data_len: self.data_len(),
        }
    }
}

/// A query table plus the partition range and `topK` to search with.
#[derive(Debug)]
pub struct SearchRequest {
    table: QueryTable,
    range: RawRepoRange,
    top_k: u32,
    mirror: DeviceMirror<RawSearchInput>,
}

impl SearchRequest {
    /// The range's bounds are copied; `range` itself stays with the caller.
    pub fn create(
        runtime: &Arc<dyn DeviceRuntime>,
        table: QueryTable,
        range: &RepoRange,
        top_k: u32,
    ) -> Result<Self> {
        ensure(top_k <= TOP_K_MAX, "topK", || {
            format!("{top_k} can't be larger than {TOP_K_MAX}")
        })?;
        let mirror = DeviceMirror::create(runtime)?;
        info!(query_count = table.query_count(), top_k, "search request created");
        Ok(Self {
            table,
            range: range.raw(),
            top_k,
            mirror,
        })
    }

    pub fn table(&self) -> &QueryTable {
        &self.table
    }

    pub fn top_k(&self) -> u32 {
        self.top_k
    }

    pub fn destroy(&mut self) {
        self.mirror.destroy();
    }

    pub(crate) fn mirror(&self) -> &DeviceMirror<RawSearchInput> {
        &self.mirror
    }

    pub(crate) fn raw(&self) -> RawSearchInput {
        RawSearchInput {
            table: self.table.raw(),
            range: self.range,
            top_k: self.top_k,
        }
    }
}

/// Caller-owned output arrays a search writes into.
///
/// `result_num` holds one count per query. The other four are laid out
/// query-major with `topK` slots per query.
#[derive(Debug)]
pub struct SearchOutputs<'a> {
    pub result_num: &'a mut [u32],
    pub id0: &'a mut [u32],
    pub id1: &'a mut [u32],
    pub offset: &'a mut [u32],
    pub distance: &'a mut [f32],
}

/// Descriptor of where and how much a search may write.
#[derive(Debug)]
pub struct SearchResult<'a> {
    query_count: u32,
    outputs: SearchOutputs<'a>,
    data_len: u32,
    device_result: i32,
    mirror: DeviceMirror<RawSearchResult>,
}

impl<'a> SearchResult<'a> {
    /// `data_len` is the byte length of each of the id0 / id1 / offset /
    /// distance arrays. Like [`QueryTable::new`], `query_count` is not
    /// capped here; search checks it against `batching.query_count_max`.
    pub fn create(
        runtime: &Arc<dyn DeviceRuntime>,
        query_count: u32,
        outputs: SearchOutputs<'a>,
        data_len: u32,
    ) -> Result<Self> {
        ensure(outputs.result_num.len() == query_count as usize, "resultNumDataLen", || {
            format!(
                "{} bytes should be equal to queryCnt:{query_count} * 4",
                outputs.result_num.len() * 4
            )
        })?;
        let needed = data_len as usize;
        for (name, bytes) in [
            ("id0", outputs.id0.len() * 4),
            ("id1", outputs.id1.len() * 4),
            ("resultOffset", outputs.offset.len() * 4),
            ("resultDistance", outputs.distance.len() * 4),
        ] {
            ensure(bytes >= needed, name, || {
                format!("{bytes} bytes is smaller than dataLen:{data_len}")
            })?;
        }

        let mirror = DeviceMirror::create(runtime)?;
        info!(query_count, data_len, "search result created");
        Ok(Self {
            query_count,
            outputs,
            data_len,
            device_result: DEVICE_RESULT_UNSET,
            mirror,
        })
    }

    pub fn query_count(&self) -> u32 {
        self.query_count
    }

    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    pub fn result_num(&self) -> &[u32] {
        &*self.outputs.result_num
    }

    pub fn id0(&self) -> &[u32] {
        &*self.outputs.id0
    }

    pub fn id1(&self) -> &[u32] {
        &*self.outputs.id1
    }

    pub fn offsets(&self) -> &[u32] {
        &*self.outputs.offset
    }

    pub fn distances(&self) -> &[f32] {
        &*self.outputs.distance
    }

    pub fn device_result(&self) -> i32 {
        self.device_result
    }

    pub fn destroy(&mut self) {
        self.mirror.destroy();
    }

    pub(crate) fn mirror(&self) -> &DeviceMirror<RawSearchResult> {
        &self.mirror
    }

    pub(crate) fn raw(&self) -> RawSearchResult {
        RawSearchResult {
            query_count: self.query_count,
            result_num_addr: host_addr(&*self.outputs.result_num),
            result_num_len: (self.outputs.result_num.len() * 4) as u32,
            id0_addr: host_addr(&*self.outputs.id0),
            id1_addr: host_addr(&*self.outputs.id1),
            offset_addr: host_addr(&*self.outputs.offset),
            distance_addr: host_addr(&*self.outputs.distance),
            data_len: self.data_len,
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
    fn test_query_table_validation() {
        assert!(QueryTable::new(1, 1024, vec![0; 1024]).is_err());
        assert!(QueryTable::new(2, QUERY_TABLE_ENTRY_LEN, vec![0; 32_768]).is_err());
        let table = QueryTable::new(2, QUERY_TABLE_ENTRY_LEN, vec![0; 65_536]).unwrap();
        assert_eq!(table.data_len(), 65_536);
    }

    #[test]
    fn test_table_over_default_cap_builds() {
        let table = QueryTable::new(1025, QUERY_TABLE_ENTRY_LEN, vec![0; 1025 * 32_768]).unwrap();
        assert_eq!(table.query_count(), 1025);
    }

    #[test]
    fn test_search_request_top_k() {
        let rt: Arc<dyn DeviceRuntime> = Arc::new(SimRuntime::new());
        let range = RepoRange::create(&rt, 0, 1, 0, 1).unwrap();
        let table = QueryTable::new(0, QUERY_TABLE_ENTRY_LEN, Vec::new()).unwrap();
        assert!(SearchRequest::create(&rt, table.clone(), &range, TOP_K_MAX + 1).is_err());
        let req = SearchRequest::create(&rt, table, &range, 10).unwrap();
        assert_eq!(req.raw().range.id0_max, 1);
    }

    #[test]
    fn test_search_result_output_lengths() {
        let rt: Arc<dyn DeviceRuntime> = Arc::new(SimRuntime::new());
        let (mut num, mut id0, mut id1, mut off) = (vec![0u32; 2], vec![0u32; 8], vec![0u32; 8], vec![0u32; 8]);
        let mut dist = vec![0f32; 4];
        let outputs = SearchOutputs {
            result_num: &mut num,
            id0: &mut id0,
            id1: &mut id1,
            offset: &mut off,
            distance: &mut dist,
        };
        let err = SearchResult::create(&rt, 2, outputs, 32).unwrap_err();
        assert!(err.is_invalid_param());

        let mut dist = vec![0f32; 8];
        let outputs = SearchOutputs {
            result_num: &mut num,
            id0: &mut id0,
            id1: &mut id1,
            offset: &mut off,
            distance: &mut dist,
        };
        let result = SearchResult::create(&rt, 2, outputs, 32).unwrap();
        assert_eq!(result.raw().result_num_len, 8);
    }
}
