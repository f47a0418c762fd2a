//! Packed little-endian layouts of the structs the kernels read and write.
//!
//! A device mirror holds exactly `SIZE` bytes of one of these. The host
//! encodes before copy-in and decodes after copy-out; nothing else touches
//! the raw bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FvError, Result};
use crate::protocol::DEVICE_RESULT_UNSET;

/// A struct with a fixed, packed device-side representation.
pub trait DeviceLayout: Sized {
    /// Exact byte length on the device.
    const SIZE: usize;
    /// Human-readable name for logs and errors.
    const NAME: &'static str;

    fn encode(&self, buf: &mut BytesMut);

    /// Decode from exactly `SIZE` bytes.
    fn decode_from(buf: &mut &[u8]) -> Self;

    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.encode(&mut buf);
        debug_assert_eq!(buf.len(), Self::SIZE);
        buf.freeze()
    }

    fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(FvError::invalid(
                Self::NAME,
                format!("expected {} bytes, got {}", Self::SIZE, bytes.len()),
            ));
        }
        let mut cursor = bytes;
        Ok(Self::decode_from(&mut cursor))
    }
}

// ---------------------------------------------------------------------------
// Init
// ---------------------------------------------------------------------------

/// Repository init parameters (24 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInitPara {
    pub capacity: u64,
    pub top_1n: u32,
    pub top_nm: u32,
    pub len: u32,
    pub ret: i32,
}

impl RawInitPara {
    pub const RET_OFFSET: usize = 20;
}

impl DeviceLayout for RawInitPara {
    const SIZE: usize = 24;
    const NAME: &'static str = "init parameters";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.capacity);
        buf.put_u32_le(self.top_1n);
        buf.put_u32_le(self.top_nm);
        buf.put_u32_le(self.len);
        buf.put_i32_le(self.ret);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            capacity: buf.get_u64_le(),
            top_1n: buf.get_u32_le(),
            top_nm: buf.get_u32_le(),
            len: buf.get_u32_le(),
            ret: buf.get_i32_le(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result code
// ---------------------------------------------------------------------------

/// Bare device result code, used by release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawResultCode(pub i32);

impl Default for RawResultCode {
    fn default() -> Self {
        Self(DEVICE_RESULT_UNSET)
    }
}

impl DeviceLayout for RawResultCode {
    const SIZE: usize = 4;
    const NAME: &'static str = "result code";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_i32_le(self.0);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self(buf.get_i32_le())
    }
}

// ---------------------------------------------------------------------------
// Feature info
// ---------------------------------------------------------------------------

/// One feature record as the add / accurate kernels see it (36 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawFeatureInfo {
    pub id0: u32,
    pub id1: u32,
    pub offset: u32,
    pub feature_len: u32,
    pub feature_count: u32,
    pub data_addr: u64,
    pub data_len: u32,
    pub ret: i32,
}

impl RawFeatureInfo {
    pub const RET_OFFSET: usize = 32;
}

impl DeviceLayout for RawFeatureInfo {
    const SIZE: usize = 36;
    const NAME: &'static str = "feature info";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id0);
        buf.put_u32_le(self.id1);
        buf.put_u32_le(self.offset);
        buf.put_u32_le(self.feature_len);
        buf.put_u32_le(self.feature_count);
        buf.put_u64_le(self.data_addr);
        buf.put_u32_le(self.data_len);
        buf.put_i32_le(self.ret);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            id0: buf.get_u32_le(),
            id1: buf.get_u32_le(),
            offset: buf.get_u32_le(),
            feature_len: buf.get_u32_le(),
            feature_count: buf.get_u32_le(),
            data_addr: buf.get_u64_le(),
            data_len: buf.get_u32_le(),
            ret: buf.get_i32_le(),
        }
    }
}

// ---------------------------------------------------------------------------
// Repo range
// ---------------------------------------------------------------------------

/// Inclusive `(id0, id1)` rectangle (20 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawRepoRange {
    pub id0_min: u32,
    pub id0_max: u32,
    pub id1_min: u32,
    pub id1_max: u32,
    pub ret: i32,
}

impl RawRepoRange {
    pub const RET_OFFSET: usize = 16;

    pub fn contains(&self, id0: u32, id1: u32) -> bool {
        (self.id0_min..=self.id0_max).contains(&id0) && (self.id1_min..=self.id1_max).contains(&id1)
    }
}

impl DeviceLayout for RawRepoRange {
    const SIZE: usize = 20;
    const NAME: &'static str = "repo range";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.id0_min);
        buf.put_u32_le(self.id0_max);
        buf.put_u32_le(self.id1_min);
        buf.put_u32_le(self.id1_max);
        buf.put_i32_le(self.ret);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            id0_min: buf.get_u32_le(),
            id0_max: buf.get_u32_le(),
            id1_min: buf.get_u32_le(),
            id1_max: buf.get_u32_le(),
            ret: buf.get_i32_le(),
        }
    }
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Query table descriptor (20 bytes). Embedded in [`RawSearchInput`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawQueryTable {
    pub query_count: u32,
    pub entry_len: u32,
    pub data_addr: u64,
    pub data_len: u32,
}

impl DeviceLayout for RawQueryTable {
    const SIZE: usize = 20;
    const NAME: &'static str = "query table";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.query_count);
        buf.put_u32_le(self.entry_len);
        buf.put_u64_le(self.data_addr);
        buf.put_u32_le(self.data_len);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            query_count: buf.get_u32_le(),
            entry_len: buf.get_u32_le(),
            data_addr: buf.get_u64_le(),
            data_len: buf.get_u32_le(),
        }
    }
}

/// Search request (44 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSearchInput {
    pub table: RawQueryTable,
    pub range: RawRepoRange,
    pub top_k: u32,
}

impl DeviceLayout for RawSearchInput {
    const SIZE: usize = 44;
    const NAME: &'static str = "search input";

    fn encode(&self, buf: &mut BytesMut) {
        self.table.encode(buf);
        self.range.encode(buf);
        buf.put_u32_le(self.top_k);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            table: RawQueryTable::decode_from(buf),
            range: RawRepoRange::decode_from(buf),
            top_k: buf.get_u32_le(),
        }
    }
}

/// Search result descriptor (56 bytes). The addresses point at caller-owned
/// output arrays the kernel fills in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSearchResult {
    pub query_count: u32,
    pub result_num_addr: u64,
    pub result_num_len: u32,
    pub id0_addr: u64,
    pub id1_addr: u64,
    pub offset_addr: u64,
    pub distance_addr: u64,
    pub data_len: u32,
    pub ret: i32,
}

impl RawSearchResult {
    pub const RET_OFFSET: usize = 52;
}

impl DeviceLayout for RawSearchResult {
    const SIZE: usize = 56;
    const NAME: &'static str = "search result";

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.query_count);
        buf.put_u64_le(self.result_num_addr);
        buf.put_u32_le(self.result_num_len);
        buf.put_u64_le(self.id0_addr);
        buf.put_u64_le(self.id1_addr);
        buf.put_u64_le(self.offset_addr);
        buf.put_u64_le(self.distance_addr);
        buf.put_u32_le(self.data_len);
        buf.put_i32_le(self.ret);
    }

    fn decode_from(buf: &mut &[u8]) -> Self {
        Self {
            query_count: buf.get_u32_le(),
            result_num_addr: buf.get_u64_le(),
            result_num_len: buf.get_u32_le(),
            id0_addr: buf.get_u64_le(),
            id1_addr: buf.get_u64_le(),
            offset_addr: buf.get_u64_le(),
            distance_addr: buf.get_u64_le(),
            data_len: buf.get_u32_le(),
            ret: buf.get_i32_le(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_info_bytes() {
        let raw = RawFeatureInfo {
            id0: 10,
            id1: 11,
            offset: 20,
            feature_len: 36,
            feature_count: 10,
            data_addr: 0x1122_3344_5566_7788,
            data_len: 360,
            ret: DEVICE_RESULT_UNSET,
        };
        let bytes = raw.to_bytes();
        assert_eq!(bytes.len(), RawFeatureInfo::SIZE);
        assert_eq!(&bytes[0..4], &10u32.to_le_bytes());
        assert_eq!(&bytes[20..28], &0x1122_3344_5566_7788u64.to_le_bytes());
        assert_eq!(&bytes[RawFeatureInfo::RET_OFFSET..], &(-2i32).to_le_bytes());
        assert_eq!(RawFeatureInfo::decode(&bytes).unwrap(), raw);
    }

    #[test]
    fn test_result_offsets_point_at_ret() {
        let init = RawInitPara { capacity: 7, top_1n: 2, top_nm: 500, len: 0, ret: 99 };
        let bytes = init.to_bytes();
        assert_eq!(&bytes[RawInitPara::RET_OFFSET..], &99i32.to_le_bytes());

        let range = RawRepoRange { id0_min: 0, id0_max: 1, id1_min: 2, id1_max: 3, ret: 5 };
        let bytes = range.to_bytes();
        assert_eq!(&bytes[RawRepoRange::RET_OFFSET..], &5i32.to_le_bytes());

        let result = RawSearchResult {
            query_count: 1,
            result_num_addr: 1,
            result_num_len: 4,
            id0_addr: 2,
            id1_addr: 3,
            offset_addr: 4,
            distance_addr: 5,
            data_len: 16,
            ret: -9,
        };
        let bytes = result.to_bytes();
        assert_eq!(bytes.len(), RawSearchResult::SIZE);
        assert_eq!(&bytes[RawSearchResult::RET_OFFSET..], &(-9i32).to_le_bytes());
    }

    #[test]
    fn test_search_input_nests_table_and_range() {
        let input = RawSearchInput {
            table: RawQueryTable { query_count: 2, entry_len: 32768, data_addr: 9, data_len: 65536 },
            range: RawRepoRange { id0_min: 1, id0_max: 2, id1_min: 3, id1_max: 4, ret: -2 },
            top_k: 100,
        };
        let bytes = input.to_bytes();
        assert_eq!(bytes.len(), RawQueryTable::SIZE + RawRepoRange::SIZE + 4);
        assert_eq!(&bytes[40..44], &100u32.to_le_bytes());
        assert_eq!(RawSearchInput::decode(&bytes).unwrap(), input);
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let err = RawRepoRange::decode(&[0u8; 19]).unwrap_err();
        assert!(err.is_invalid_param());
    }
}
