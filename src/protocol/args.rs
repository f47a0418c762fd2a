//! Kernel argument buffers.
//!
//! Layout, all little-endian:
//!
//! ```text
//! ParamHead   { length: u32, io_addr_num: u32, ext_info_len: u32, ext_info_addr: u64 }
//! IoAddr[io_addr_num]         8 bytes each
//! Scalars                     4 bytes each, fixed order per kernel
//! ```
//!
//! Callers never see offsets. [`ArgsBuilder`] computes the full length up
//! front from the address and scalar counts, writes the head, then accepts
//! the addresses followed by the scalars.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FvError, Result};
use crate::runtime::DevicePtr;

/// Size of the packed parameter head.
pub const PARAM_HEAD_SIZE: usize = 20;
/// Size of one device address.
pub const IO_ADDR_SIZE: usize = 8;
/// Size of one scalar field.
pub const SCALAR_SIZE: usize = 4;

/// Byte offset of the first scalar field.
pub const fn scalars_offset(io_addr_count: usize) -> usize {
    PARAM_HEAD_SIZE + io_addr_count * IO_ADDR_SIZE
}

/// Total buffer length for a kernel taking the given fields.
pub const fn args_len(io_addr_count: usize, scalar_count: usize) -> usize {
    scalars_offset(io_addr_count) + scalar_count * SCALAR_SIZE
}

/// Argument shape of one retrieval kernel: address slots, then scalars, in
/// buffer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelSignature {
    pub io_addrs: &'static [&'static str],
    pub scalars: &'static [&'static str],
}

impl KernelSignature {
    pub const fn args_len(&self) -> usize {
        args_len(self.io_addrs.len(), self.scalars.len())
    }

    pub fn builder(&self) -> ArgsBuilder {
        ArgsBuilder::new(self.io_addrs.len(), self.scalars.len())
    }
}

pub const INIT_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["initPara"],
    scalars: &[],
};

pub const RELEASE_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["retCode"],
    scalars: &[],
};

pub const REPO_ADD_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["featureInfo"],
    scalars: &["searchType", "signalId", "batchCount", "batchOffset"],
};

pub const REPO_DEL_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["repoRange"],
    scalars: &["searchType", "signalId"],
};

pub const ACCURATE_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["featureInfo"],
    scalars: &["accurateKind", "signalId"],
};

pub const SEARCH_ARGS: KernelSignature = KernelSignature {
    io_addrs: &["searchInput", "searchResult"],
    scalars: &["searchType", "signalId", "queryNum", "queryIndex"],
};

/// Cursor-tracking builder for one kernel argument buffer.
#[derive(Debug)]
pub struct ArgsBuilder {
    buf: BytesMut,
    capacity: usize,
    io_addr_count: usize,
    addrs_written: usize,
}

impl ArgsBuilder {
    /// Start a buffer for `io_addr_count` addresses and `scalar_count`
    /// scalar fields. The head is written immediately.
    pub fn new(io_addr_count: usize, scalar_count: usize) -> Self {
        let capacity = args_len(io_addr_count, scalar_count);
        let mut buf = BytesMut::with_capacity(capacity);
        buf.put_u32_le(capacity as u32);
        buf.put_u32_le(io_addr_count as u32);
        buf.put_u32_le(0); // ext info length
        buf.put_u64_le(0); // ext info address
        Self {
            buf,
            capacity,
            io_addr_count,
            addrs_written: 0,
        }
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let needed = self.buf.len() + bytes;
        if needed > self.capacity {
            return Err(FvError::ArgsOverflow {
                needed,
                capacity: self.capacity,
            });
        }
        Ok(())
    }

    /// Append the next device address.
    pub fn push_addr(&mut self, addr: DevicePtr) -> Result<&mut Self> {
        if self.addrs_written == self.io_addr_count {
            return Err(FvError::ArgsOverflow {
                needed: scalars_offset(self.addrs_written + 1),
                capacity: scalars_offset(self.io_addr_count),
            });
        }
        self.reserve(IO_ADDR_SIZE)?;
        self.buf.put_u64_le(addr.addr());
        self.addrs_written += 1;
        Ok(self)
    }

    /// Append the next scalar field. All addresses must already be written.
    pub fn push_u32(&mut self, value: u32) -> Result<&mut Self> {
        if self.addrs_written != self.io_addr_count {
            return Err(FvError::ArgsOverflow {
                needed: scalars_offset(self.io_addr_count),
                capacity: self.buf.len(),
            });
        }
        self.reserve(SCALAR_SIZE)?;
        self.buf.put_u32_le(value);
        Ok(self)
    }

    /// Seal the buffer. Unwritten trailing scalars stay zero.
    pub fn finish(mut self) -> Result<KernelArgs> {
        if self.addrs_written != self.io_addr_count {
            return Err(FvError::ArgsOverflow {
                needed: scalars_offset(self.io_addr_count),
                capacity: self.buf.len(),
            });
        }
        self.buf.resize(self.capacity, 0);
        Ok(KernelArgs {
            bytes: self.buf.freeze(),
        })
    }
}

/// A sealed argument buffer, ready for launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelArgs {
    bytes: Bytes,
}

impl KernelArgs {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Decoded view of an argument buffer, as the device side reads it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgsView {
    pub length: u32,
    pub io_addrs: Vec<u64>,
    pub scalars: Vec<u32>,
}

impl ArgsView {
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() < PARAM_HEAD_SIZE {
            return Err(FvError::invalid("args", "shorter than parameter head"));
        }
        let mut cur = raw;
        let length = cur.get_u32_le();
        let io_addr_num = cur.get_u32_le() as usize;
        let _ext_len = cur.get_u32_le();
        let _ext_addr = cur.get_u64_le();

        if length as usize != raw.len() {
            return Err(FvError::invalid(
                "args",
                format!("head length {} does not match buffer length {}", length, raw.len()),
            ));
        }
        let scalar_bytes = raw
            .len()
            .checked_sub(scalars_offset(io_addr_num))
            .ok_or_else(|| FvError::invalid("args", "address table runs past buffer end"))?;
        if scalar_bytes % SCALAR_SIZE != 0 {
            return Err(FvError::invalid("args", "scalar section is not 4-byte aligned"));
        }

        let io_addrs = (0..io_addr_num).map(|_| cur.get_u64_le()).collect();
        let scalars = (0..scalar_bytes / SCALAR_SIZE).map(|_| cur.get_u32_le()).collect();
        Ok(Self {
            length,
            io_addrs,
            scalars,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_scalar_offset_two_addrs() {
        let mut b = ArgsBuilder::new(2, 4);
        b.push_addr(DevicePtr(0xAA)).unwrap();
        b.push_addr(DevicePtr(0xBB)).unwrap();
        b.push_u32(7).unwrap();
        let args = b.finish().unwrap();

        let off = PARAM_HEAD_SIZE + 2 * IO_ADDR_SIZE;
        assert_eq!(scalars_offset(2), off);
        assert_eq!(&args.as_bytes()[off..off + 4], &7u32.to_le_bytes());
        assert_eq!(args.len(), off + 4 * SCALAR_SIZE);
    }

    #[test]
    fn test_head_fields() {
        let mut b = ArgsBuilder::new(1, 2);
        b.push_addr(DevicePtr(0x1000)).unwrap();
        b.push_u32(1).unwrap().push_u32(42).unwrap();
        let args = b.finish().unwrap();
        let raw = args.as_bytes();
        assert_eq!(&raw[0..4], &(args.len() as u32).to_le_bytes());
        assert_eq!(&raw[4..8], &1u32.to_le_bytes());
        assert_eq!(&raw[8..20], &[0u8; 12]);
        assert_eq!(&raw[20..28], &0x1000u64.to_le_bytes());

        let view = ArgsView::parse(raw).unwrap();
        assert_eq!(view.io_addrs, vec![0x1000]);
        assert_eq!(view.scalars, vec![1, 42]);
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut b = ArgsBuilder::new(1, 1);
        b.push_addr(DevicePtr(1)).unwrap();
        b.push_u32(1).unwrap();
        let err = b.push_u32(2).unwrap_err();
        assert!(matches!(err, FvError::ArgsOverflow { needed: 36, capacity: 32 }));

        let mut b = ArgsBuilder::new(1, 0);
        b.push_addr(DevicePtr(1)).unwrap();
        assert!(b.push_addr(DevicePtr(2)).is_err());
    }

    #[test]
    fn test_scalar_before_addresses_rejected() {
        let mut b = ArgsBuilder::new(1, 1);
        assert!(b.push_u32(5).is_err());
        assert!(ArgsBuilder::new(2, 0).finish().is_err());
    }

    #[test]
    fn test_unwritten_scalars_are_zero() {
        let mut b = ArgsBuilder::new(1, 3);
        b.push_addr(DevicePtr(9)).unwrap();
        b.push_u32(4).unwrap();
        let view = ArgsView::parse(b.finish().unwrap().as_bytes()).unwrap();
        assert_eq!(view.scalars, vec![4, 0, 0]);
    }

    #[test]
    fn test_signature_lengths() {
        assert_eq!(INIT_ARGS.args_len(), 28);
        assert_eq!(REPO_ADD_ARGS.args_len(), 44);
        assert_eq!(REPO_DEL_ARGS.args_len(), 36);
        assert_eq!(SEARCH_ARGS.args_len(), 52);
        let mut b = SEARCH_ARGS.builder();
        b.push_addr(DevicePtr(1)).unwrap().push_addr(DevicePtr(2)).unwrap();
        assert_eq!(b.finish().unwrap().len(), SEARCH_ARGS.args_len());
    }

    #[test]
    fn test_parse_rejects_bad_length() {
        let mut b = ArgsBuilder::new(0, 1);
        b.push_u32(1).unwrap();
        let mut raw = b.finish().unwrap().as_bytes().to_vec();
        raw.push(0);
        assert!(ArgsView::parse(&raw).is_err());
        assert!(ArgsView::parse(&[0u8; 8]).is_err());
    }
}
