//! On-disk record format shared by snapshots and the write-ahead log.
//!
//! Every record is a [`RecordHeader`] followed by a fixed-size payload area
//! (`payload_size` bytes, the largest slot size of the cache). Key bytes come
//! first, then value bytes, then zero padding. Fixed-size records let a reader
//! detect a torn tail by length alone.

use std::mem::size_of;

use bytemuck::{Pod, Zeroable};

use crate::cache::tier::Tier;
use crate::persist::PersistError;

/// "KVTR"
pub const MAGIC: u32 = 0x4B56_5452;
pub const VERSION: u32 = 1;

pub const OP_PUT: u8 = 1;
pub const OP_DELETE: u8 = 2;

/// Snapshot file header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct FileHeader {
    pub magic: u32,
    pub version: u32,
    pub payload_size: u64,
    pub record_count: u64,
}

impl FileHeader {
    pub const SIZE: usize = size_of::<FileHeader>();

    pub fn new(payload_size: usize, record_count: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            payload_size: payload_size as u64,
            record_count: record_count as u64,
        }
    }

    /// Parse and validate a header from the start of `bytes`.
    pub fn parse(bytes: &[u8]) -> Result<Self, PersistError> {
        let raw = bytes.get(..Self::SIZE).ok_or(PersistError::Truncated {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        let header: FileHeader = bytemuck::pod_read_unaligned(raw);
        if header.magic != MAGIC {
            return Err(PersistError::BadMagic(header.magic));
        }
        if header.version != VERSION {
            return Err(PersistError::UnsupportedVersion(header.version));
        }
        Ok(header)
    }

    /// Payload size and total file length this header describes.
    ///
    /// A payload area larger than `limit` is rejected. Sizes that overflow
    /// `usize` saturate, so they surface as truncation against the real file.
    pub fn layout(&self, limit: usize) -> Result<(usize, usize), PersistError> {
        let payload_size = usize::try_from(self.payload_size).unwrap_or(usize::MAX);
        if payload_size > limit {
            return Err(PersistError::RecordTooLarge {
                size: payload_size,
                limit,
            });
        }
        let count = usize::try_from(self.record_count).unwrap_or(usize::MAX);
        let total = count
            .checked_mul(record_size(payload_size))
            .and_then(|body| body.checked_add(Self::SIZE))
            .unwrap_or(usize::MAX);
        Ok((payload_size, total))
    }
}

/// Per-record header.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RecordHeader {
    pub key_hash: u64,
    pub timestamp: i64,
    pub access_count: u32,
    pub key_len: u32,
    pub value_len: u32,
    pub tier: u8,
    pub op: u8,
    pub _pad: [u8; 2],
}

impl RecordHeader {
    pub const SIZE: usize = size_of::<RecordHeader>();
}

/// Size of one record for a given payload area.
pub fn record_size(payload_size: usize) -> usize {
    RecordHeader::SIZE.saturating_add(payload_size)
}

/// A decoded record borrowing its bytes from the read buffer.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    pub header: RecordHeader,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl Record<'_> {
    pub fn tier(&self) -> Result<Tier, PersistError> {
        Ok(Tier::try_from(self.header.tier)?)
    }
}

/// Append one fixed-size record to `buf`.
pub fn encode(
    buf: &mut Vec<u8>,
    header: RecordHeader,
    key: &[u8],
    value: &[u8],
    payload_size: usize,
) -> Result<(), PersistError> {
    let size = key.len() + value.len();
    if size > payload_size {
        return Err(PersistError::RecordTooLarge {
            size,
            limit: payload_size,
        });
    }
    buf.extend_from_slice(bytemuck::bytes_of(&header));
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf.resize(buf.len() + payload_size - size, 0);
    Ok(())
}

/// Decode one record from exactly `record_size(payload_size)` bytes.
pub fn decode(bytes: &[u8], payload_size: usize) -> Result<Record<'_>, PersistError> {
    let expected = record_size(payload_size);
    if bytes.len() < expected {
        return Err(PersistError::Truncated {
            expected,
            actual: bytes.len(),
        });
    }
    let header: RecordHeader = bytemuck::pod_read_unaligned(&bytes[..RecordHeader::SIZE]);
    let key_len = header.key_len as usize;
    let value_len = header.value_len as usize;
    let size = key_len.saturating_add(value_len);
    if size > payload_size {
        return Err(PersistError::RecordTooLarge {
            size,
            limit: payload_size,
        });
    }
    let payload = &bytes[RecordHeader::SIZE..expected];
    Ok(Record {
        header,
        key: &payload[..key_len],
        value: &payload[key_len..key_len + value_len],
    })
}
