//! Record log framing.
//!
//! Every mutation of the store is one frame:
//!
//! ```text
//! [len u32 LE][kind u8][flags u8][local id u64 LE][CBOR payload][crc32 LE]
//! ```
//!
//! `len` counts the whole frame including itself and the checksum. The CRC
//! covers every byte before it. A tombstone frame has an empty payload.

use crate::error::{StoreError, StoreResult};
use crate::types::{LocalId, RecordKind};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Flags byte of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);
    /// The record with this local id was deleted.
    pub const TOMBSTONE: Self = Self(0x01);

    /// Creates flags from the raw byte.
    #[must_use]
    pub const fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// Returns the raw byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self.0
    }

    /// Checks the tombstone bit.
    #[must_use]
    pub const fn is_tombstone(self) -> bool {
        self.0 & 0x01 != 0
    }
}

/// One decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Record kind.
    pub kind: RecordKind,
    /// Frame flags.
    pub flags: FrameFlags,
    /// Local id of the record written or deleted.
    pub local_id: LocalId,
    /// CBOR payload, empty for tombstones.
    pub payload: Vec<u8>,
}

/// Why a byte range could not be decoded as a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the frame needs; typical of a torn final write.
    Incomplete,
    /// The length field is impossible.
    BadLength(u32),
    /// The stored checksum does not match the bytes.
    Checksum {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },
    /// The kind byte is unknown.
    UnknownKind(u8),
}

impl Frame {
    /// Header size: len (4) + kind (1) + flags (1) + local id (8) = 14
    pub const HEADER_SIZE: usize = 14;
    /// CRC size.
    pub const CRC_SIZE: usize = 4;

    /// Builds a put frame carrying `record` as CBOR.
    pub fn put<T: Serialize>(kind: RecordKind, local_id: LocalId, record: &T) -> StoreResult<Self> {
        let mut payload = Vec::new();
        ciborium::ser::into_writer(record, &mut payload).map_err(StoreError::codec)?;
        Ok(Self {
            kind,
            flags: FrameFlags::NONE,
            local_id,
            payload,
        })
    }

    /// Builds a tombstone frame.
    #[must_use]
    pub fn tombstone(kind: RecordKind, local_id: LocalId) -> Self {
        Self {
            kind,
            flags: FrameFlags::TOMBSTONE,
            local_id,
            payload: Vec::new(),
        }
    }

    /// Returns whether this frame deletes its record.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.flags.is_tombstone()
    }

    /// Decodes the CBOR payload.
    pub fn record<T: DeserializeOwned>(&self) -> StoreResult<T> {
        ciborium::de::from_reader(self.payload.as_slice()).map_err(StoreError::codec)
    }

    /// Returns the encoded size of this frame.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.payload.len() + Self::CRC_SIZE
    }

    /// Encodes the frame.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let frame_len = self.encoded_size();
        let mut buf = Vec::with_capacity(frame_len);

        buf.extend_from_slice(&(frame_len as u32).to_le_bytes());
        buf.push(self.kind.tag());
        buf.push(self.flags.as_byte());
        buf.extend_from_slice(&self.local_id.as_u64().to_le_bytes());
        buf.extend_from_slice(&self.payload);

        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes the frame at the start of `data`.
    ///
    /// Returns the frame and the number of bytes it occupies.
    pub fn decode(data: &[u8]) -> Result<(Self, usize), FrameError> {
        if data.len() < 4 {
            return Err(FrameError::Incomplete);
        }
        let raw_len = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        let frame_len = raw_len as usize;
        if frame_len < Self::HEADER_SIZE + Self::CRC_SIZE {
            return Err(FrameError::BadLength(raw_len));
        }
        if data.len() < frame_len {
            return Err(FrameError::Incomplete);
        }

        let body = &data[..frame_len - Self::CRC_SIZE];
        let tail = &data[frame_len - Self::CRC_SIZE..frame_len];
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(FrameError::Checksum { expected, actual });
        }

        let kind = RecordKind::from_tag(data[4]).ok_or(FrameError::UnknownKind(data[4]))?;
        let flags = FrameFlags::from_byte(data[5]);
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&data[6..14]);
        let local_id = LocalId::new(u64::from_le_bytes(id_bytes));
        let payload = data[Self::HEADER_SIZE..frame_len - Self::CRC_SIZE].to_vec();

        Ok((
            Self {
                kind,
                flags,
                local_id,
                payload,
            },
            frame_len,
        ))
    }
}

/// CRC32 (IEEE polynomial) over `data`.
#[must_use]
pub fn compute_crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut bit = 0;
            while bit < 8 {
                crc = if crc & 1 != 0 {
                    (crc >> 1) ^ 0xEDB8_8320
                } else {
                    crc >> 1
                };
                bit += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
