use chrono::{
    DateTime,
    TimeZone,
    Utc,
};
use packed_struct::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use smallvec::SmallVec;

use crate::{
    frame::Packet,
    header::{
        MetadataType,
        PacketType,
    },
};

pub const MAX_RR_INTERVALS: usize = 4;

pub type RrIntervals = SmallVec<[u16; MAX_RR_INTERVALS]>;

/// One fixed-width heart-rate sample as laid out in a historical-data payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "28", endian = "lsb")]
pub struct RawRecord {
    pub _header:   [u8; 4],
    pub unix:      u32,
    pub _reserved: [u8; 6],
    pub bpm:       u8,
    pub rr_count:  u8,
    pub rr0:       u16,
    pub rr1:       u16,
    pub rr2:       u16,
    pub rr3:       u16,
    pub activity:  u32,
}

impl RawRecord {
    pub const SIZE: usize = 28;

    #[inline]
    pub fn rr_slots(&self) -> [u16; MAX_RR_INTERVALS] {
        [self.rr0, self.rr1, self.rr2, self.rr3]
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub timestamp:    u32,
    pub bpm:          u8,
    pub rr_intervals: RrIntervals,
    pub activity_id:  u32,
}

impl HeartRateRecord {
    #[inline]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.timestamp as i64, 0).single()
    }
}

impl TryFrom<RawRecord> for HeartRateRecord {
    type Error = RawRecord;

    /// Fails when the count of nonzero RR slots disagrees with the declared count.
    fn try_from(raw: RawRecord) -> Result<Self, Self::Error> {
        let rr_intervals = raw
            .rr_slots()
            .into_iter()
            .filter(|&rr| rr != 0)
            .collect::<RrIntervals>();

        if rr_intervals.len() != raw.rr_count as usize {
            return Err(raw);
        }

        Ok(Self {
            timestamp: raw.unix,
            bpm: raw.bpm,
            rr_intervals,
            activity_id: raw.activity,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DecodedRecords {
    pub records:   Vec<HeartRateRecord>,
    /// Records dropped for an RR count mismatch.
    pub discarded: usize,
    /// Bytes after the last complete record.
    pub skipped:   usize,
}

/// Decode every complete record in a historical-data payload.
///
/// Trailing bytes too short to form a record are skipped, not treated as an error.
pub fn decode_records(payload: &[u8]) -> DecodedRecords {
    let mut out = DecodedRecords::default();

    let mut chunks = payload.chunks_exact(RawRecord::SIZE);

    for chunk in &mut chunks {
        let raw = match chunk.try_into().map(RawRecord::unpack) {
            Ok(Ok(raw)) => raw,
            _ => {
                out.discarded += 1;
                continue;
            },
        };

        match HeartRateRecord::try_from(raw) {
            Ok(record) => out.records.push(record),
            Err(raw) => {
                tracing::debug!(
                    unix = raw.unix,
                    declared = raw.rr_count,
                    "rr count mismatch, dropping record"
                );
                out.discarded += 1;
            },
        }
    }

    out.skipped = chunks.remainder().len();
    if out.skipped > 0 {
        tracing::warn!(skipped = out.skipped, "truncated historical record");
    }

    out
}

#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MetadataError {
    #[error("packet is not a metadata packet ({0:?})")]
    NotMetadata(PacketType),

    #[error("unknown metadata type 0x{0:02x}")]
    UnknownType(u8),

    #[error("metadata payload too short: {0} bytes")]
    TooShort(usize),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "14", endian = "lsb")]
struct RawMetadata {
    unix:      u32,
    _reserved: [u8; 6],
    data:      u32,
}

/// Pagination marker delimiting a chunk of historical data.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct HistoryMetadata {
    pub kind: MetadataType,
    pub unix: u32,
    /// Offset to acknowledge on `HistoryEnd`.
    pub data: u32,
}

impl HistoryMetadata {
    pub const MIN_PAYLOAD: usize = 14;

    pub fn parse(kind: MetadataType, payload: &[u8]) -> Result<Self, MetadataError> {
        let raw: &[u8; Self::MIN_PAYLOAD] = payload
            .get(..Self::MIN_PAYLOAD)
            .and_then(|b| b.try_into().ok())
            .ok_or(MetadataError::TooShort(payload.len()))?;

        let raw = RawMetadata::unpack(raw).map_err(|_| MetadataError::TooShort(payload.len()))?;

        Ok(Self {
            kind,
            unix: raw.unix,
            data: raw.data,
        })
    }
}

impl TryFrom<&Packet> for HistoryMetadata {
    type Error = MetadataError;

    fn try_from(pkt: &Packet) -> Result<Self, Self::Error> {
        if pkt.packet_type != PacketType::Metadata {
            return Err(MetadataError::NotMetadata(pkt.packet_type));
        }

        let kind = pkt
            .metadata_type()
            .ok_or(MetadataError::UnknownType(pkt.command_or_event))?;

        Self::parse(kind, &pkt.payload)
    }
}
