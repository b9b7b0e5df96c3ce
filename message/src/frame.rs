use std::fmt::{
    Display,
    Formatter,
};

use bytes::{
    BufMut,
    Bytes,
    BytesMut,
};
use packed_struct::prelude::*;

use crate::{
    checksum::{
        self,
        Checksum,
        PayloadCrc,
    },
    header::{
        CommandNumber,
        EventNumber,
        MetadataType,
        PacketHeader,
        PacketType,
    },
};

/// `[packet_type, sequence, command_or_event]` at the front of every inner packet.
pub const INNER_HEADER_SIZE: usize = 3;
pub const TRAILER_SIZE: usize = checksum::size::<PayloadCrc>();
pub const MIN_FRAME_SIZE: usize = PacketHeader::SIZE + TRAILER_SIZE;
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize - TRAILER_SIZE - INNER_HEADER_SIZE;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FrameError {
    #[error("payload of {0} bytes does not fit in a frame (max {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    #[error("packing frame header: {0:?}")]
    Packing(PackingError),
}

/// Why a received frame was rejected.
#[derive(thiserror::Error, Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum InvalidReason {
    #[error("frame too short for header and trailer")]
    TooShortForHeader,

    #[error("invalid start-of-frame byte")]
    InvalidStartByte,

    #[error("header crc-8 mismatch")]
    HeaderCrcMismatch,

    #[error("declared length inconsistent with frame size")]
    DeclaredLengthInconsistent,

    #[error("payload crc-32 mismatch")]
    PayloadCrcMismatch,

    #[error("unknown packet type 0x{0:02x}")]
    UnknownPacketType(u8),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Packet {
    pub packet_type:      PacketType,
    pub sequence:         u8,
    pub command_or_event: u8,
    pub payload:          Bytes,
}

impl Packet {
    #[inline]
    pub fn new(
        packet_type: PacketType,
        sequence: u8,
        command_or_event: u8,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            packet_type,
            sequence,
            command_or_event,
            payload: payload.into(),
        }
    }

    #[inline]
    pub fn encode(&self) -> Result<Bytes, FrameError> {
        encode(self.packet_type, self.sequence, self.command_or_event, &self.payload)
    }

    /// The command this packet carries or responds to, if it is a command-class packet.
    pub fn command(&self) -> Option<CommandNumber> {
        match self.packet_type {
            PacketType::Command | PacketType::CommandResponse => {
                CommandNumber::from_primitive(self.command_or_event)
            },
            _ => None,
        }
    }

    pub fn event(&self) -> Option<EventNumber> {
        match self.packet_type {
            PacketType::Event => EventNumber::from_primitive(self.command_or_event),
            _ => None,
        }
    }

    pub fn metadata_type(&self) -> Option<MetadataType> {
        match self.packet_type {
            PacketType::Metadata => MetadataType::from_primitive(self.command_or_event),
            _ => None,
        }
    }
}

impl Display for Packet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} [seq {}] 0x{:02x} / payload: 0x{}",
            self.packet_type,
            self.sequence,
            self.command_or_event,
            hex::encode(&self.payload)
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParsedPacket {
    Valid(Packet),
    Invalid(InvalidReason),
}

impl ParsedPacket {
    #[inline]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid(_))
    }

    #[inline]
    pub fn into_result(self) -> Result<Packet, InvalidReason> {
        match self {
            Self::Valid(pkt) => Ok(pkt),
            Self::Invalid(reason) => Err(reason),
        }
    }
}

impl From<Result<Packet, InvalidReason>> for ParsedPacket {
    #[inline]
    fn from(r: Result<Packet, InvalidReason>) -> Self {
        match r {
            Ok(pkt) => Self::Valid(pkt),
            Err(reason) => Self::Invalid(reason),
        }
    }
}

pub fn encode(
    packet_type: PacketType,
    sequence: u8,
    command_or_event: u8,
    payload: &[u8],
) -> Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let inner_len = INNER_HEADER_SIZE + payload.len();
    let header = PacketHeader::new((inner_len + TRAILER_SIZE) as u16);

    let mut out = BytesMut::with_capacity(MIN_FRAME_SIZE + inner_len);
    out.extend_from_slice(&header.pack().map_err(FrameError::Packing)?);

    out.put_u8(packet_type.to_primitive());
    out.put_u8(sequence);
    out.put_u8(command_or_event);
    out.extend_from_slice(payload);

    let crc = PayloadCrc::checksum_array(&out[PacketHeader::SIZE..]);
    out.extend_from_slice(&crc);

    Ok(out.freeze())
}

#[inline]
pub fn decode(src: &[u8]) -> ParsedPacket {
    try_decode(src).into()
}

pub fn try_decode(src: &[u8]) -> Result<Packet, InvalidReason> {
    if src.len() < MIN_FRAME_SIZE {
        return Err(InvalidReason::TooShortForHeader);
    }

    let (header_bytes, rest) = src.split_at(PacketHeader::SIZE);
    let header_bytes: &[u8; PacketHeader::SIZE] =
        header_bytes.try_into().map_err(|_| InvalidReason::TooShortForHeader)?;

    // only the start byte can fail to unpack
    let header = PacketHeader::unpack(header_bytes).map_err(|_| InvalidReason::InvalidStartByte)?;

    if !header.crc_valid() {
        return Err(InvalidReason::HeaderCrcMismatch);
    }

    let length = header.length as usize;
    if length > rest.len() || length < TRAILER_SIZE + INNER_HEADER_SIZE {
        return Err(InvalidReason::DeclaredLengthInconsistent);
    }

    let (inner, trailer) = rest[..length].split_at(length - TRAILER_SIZE);
    if PayloadCrc::checksum_array(inner).as_slice() != trailer {
        return Err(InvalidReason::PayloadCrcMismatch);
    }

    if rest.len() > length {
        tracing::trace!(extra = rest.len() - length, "ignoring bytes past declared frame length");
    }

    let packet_type =
        PacketType::from_primitive(inner[0]).ok_or(InvalidReason::UnknownPacketType(inner[0]))?;

    Ok(Packet {
        packet_type,
        sequence: inner[1],
        command_or_event: inner[2],
        payload: Bytes::copy_from_slice(&inner[INNER_HEADER_SIZE..]),
    })
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    fn packet_type_strategy() -> impl Strategy<Value = PacketType> {
        prop_oneof![
            Just(PacketType::Command),
            Just(PacketType::CommandResponse),
            Just(PacketType::RealtimeData),
            Just(PacketType::RealtimeRawData),
            Just(PacketType::HistoricalData),
            Just(PacketType::Event),
            Just(PacketType::Metadata),
            Just(PacketType::ConsoleLogs),
            Just(PacketType::RealtimeImuDataStream),
            Just(PacketType::HistoricalImuDataStream),
        ]
    }

    prop_compose! {
        fn packet_strategy()(
            packet_type in packet_type_strategy(),
            sequence in any::<u8>(),
            command_or_event in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..512),
        ) -> Packet {
            Packet::new(packet_type, sequence, command_or_event, payload)
        }
    }

    #[test]
    fn battery_query_layout() {
        let frame =
            encode(PacketType::Command, 0, CommandNumber::GetBatteryLevel.to_primitive(), &[])
                .unwrap();

        assert_eq!(frame.len(), 8 + 3);
        assert_eq!(frame[0], 0xaa);
        assert_eq!(&frame[1..3], &[7, 0]);
        assert_eq!(&frame[4..7], &[35, 0, 26]);
        assert_eq!(&frame[7..], PayloadCrc::checksum_array(&frame[4..7]).as_slice());
    }

    #[test]
    fn empty_payload_round_trip() {
        let frame = encode(PacketType::Event, 9, 14, &[]).unwrap();
        let pkt = try_decode(&frame).unwrap();

        assert_eq!(pkt.packet_type, PacketType::Event);
        assert_eq!(pkt.sequence, 9);
        assert_eq!(pkt.event(), Some(EventNumber::DoubleTap));
        assert!(pkt.payload.is_empty());
    }

    #[test]
    fn max_payload() {
        let payload = vec![0x5a; MAX_PAYLOAD_SIZE];
        let frame = encode(PacketType::HistoricalData, 1, 2, &payload).unwrap();
        assert_eq!(frame.len(), PacketHeader::SIZE + u16::MAX as usize);

        let pkt = try_decode(&frame).unwrap();
        assert_eq!(pkt.payload.as_ref(), &payload[..]);

        assert_eq!(
            encode(PacketType::HistoricalData, 1, 2, &vec![0; MAX_PAYLOAD_SIZE + 1]),
            Err(FrameError::PayloadTooLarge(MAX_PAYLOAD_SIZE + 1))
        );
    }

    #[test]
    fn invalid_start_byte() {
        let mut frame = encode(PacketType::Command, 0, 1, &[1, 2, 3]).unwrap().to_vec();
        frame[0] = 0xab;

        assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::InvalidStartByte));
    }

    #[test]
    fn declared_length_too_long() {
        let frame = encode(PacketType::Command, 0, 1, &[1, 2, 3]).unwrap();

        assert_eq!(
            decode(&frame[..frame.len() - 1]),
            ParsedPacket::Invalid(InvalidReason::DeclaredLengthInconsistent)
        );
    }

    #[test]
    fn declared_length_too_short_for_inner_header() {
        // length 6 leaves two inner bytes: no room for type, sequence and command
        let length: u16 = 6;
        let mut frame = vec![0xaa];
        frame.extend_from_slice(&length.to_le_bytes());
        frame.push(PacketHeader::expected_crc(length));
        frame.extend_from_slice(&[35, 0, 0, 0, 0, 0]);

        assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::DeclaredLengthInconsistent));
    }

    #[test]
    fn unknown_packet_type() {
        let mut frame = encode(PacketType::Command, 0, 1, &[]).unwrap().to_vec();
        frame[4] = 0x01;

        let crc = PayloadCrc::checksum_array(&frame[4..7]);
        frame[7..].copy_from_slice(&crc);

        assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::UnknownPacketType(0x01)));
    }

    #[test]
    fn trailing_bytes_ignored() {
        let mut frame = encode(PacketType::ConsoleLogs, 3, 0, b"hi").unwrap().to_vec();
        frame.extend_from_slice(&[0, 0, 0]);

        let pkt = try_decode(&frame).unwrap();
        assert_eq!(pkt.payload.as_ref(), b"hi");
    }

    #[test]
    fn typed_accessors() {
        let pkt = Packet::new(PacketType::Metadata, 0, 2, Bytes::new());
        assert_eq!(pkt.metadata_type(), Some(MetadataType::HistoryEnd));
        assert_eq!(pkt.command(), None);
        assert_eq!(pkt.event(), None);

        let pkt = Packet::new(PacketType::CommandResponse, 0, 26, Bytes::new());
        assert_eq!(pkt.command(), Some(CommandNumber::GetBatteryLevel));
    }

    proptest! {
        #[test]
        fn round_trip(pkt in packet_strategy()) {
            let frame = pkt.encode().unwrap();
            prop_assert_eq!(frame.len(), MIN_FRAME_SIZE + INNER_HEADER_SIZE + pkt.payload.len());
            prop_assert_eq!(decode(&frame), ParsedPacket::Valid(pkt));
        }

        #[test]
        fn truncated_never_panics(data in proptest::collection::vec(any::<u8>(), 0..MIN_FRAME_SIZE)) {
            prop_assert_eq!(decode(&data), ParsedPacket::Invalid(InvalidReason::TooShortForHeader));
        }

        #[test]
        fn header_bit_flip_detected(pkt in packet_strategy(), byte in 1usize..4, bit in 0u8..8) {
            let mut frame = pkt.encode().unwrap().to_vec();
            frame[byte] ^= 1 << bit;

            prop_assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::HeaderCrcMismatch));
        }

        #[test]
        fn trailer_bit_flip_detected(pkt in packet_strategy(), byte in 0usize..4, bit in 0u8..8) {
            let mut frame = pkt.encode().unwrap().to_vec();
            let idx = frame.len() - TRAILER_SIZE + byte;
            frame[idx] ^= 1 << bit;

            prop_assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::PayloadCrcMismatch));
        }

        #[test]
        fn inner_bit_flip_detected(pkt in packet_strategy(), offset in any::<prop::sample::Index>(), bit in 0u8..8) {
            let mut frame = pkt.encode().unwrap().to_vec();
            let inner_len = frame.len() - MIN_FRAME_SIZE;
            let idx = PacketHeader::SIZE + offset.index(inner_len);
            frame[idx] ^= 1 << bit;

            prop_assert_eq!(decode(&frame), ParsedPacket::Invalid(InvalidReason::PayloadCrcMismatch));
        }

        #[test]
        fn arbitrary_input_never_panics(data in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = decode(&data);
        }
    }
}
