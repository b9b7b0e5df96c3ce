use packed_struct::{
    prelude::*,
    PackedStructInfo,
    PackingResult,
};

use crate::checksum::{
    Checksum,
    HeaderCrc,
};

/// The marker byte opening every frame. Unpacks only from `0xAA`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct StartOfFrame;

impl StartOfFrame {
    pub const BYTE: u8 = 0xaa;
}

impl PackedStruct for StartOfFrame {
    type ByteArray = [u8; 1];

    #[inline]
    fn pack(&self) -> PackingResult<Self::ByteArray> {
        Ok([Self::BYTE])
    }

    fn unpack(src: &Self::ByteArray) -> PackingResult<Self> {
        match src[0] {
            Self::BYTE => Ok(Self),
            got => {
                tracing::trace!(got, "not a start-of-frame byte");
                Err(PackingError::InvalidValue)
            },
        }
    }
}

impl PackedStructInfo for StartOfFrame {
    #[inline]
    fn packed_bits() -> usize {
        8
    }
}

/// The four bytes preceding every inner packet on the wire.
///
/// `length` counts the inner packet plus the trailing CRC-32. `crc` is the CRC-8 of the two
/// little-endian length bytes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PackedStruct)]
#[packed_struct(bit_numbering = "msb0", size_bytes = "4", endian = "lsb")]
pub struct PacketHeader {
    #[packed_field(size_bytes = "1")]
    pub start:  StartOfFrame,
    pub length: u16,
    pub crc:    u8,
}

impl PacketHeader {
    pub const SIZE: usize = 4;

    #[inline]
    pub fn new(length: u16) -> Self {
        Self {
            start: StartOfFrame,
            length,
            crc: Self::expected_crc(length),
        }
    }

    #[inline]
    pub fn expected_crc(length: u16) -> u8 {
        HeaderCrc::checksum(&length.to_le_bytes())
    }

    #[inline]
    pub fn crc_valid(&self) -> bool {
        self.crc == Self::expected_crc(self.length)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8)]
#[repr(u8)]
pub enum PacketType {
    Command                 = 35,
    CommandResponse         = 36,
    RealtimeData            = 40,
    RealtimeRawData         = 43,
    HistoricalData          = 47,
    Event                   = 48,
    Metadata                = 49,
    ConsoleLogs             = 50,
    RealtimeImuDataStream   = 51,
    HistoricalImuDataStream = 52,
}

impl PacketType {
    /// Packets delivered to the data observer rather than the command or event observers.
    #[inline]
    pub fn is_data(self) -> bool {
        !matches!(self, Self::Command | Self::CommandResponse | Self::Event)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8)]
#[repr(u8)]
pub enum MetadataType {
    HistoryStart    = 1,
    HistoryEnd      = 2,
    HistoryComplete = 3,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8)]
#[repr(u8)]
pub enum CommandNumber {
    LinkValid                 = 1,
    GetMaxProtocolVersion     = 2,
    ToggleRealtimeHr          = 3,
    ReportVersionInfo         = 7,
    SetClock                  = 10,
    GetClock                  = 11,
    ToggleGenericHrProfile    = 14,
    ToggleR7DataCollection    = 16,
    RunHapticPatternMaverick  = 19,
    AbortHistoricalTransmits  = 20,
    SendHistoricalData        = 22,
    HistoricalDataResult      = 23,
    GetBatteryLevel           = 26,
    RebootStrap               = 29,
    PowerCycleStrap           = 32,
    SetReadPointer            = 33,
    GetDataRange              = 34,
    GetHelloHarvard           = 35,
    SetAlarmTime              = 66,
    GetAlarmTime              = 67,
    RunAlarm                  = 68,
    DisableAlarm              = 69,
    GetAdvertisingNameHarvard = 76,
    SetAdvertisingNameHarvard = 77,
    RunHapticsPattern         = 79,
    StartRawData              = 81,
    StopRawData               = 82,
    GetBodyLocationAndStatus  = 84,
    EnterHighFreqSync         = 96,
    ExitHighFreqSync          = 97,
    GetExtendedBatteryInfo    = 98,
    ResetFuelGauge            = 99,
    ToggleImuModeHistorical   = 105,
    ToggleImuMode             = 106,
    StopHaptics               = 122,
    SelectWrist               = 123,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PrimitiveEnum_u8)]
#[repr(u8)]
pub enum EventNumber {
    Undefined            = 0,
    Error                = 1,
    ConsoleOutput        = 2,
    BatteryLevel         = 3,
    SystemControl        = 4,
    External5vOn         = 5,
    External5vOff        = 6,
    ChargingOn           = 7,
    ChargingOff          = 8,
    WristOn              = 9,
    WristOff             = 10,
    BleConnectionUp      = 11,
    BleConnectionDown    = 12,
    RtcLost              = 13,
    DoubleTap            = 14,
    Boot                 = 15,
    SetRtc               = 16,
    TemperatureLevel     = 17,
    PairingMode          = 18,
    SerialHeadConnected  = 19,
    SerialHeadRemoved    = 20,
    BatteryPackConnected = 21,
    BatteryPackRemoved   = 22,
    BleBonded            = 23,
    BleHrProfileEnabled  = 24,
    BleHrProfileDisabled = 25,
    TrimAllData          = 26,
    TrimAllDataEnded     = 27,
    FlashInitComplete    = 28,
    StrapConditionReport = 29,
    BootReport           = 30,
    ExitVirginMode       = 31,
    HighFreqSyncPrompt   = 96,
    HighFreqSyncEnabled  = 97,
    HighFreqSyncDisabled = 98,
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn header_layout() {
        let header = PacketHeader::new(7);
        let packed = header.pack().unwrap();

        assert_eq!(packed[0], 0xaa);
        assert_eq!(&packed[1..3], &[7, 0]);
        assert_eq!(packed[3], HeaderCrc::checksum(&[7, 0]));
    }

    proptest! {
        #[test]
        fn only_aa_starts_a_frame(b in any::<u8>()) {
            let res = StartOfFrame::unpack(&[b]);
            prop_assert_eq!(res.is_ok(), b == 0xaa);
        }
    }

    #[test]
    fn bad_start_byte_rejected() {
        assert_eq!(PacketHeader::unpack(&[0xab, 7, 0, 0x15]), Err(PackingError::InvalidValue));
    }

    #[test]
    fn data_classification() {
        assert!(PacketType::HistoricalData.is_data());
        assert!(PacketType::Metadata.is_data());
        assert!(PacketType::ConsoleLogs.is_data());
        assert!(!PacketType::CommandResponse.is_data());
        assert!(!PacketType::Event.is_data());
    }

    proptest! {
        #[test]
        fn pack_unpack_equivalence(length in any::<u16>()) {
            let header = PacketHeader::new(length);
            let packed = header.pack().unwrap();
            let unpacked = PacketHeader::unpack(&packed).unwrap();

            prop_assert_eq!(header, unpacked);
            prop_assert!(unpacked.crc_valid());
        }

        #[test]
        fn unpack_pack_equivalence(data in any::<[u8; 4]>()) {
            if let Ok(hdr) = PacketHeader::unpack(&data) {
                prop_assert_eq!(Ok(data), hdr.pack());
            }
        }
    }
}
