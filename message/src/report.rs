//! Typed views over the inbound packets the host acts on.

use std::fmt::{
    Display,
    Formatter,
};

use chrono::{
    DateTime,
    TimeZone,
    Utc,
};

use crate::{
    frame::Packet,
    header::{
        CommandNumber,
        EventNumber,
        MetadataType,
        PacketType,
    },
    history::{
        self,
        DecodedRecords,
        HistoryMetadata,
        MetadataError,
    },
};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ReportError {
    #[error("{kind} payload too short: need {need} bytes, got {got}")]
    TooShort {
        kind: &'static str,
        need: usize,
        got:  usize,
    },

    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

fn byte_at(payload: &[u8], idx: usize, kind: &'static str) -> Result<u8, ReportError> {
    payload.get(idx).copied().ok_or(ReportError::TooShort {
        kind,
        need: idx + 1,
        got: payload.len(),
    })
}

fn u32_at(payload: &[u8], idx: usize, kind: &'static str) -> Result<u32, ReportError> {
    payload
        .get(idx..idx + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(ReportError::TooShort {
            kind,
            need: idx + 4,
            got: payload.len(),
        })
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
#[display(fmt = "{}%", percent)]
pub struct BatteryLevel {
    pub percent: u8,
}

impl BatteryLevel {
    pub const OFFSET: usize = 2;

    #[inline]
    pub fn parse(payload: &[u8]) -> Result<Self, ReportError> {
        Ok(Self {
            percent: byte_at(payload, Self::OFFSET, "battery level")?,
        })
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ClockReport {
    pub unix: u32,
}

impl ClockReport {
    pub const OFFSET: usize = 2;

    #[inline]
    pub fn parse(payload: &[u8]) -> Result<Self, ReportError> {
        Ok(Self {
            unix: u32_at(payload, Self::OFFSET, "clock")?,
        })
    }

    #[inline]
    pub fn datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.unix as i64, 0).single()
    }
}

impl Display for ClockReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.datetime() {
            Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%SZ")),
            None => write!(f, "unix {}", self.unix),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct RealtimeHeartRate {
    pub bpm: u8,
}

impl RealtimeHeartRate {
    pub const OFFSET: usize = 5;

    #[inline]
    pub fn parse(payload: &[u8]) -> Result<Self, ReportError> {
        Ok(Self {
            bpm: byte_at(payload, Self::OFFSET, "realtime heart rate")?,
        })
    }
}

/// An inbound packet interpreted by type and number.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Report {
    Battery(BatteryLevel),
    Clock(ClockReport),
    HeartRate(RealtimeHeartRate),
    History(DecodedRecords),
    Metadata(HistoryMetadata),
    BatteryEvent(BatteryLevel),
    StrapError(String),
    DoubleTap,
    Console(String),
    /// Valid packet without a typed interpretation.
    Other {
        packet_type: PacketType,
        number:      u8,
    },
}

impl TryFrom<&Packet> for Report {
    type Error = ReportError;

    fn try_from(pkt: &Packet) -> Result<Self, Self::Error> {
        let payload = pkt.payload.as_ref();

        let report = match pkt.packet_type {
            PacketType::CommandResponse => match pkt.command() {
                Some(CommandNumber::GetBatteryLevel) => Self::Battery(BatteryLevel::parse(payload)?),
                Some(CommandNumber::GetClock) => Self::Clock(ClockReport::parse(payload)?),
                _ => Self::other(pkt),
            },

            PacketType::Event => match pkt.event() {
                Some(EventNumber::BatteryLevel) => {
                    Self::BatteryEvent(BatteryLevel::parse(payload)?)
                },
                Some(EventNumber::Error) => Self::StrapError(lossy_ascii(payload)),
                Some(EventNumber::DoubleTap) => Self::DoubleTap,
                _ => Self::other(pkt),
            },

            PacketType::RealtimeData => Self::HeartRate(RealtimeHeartRate::parse(payload)?),
            PacketType::HistoricalData => Self::History(history::decode_records(payload)),
            PacketType::Metadata => Self::Metadata(HistoryMetadata::try_from(pkt)?),
            PacketType::ConsoleLogs => Self::Console(lossy_ascii(payload)),

            _ => Self::other(pkt),
        };

        Ok(report)
    }
}

impl Report {
    #[inline]
    fn other(pkt: &Packet) -> Self {
        Self::Other {
            packet_type: pkt.packet_type,
            number:      pkt.command_or_event,
        }
    }

    #[inline]
    pub fn is_history_end(&self) -> bool {
        matches!(self, Self::Metadata(m) if m.kind == MetadataType::HistoryEnd)
    }
}

fn lossy_ascii(payload: &[u8]) -> String {
    String::from_utf8_lossy(payload)
        .trim_end_matches('\0')
        .to_owned()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn battery_response() {
        let pkt = Packet::new(PacketType::CommandResponse, 0, 26, vec![0, 1, 87, 0]);

        let report = Report::try_from(&pkt).unwrap();
        assert_eq!(report, Report::Battery(BatteryLevel { percent: 87 }));

        if let Report::Battery(level) = report {
            assert_eq!(level.to_string(), "87%");
        }
    }

    #[test]
    fn battery_event() {
        let pkt = Packet::new(PacketType::Event, 0, 3, vec![0, 0, 42]);
        assert_eq!(Report::try_from(&pkt), Ok(Report::BatteryEvent(BatteryLevel { percent: 42 })));
    }

    #[test]
    fn short_battery_payload() {
        let pkt = Packet::new(PacketType::CommandResponse, 0, 26, vec![0]);

        assert_eq!(
            Report::try_from(&pkt),
            Err(ReportError::TooShort {
                kind: "battery level",
                need: 3,
                got:  1,
            })
        );
    }

    #[test]
    fn clock_response() {
        let mut payload = vec![0, 1];
        payload.extend_from_slice(&1_736_703_145u32.to_le_bytes());

        let pkt = Packet::new(PacketType::CommandResponse, 0, 11, payload);
        let report = Report::try_from(&pkt).unwrap();

        match report {
            Report::Clock(clock) => {
                assert_eq!(clock.unix, 1_736_703_145);
                assert_eq!(clock.to_string(), "2025-01-12 17:32:25Z");
            },
            other => panic!("unexpected report {other:?}"),
        }
    }

    #[test]
    fn realtime_heart_rate() {
        let pkt = Packet::new(PacketType::RealtimeData, 0, 0, vec![0, 0, 0, 0, 0, 64, 1]);
        assert_eq!(Report::try_from(&pkt), Ok(Report::HeartRate(RealtimeHeartRate { bpm: 64 })));
    }

    #[test]
    fn error_event_text() {
        let pkt = Packet::new(PacketType::Event, 0, 1, b"flash fault\0\0".to_vec());
        assert_eq!(Report::try_from(&pkt), Ok(Report::StrapError("flash fault".into())));
    }

    #[test]
    fn untyped_packets() {
        let pkt = Packet::new(PacketType::Event, 0, 9, vec![]);
        assert_eq!(
            Report::try_from(&pkt),
            Ok(Report::Other {
                packet_type: PacketType::Event,
                number:      9,
            })
        );

        let pkt = Packet::new(PacketType::RealtimeImuDataStream, 0, 0, vec![1, 2, 3]);
        assert!(matches!(Report::try_from(&pkt), Ok(Report::Other { .. })));
    }

    #[test]
    fn history_end_detected() {
        let mut payload = 1u32.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 6]);
        payload.extend_from_slice(&5u32.to_le_bytes());

        let pkt = Packet::new(PacketType::Metadata, 0, 2, payload);
        assert!(Report::try_from(&pkt).unwrap().is_history_end());
    }
}
