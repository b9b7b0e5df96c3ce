use bytes::Bytes;
use packed_struct::prelude::*;
use smallvec::SmallVec;

use crate::{
    frame::{
        self,
        FrameError,
    },
    header::{
        CommandNumber,
        PacketType,
    },
};

pub type Payload = SmallVec<[u8; 16]>;

/// Every outbound request the host issues to the strap.
///
/// The catalog is stateless: the sequence number is supplied by the caller at encode time.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    GetBatteryLevel,
    ToggleRealtimeHr { enable: bool },
    ReportVersionInfo,
    SetClock { unix: u32 },
    GetClock,
    SetAlarm { unix: u32 },
    DisableAlarm,
    SetReadPointer { unix: u32 },
    SendHistoricalData { start: bool },
    AbortHistoricalTransmits,
    /// Acknowledges a `HistoryEnd` metadata packet, releasing the next chunk from `offset`.
    HistoricalDataResult { start: bool, offset: u32 },
    Reboot,
    GetDeviceName,
    Hello,
    EnterHighFreqSync,
    ExitHighFreqSync,
}

impl Command {
    /// Zero bytes trailing the timestamp in a clock-set request.
    pub const CLOCK_PADDING: usize = 5;

    #[inline]
    pub fn number(&self) -> CommandNumber {
        match self {
            Self::GetBatteryLevel => CommandNumber::GetBatteryLevel,
            Self::ToggleRealtimeHr { .. } => CommandNumber::ToggleRealtimeHr,
            Self::ReportVersionInfo => CommandNumber::ReportVersionInfo,
            Self::SetClock { .. } => CommandNumber::SetClock,
            Self::GetClock => CommandNumber::GetClock,
            Self::SetAlarm { .. } => CommandNumber::SetAlarmTime,
            Self::DisableAlarm => CommandNumber::DisableAlarm,
            Self::SetReadPointer { .. } => CommandNumber::SetReadPointer,
            Self::SendHistoricalData { .. } => CommandNumber::SendHistoricalData,
            Self::AbortHistoricalTransmits => CommandNumber::AbortHistoricalTransmits,
            Self::HistoricalDataResult { .. } => CommandNumber::HistoricalDataResult,
            Self::Reboot => CommandNumber::RebootStrap,
            Self::GetDeviceName => CommandNumber::GetAdvertisingNameHarvard,
            Self::Hello => CommandNumber::GetHelloHarvard,
            Self::EnterHighFreqSync => CommandNumber::EnterHighFreqSync,
            Self::ExitHighFreqSync => CommandNumber::ExitHighFreqSync,
        }
    }

    pub fn payload(&self) -> Payload {
        let mut out = Payload::new();

        match *self {
            Self::ToggleRealtimeHr {
                enable,
            } => out.push(enable as u8),

            Self::SetClock {
                unix,
            } => {
                out.extend_from_slice(&unix.to_le_bytes());
                out.extend_from_slice(&[0; Self::CLOCK_PADDING]);
            },

            Self::SetAlarm {
                unix,
            }
            | Self::SetReadPointer {
                unix,
            } => out.extend_from_slice(&unix.to_le_bytes()),

            Self::SendHistoricalData {
                start,
            } => out.push(start as u8),

            Self::HistoricalDataResult {
                start,
                offset,
            } => {
                out.push(start as u8);
                out.extend_from_slice(&offset.to_le_bytes());
                out.extend_from_slice(&[0; 4]);
            },

            Self::GetBatteryLevel
            | Self::ReportVersionInfo
            | Self::GetClock
            | Self::DisableAlarm
            | Self::AbortHistoricalTransmits
            | Self::Reboot
            | Self::GetDeviceName
            | Self::Hello
            | Self::EnterHighFreqSync
            | Self::ExitHighFreqSync => {},
        }

        out
    }

    #[inline]
    pub fn encode(&self, sequence: u8) -> Result<Bytes, FrameError> {
        frame::encode(PacketType::Command, sequence, self.number().to_primitive(), &self.payload())
    }

    /// Acknowledgement for a `HistoryEnd` carrying `offset`.
    #[inline]
    pub fn history_end_ack(offset: u32) -> Self {
        Self::HistoricalDataResult {
            start: true,
            offset,
        }
    }
}
