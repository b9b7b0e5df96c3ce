use message::{
    Packet,
    PacketType,
    Report,
};

use super::{
    Session,
    SessionState,
};
use crate::gatt::Channel;

/// Receives inbound traffic and state changes.
///
/// Exactly one of `data`, `command_response` or `event` fires per valid frame. Callbacks run on
/// the transport's notification context and must hand work off rather than block.
pub trait SessionObserver: Send + Sync {
    fn data(&self, _packet: &Packet) {}

    fn command_response(&self, _command: u8, _packet: &Packet) {}

    fn event(&self, _event: u8, _packet: &Packet) {}

    /// Raw bytes from the diagnostic channel. Not protocol frames.
    fn diagnostic(&self, _raw: &[u8]) {}

    fn state_changed(&self, _from: SessionState, _to: SessionState) {}
}

/// The channel a packet type normally arrives on.
pub fn expected_channel(packet_type: PacketType) -> Channel {
    match packet_type {
        PacketType::Command => Channel::CmdToStrap,
        PacketType::CommandResponse => Channel::CmdFromStrap,
        PacketType::Event => Channel::EventsFromStrap,
        _ => Channel::DataFromStrap,
    }
}

impl Session {
    /// Decode and route one notification. Invalid frames are logged and dropped.
    pub fn dispatch(&self, origin: Channel, raw: &[u8]) {
        let observer = self.observer();

        if origin == Channel::Diagnostic {
            tracing::trace!(len = raw.len(), "diagnostic notification");

            if let Some(observer) = observer {
                observer.diagnostic(raw);
            }

            return;
        }

        let packet = match message::try_decode(raw) {
            Ok(packet) => packet,
            Err(reason) => {
                tracing::warn!(%origin, %reason, raw = %hex::encode(raw), "dropping invalid frame");
                return;
            },
        };

        let expected = expected_channel(packet.packet_type);
        if expected != origin {
            tracing::warn!(%origin, %expected, packet_type = ?packet.packet_type, "packet on unexpected channel");
        }

        tracing::trace!(%packet, "received");

        if matches!(packet.packet_type, PacketType::HistoricalData | PacketType::Metadata) {
            self.on_history(&packet);
        }

        if matches!(packet.packet_type, PacketType::CommandResponse | PacketType::Event) {
            match Report::try_from(&packet) {
                Ok(Report::Other { .. }) => {},
                Ok(report) => tracing::debug!(?report, "strap report"),
                Err(e) => tracing::warn!(error = %e, "uninterpretable report"),
            }
        }

        let observer = match observer {
            Some(observer) => observer,
            None => return,
        };

        match packet.packet_type {
            PacketType::CommandResponse | PacketType::Command => {
                observer.command_response(packet.command_or_event, &packet)
            },
            PacketType::Event => observer.event(packet.command_or_event, &packet),
            _ => observer.data(&packet),
        }
    }
}
