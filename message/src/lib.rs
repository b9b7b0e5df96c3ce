pub mod checksum;
pub mod command;
pub mod frame;
pub mod header;
pub mod history;
pub mod report;

pub use checksum::Checksum;
pub use command::Command;
pub use frame::{
    decode,
    encode,
    try_decode,
    FrameError,
    InvalidReason,
    Packet,
    ParsedPacket,
};
pub use header::{
    CommandNumber,
    EventNumber,
    MetadataType,
    PacketHeader,
    PacketType,
    StartOfFrame,
};
pub use history::{
    HeartRateRecord,
    HistoryMetadata,
};
pub use report::Report;
