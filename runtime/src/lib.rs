pub mod config;
pub mod gatt;
pub mod retry;
pub mod session;
pub mod sink;
pub mod transport;

pub use config::{
    SequencePolicy,
    SessionConfig,
};
pub use session::{
    Session,
    SessionError,
    SessionObserver,
    SessionState,
};
pub use sink::{
    MemorySink,
    RecordSink,
};
pub use tokio_util::sync::CancellationToken;
pub use transport::{
    DeviceRef,
    LinkEvent,
    Transport,
    TransportError,
};
