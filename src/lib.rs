//! Host-side driver for a wearable heart-rate strap over BLE.
//!
//! [`message`] holds the wire format: framing, the command catalog and decoders for what the
//! strap sends back. [`runtime`] holds the [`Session`] state machine that connects, handshakes
//! and pulls historical records through a [`Transport`] into a [`RecordSink`].

pub mod trace;

pub use message;
pub use runtime::{
    self,
    DeviceRef,
    RecordSink,
    Session,
    SessionConfig,
    SessionError,
    SessionObserver,
    SessionState,
    Transport,
};
pub use util;
