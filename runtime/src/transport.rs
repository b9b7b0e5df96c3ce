use std::{
    fmt::{
        Debug,
        Display,
        Formatter,
    },
    sync::Arc,
};

use bytes::Bytes;
use tokio::sync::broadcast;
use uuid::Uuid;

#[cfg(feature = "mock")]
pub mod mock;

/// Callback invoked by the transport for every notification on a subscribed characteristic.
///
/// May be called from any thread; must not block.
pub type NotificationHandler = Arc<dyn Fn(Bytes) + Send + Sync>;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DeviceRef {
    pub id:   String,
    pub name: Option<String>,
}

impl DeviceRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id:   id.into(),
            name: None,
        }
    }

    pub fn named(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id:   id.into(),
            name: Some(name.into()),
        }
    }
}

impl Display for DeviceRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.name {
            Some(ref name) => write!(f, "{} ({})", name, self.id),
            None => f.write_str(&self.id),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectParams {
    pub auto_reconnect:   bool,
    pub force_low_energy: bool,
}

impl Default for ConnectParams {
    fn default() -> Self {
        Self {
            auto_reconnect:   false,
            force_low_energy: true,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum BondState {
    None,
    Bonding,
    Bonded,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Service {
    pub uuid: Uuid,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Properties {
    pub write:  bool,
    pub notify: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub service:    Uuid,
    pub uuid:       Uuid,
    pub properties: Properties,
}

impl Debug for Characteristic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}{}{}",
            self.uuid,
            if self.properties.write { " +w" } else { "" },
            if self.properties.notify { " +n" } else { "" },
        )
    }
}

/// Link state changes reported by the transport independently of any request.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    ConnectionLost,
}

impl LinkEvent {
    #[inline]
    pub fn is_loss(self) -> bool {
        matches!(self, LinkEvent::Disconnected | LinkEvent::ConnectionLost)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("device not connected")]
    NotConnected,

    #[error("service {0} not found")]
    ServiceNotFound(Uuid),

    #[error("characteristic {0} does not support this operation")]
    Unsupported(Uuid),

    #[error("operation timed out")]
    Timeout,

    #[error("transport failure: {0}")]
    Other(String),
}

/// The radio-side primitives a session is driven over.
///
/// Implementations own scanning, pairing and retransmission. The session only sequences calls.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, device: &DeviceRef, params: ConnectParams) -> Result<(), TransportError>;

    async fn bond_state(&self, device: &DeviceRef) -> Result<BondState, TransportError>;

    async fn bond(&self, device: &DeviceRef) -> Result<(), TransportError>;

    async fn discover_service(&self, device: &DeviceRef, service: Uuid) -> Result<Service, TransportError>;

    /// `Ok(None)` if the service exposes no characteristic with this identifier.
    async fn characteristic(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Option<Characteristic>, TransportError>;

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
        handler: NotificationHandler,
    ) -> Result<(), TransportError>;

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), TransportError>;

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), TransportError>;

    async fn disconnect(&self, device: &DeviceRef) -> Result<(), TransportError>;

    fn link_events(&self) -> broadcast::Receiver<LinkEvent>;
}
