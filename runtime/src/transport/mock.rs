//! In-memory [`Transport`] for exercising sessions without a radio.

use std::{
    sync::{
        atomic::{
            AtomicUsize,
            Ordering,
        },
        Mutex,
        MutexGuard,
    },
    time::Duration,
};

use bytes::Bytes;
use fnv::{
    FnvHashMap,
    FnvHashSet,
};
use message::Packet;
use tokio::sync::{
    broadcast,
    Notify,
};
use uuid::Uuid;

use super::*;
use crate::gatt::{
    self,
    Channel,
};

#[derive(Clone, Debug, Default)]
pub struct Knobs {
    pub fail_connect:    bool,
    pub already_bonded:  bool,
    /// Bond requests succeed but the strap never reports bonded.
    pub refuse_bond:     bool,
    pub missing_service: bool,
    pub missing:         FnvHashSet<Channel>,
    pub fail_subscribe:  FnvHashSet<Channel>,
    pub fail_writes:     bool,
    pub connect_delay:   Duration,
    pub write_delay:     Duration,
}

#[derive(Default)]
struct State {
    knobs:        Knobs,
    bond:         Option<BondState>,
    handlers:     FnvHashMap<Uuid, NotificationHandler>,
    writes:       Vec<Bytes>,
    unsubscribed: Vec<Uuid>,
}

pub struct MockTransport {
    state:            Mutex<State>,
    link:             broadcast::Sender<LinkEvent>,
    written:          Notify,
    in_flight:        AtomicUsize,
    max_in_flight:    AtomicUsize,
    connect_calls:    AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new(Knobs::default())
    }
}

impl MockTransport {
    pub fn new(knobs: Knobs) -> Self {
        let (link, _) = broadcast::channel(16);

        Self {
            state: Mutex::new(State {
                knobs,
                ..Default::default()
            }),
            link,
            written: Notify::new(),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_knobs(&self, f: impl FnOnce(&mut Knobs)) {
        f(&mut self.lock().knobs);
    }

    /// Deliver `data` to the handler subscribed on `channel`. Returns false if none is.
    pub fn notify(&self, channel: Channel, data: impl Into<Bytes>) -> bool {
        let handler = self.lock().handlers.get(&channel.uuid()).cloned();

        match handler {
            Some(handler) => {
                handler(data.into());
                true
            },
            None => false,
        }
    }

    pub fn emit(&self, event: LinkEvent) {
        let _ = self.link.send(event);
    }

    /// Live receivers of link events.
    pub fn link_listeners(&self) -> usize {
        self.link.receiver_count()
    }

    pub fn is_subscribed(&self, channel: Channel) -> bool {
        self.lock().handlers.contains_key(&channel.uuid())
    }

    pub fn subscriptions(&self) -> usize {
        self.lock().handlers.len()
    }

    pub fn unsubscribed(&self) -> Vec<Uuid> {
        self.lock().unsubscribed.clone()
    }

    pub fn writes(&self) -> Vec<Bytes> {
        self.lock().writes.clone()
    }

    /// Every write decoded as a frame; undecodable writes are skipped.
    pub fn packets(&self) -> Vec<Packet> {
        self.writes()
            .iter()
            .filter_map(|w| message::try_decode(w).ok())
            .collect()
    }

    pub fn commands(&self) -> Vec<message::CommandNumber> {
        self.packets().iter().filter_map(Packet::command).collect()
    }

    pub async fn wait_for_writes(&self, n: usize) {
        loop {
            let notified = self.written.notified();

            if self.lock().writes.len() >= n {
                return;
            }

            notified.await;
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _device: &DeviceRef, params: ConnectParams) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);

        let (delay, fail) = {
            let s = self.lock();
            (s.knobs.connect_delay, s.knobs.fail_connect)
        };

        tokio::time::sleep(delay).await;

        if fail || params.auto_reconnect || !params.force_low_energy {
            return Err(TransportError::Other("connect refused".into()));
        }

        self.emit(LinkEvent::Connected);
        Ok(())
    }

    async fn bond_state(&self, _device: &DeviceRef) -> Result<BondState, TransportError> {
        let s = self.lock();

        Ok(match s.bond {
            Some(state) => state,
            None if s.knobs.already_bonded => BondState::Bonded,
            None => BondState::None,
        })
    }

    async fn bond(&self, _device: &DeviceRef) -> Result<(), TransportError> {
        let mut s = self.lock();

        s.bond = Some(if s.knobs.refuse_bond {
            BondState::Bonding
        } else {
            BondState::Bonded
        });

        Ok(())
    }

    async fn discover_service(&self, _device: &DeviceRef, service: Uuid) -> Result<Service, TransportError> {
        if self.lock().knobs.missing_service || service != gatt::SERVICE {
            return Err(TransportError::ServiceNotFound(service));
        }

        Ok(Service {
            uuid: service,
        })
    }

    async fn characteristic(
        &self,
        service: &Service,
        uuid: Uuid,
    ) -> Result<Option<Characteristic>, TransportError> {
        let channel = match Channel::from_uuid(uuid) {
            Some(c) if !self.lock().knobs.missing.contains(&c) => c,
            _ => return Ok(None),
        };

        Ok(Some(Characteristic {
            service: service.uuid,
            uuid,
            properties: Properties {
                write:  !channel.notifies(),
                notify: channel.notifies(),
            },
        }))
    }

    async fn subscribe(
        &self,
        characteristic: &Characteristic,
        handler: NotificationHandler,
    ) -> Result<(), TransportError> {
        let mut s = self.lock();

        let failing = Channel::from_uuid(characteristic.uuid)
            .map(|c| s.knobs.fail_subscribe.contains(&c))
            .unwrap_or(false);

        if failing {
            return Err(TransportError::Other("subscribe rejected".into()));
        }

        if !characteristic.properties.notify {
            return Err(TransportError::Unsupported(characteristic.uuid));
        }

        s.handlers.insert(characteristic.uuid, handler);
        Ok(())
    }

    async fn unsubscribe(&self, characteristic: &Characteristic) -> Result<(), TransportError> {
        let mut s = self.lock();

        s.handlers.remove(&characteristic.uuid);
        s.unsubscribed.push(characteristic.uuid);

        Ok(())
    }

    async fn write(&self, characteristic: &Characteristic, data: &[u8]) -> Result<(), TransportError> {
        if !characteristic.properties.write {
            return Err(TransportError::Unsupported(characteristic.uuid));
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let (delay, fail) = {
            let s = self.lock();
            (s.knobs.write_delay, s.knobs.fail_writes)
        };

        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if fail {
            return Err(TransportError::Other("write rejected".into()));
        }

        self.lock().writes.push(Bytes::copy_from_slice(data));
        self.written.notify_waiters();

        Ok(())
    }

    async fn disconnect(&self, _device: &DeviceRef) -> Result<(), TransportError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.lock().handlers.clear();

        self.emit(LinkEvent::Disconnected);
        Ok(())
    }

    fn link_events(&self) -> broadcast::Receiver<LinkEvent> {
        self.link.subscribe()
    }
}
