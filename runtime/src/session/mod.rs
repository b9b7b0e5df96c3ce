use std::{
    collections::BTreeMap,
    future::Future,
    sync::{
        atomic::{
            AtomicBool,
            AtomicU8,
            Ordering,
        },
        Arc,
        Mutex,
        MutexGuard,
        Weak,
    },
    time::Duration,
};

use bytes::Bytes;
use futures::StreamExt;
use message::{
    Command,
    CommandNumber,
};
use tokio::sync::{
    broadcast,
    mpsc,
};
use tokio_stream::wrappers::{
    errors::BroadcastStreamRecvError,
    BroadcastStream,
};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{
        SequencePolicy,
        SessionConfig,
    },
    gatt::{
        self,
        Channel,
    },
    sink::RecordSink,
    transport::{
        BondState,
        Characteristic,
        ConnectParams,
        DeviceRef,
        LinkEvent,
        NotificationHandler,
        Transport,
        TransportError,
    },
};

mod dispatch;
mod sync;

pub use dispatch::SessionObserver;
use sync::{
    HistoricalSync,
    SyncAction,
};

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, derive_more::Display)]
pub enum SessionState {
    Idle,
    Connecting,
    Bonding,
    DiscoveringServices,
    SubscribingNotifications,
    Ready,
    Disconnecting,
    Disconnected,
    Failed,
}

impl SessionState {
    #[inline]
    pub fn accepts_commands(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::Disconnecting)
    }

    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed)
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("cannot {op} while {state}")]
    InvalidState {
        op:    &'static str,
        state: SessionState,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("interrupted by teardown while {0}")]
    Interrupted(SessionState),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("required characteristic {0} missing")]
    MissingCharacteristic(Channel),

    #[error("subscribing to {0} failed")]
    SubscriptionFailed(Channel),

    #[error("sending {0:?} failed")]
    CommandFailed(CommandNumber),

    #[error("historical sync already active")]
    SyncActive,
}

struct Shared {
    state:      SessionState,
    channels:   BTreeMap<Channel, Characteristic>,
    subscribed: Vec<(Channel, Characteristic)>,
    sync:       HistoricalSync,
    observer:   Option<Arc<dyn SessionObserver>>,
    pump:       Option<mpsc::UnboundedSender<SyncAction>>,
}

struct Inner {
    device:       DeviceRef,
    transport:    Arc<dyn Transport>,
    sink:         Arc<dyn RecordSink>,
    config:       SessionConfig,
    shared:       Mutex<Shared>,
    write_lock:   tokio::sync::Mutex<()>,
    sequence:     AtomicU8,
    tearing_down: AtomicBool,
    /// Stops background tasks and interrupts an in-progress connect.
    shutdown:     CancellationToken,
    /// Fired once teardown (or failure cleanup) has completed.
    closed:       CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // background tasks hold only weak refs; release them too
        self.shutdown.cancel();
    }
}

/// One logical connection to one strap.
///
/// Cheap to clone; clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl Session {
    pub fn new(
        transport: Arc<dyn Transport>,
        device: DeviceRef,
        sink: Arc<dyn RecordSink>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                transport,
                sink,
                config,
                shared: Mutex::new(Shared {
                    state:      SessionState::Idle,
                    channels:   BTreeMap::new(),
                    subscribed: vec![],
                    sync:       HistoricalSync::default(),
                    observer:   None,
                    pump:       None,
                }),
                write_lock: tokio::sync::Mutex::new(()),
                sequence: AtomicU8::new(0),
                tearing_down: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
                closed: CancellationToken::new(),
            }),
        }
    }

    #[inline]
    fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self {
            inner,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        match self.inner.shared.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[inline]
    pub fn device(&self) -> &DeviceRef {
        &self.inner.device
    }

    #[inline]
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    pub fn set_observer(&self, observer: Arc<dyn SessionObserver>) {
        self.lock().observer = Some(observer);
    }

    pub fn clear_observer(&self) {
        self.lock().observer = None;
    }

    fn observer(&self) -> Option<Arc<dyn SessionObserver>> {
        self.lock().observer.clone()
    }

    /// Resolves once the session has been torn down or has failed.
    pub async fn closed(&self) {
        self.inner.closed.cancelled().await
    }

    pub fn next_sequence(&self) -> u8 {
        match self.inner.config.sequence {
            SequencePolicy::Fixed(seq) => seq,
            SequencePolicy::Incrementing => self.inner.sequence.fetch_add(1, Ordering::Relaxed),
        }
    }

    fn set_state(&self, to: SessionState) -> SessionState {
        let (from, observer) = {
            let mut shared = self.lock();
            let from = std::mem::replace(&mut shared.state, to);

            (from, shared.observer.clone())
        };

        self.announce(from, to, observer);
        from
    }

    /// Move `from -> to`, failing if something else moved the state first.
    fn advance(&self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        let observer = {
            let mut shared = self.lock();

            if shared.state != from {
                return Err(SessionError::Interrupted(shared.state));
            }

            shared.state = to;
            shared.observer.clone()
        };

        self.announce(from, to, observer);
        Ok(())
    }

    fn announce(&self, from: SessionState, to: SessionState, observer: Option<Arc<dyn SessionObserver>>) {
        tracing::info!(%from, %to, device = %self.inner.device, "session state");

        if let Some(observer) = observer {
            observer.state_changed(from, to);
        }
    }

    async fn guarded<F>(&self, cancel: &CancellationToken, fut: F) -> Result<F::Output, SessionError>
    where
        F: Future,
    {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => Err(SessionError::Cancelled),
            _ = self.inner.shutdown.cancelled() => Err(SessionError::Interrupted(self.state())),
            out = fut => Ok(out),
        }
    }

    async fn pause(&self, cancel: &CancellationToken, dur: Duration) -> Result<(), SessionError> {
        self.guarded(cancel, tokio::time::sleep(dur)).await
    }

    /// Drive the session from `Idle` to `Ready`.
    ///
    /// On error the session is left `Failed`, unless a concurrent teardown owns it.
    #[tracing::instrument(skip_all, fields(device = %self.inner.device))]
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        {
            let shared = self.lock();

            if shared.state != SessionState::Idle {
                return Err(SessionError::InvalidState {
                    op:    "connect",
                    state: shared.state,
                });
            }
        }

        self.advance(SessionState::Idle, SessionState::Connecting)?;

        match self.establish(cancel).await {
            Ok(()) => {
                tracing::info!("session ready");
                Ok(())
            },
            Err(e) => {
                tracing::error!(error = %e, "session setup failed");
                self.fail().await;

                Err(e)
            },
        }
    }

    async fn establish(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let transport = &self.inner.transport;
        let device = &self.inner.device;

        self.spawn_link_watcher(transport.link_events());

        self.guarded(cancel, transport.connect(device, ConnectParams::default())).await??;

        let bonded = match self.guarded(cancel, transport.bond_state(device)).await? {
            Ok(state) => state == BondState::Bonded,
            Err(e) => {
                tracing::warn!(error = %e, "querying bond state");
                false
            },
        };

        if bonded {
            tracing::info!("already bonded");
            self.advance(SessionState::Connecting, SessionState::DiscoveringServices)?;
        } else {
            self.advance(SessionState::Connecting, SessionState::Bonding)?;
            self.bond(cancel).await?;
            self.advance(SessionState::Bonding, SessionState::DiscoveringServices)?;
        }

        self.discover(cancel).await?;
        self.advance(SessionState::DiscoveringServices, SessionState::SubscribingNotifications)?;

        self.spawn_sync_pump();
        self.subscribe_all(cancel).await?;
        self.advance(SessionState::SubscribingNotifications, SessionState::Ready)?;

        if self.inner.config.handshake {
            self.handshake(cancel).await?;
        }

        Ok(())
    }

    /// Failure to bond is not fatal: most commands work on an unbonded link.
    async fn bond(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let transport = &self.inner.transport;
        let device = &self.inner.device;

        if let Err(e) = self.guarded(cancel, transport.bond(device)).await? {
            tracing::warn!(error = %e, "bond request failed, continuing unbonded");
            return Ok(());
        }

        self.pause(cancel, self.inner.config.bond_settle()).await?;

        match self.guarded(cancel, transport.bond_state(device)).await? {
            Ok(BondState::Bonded) => tracing::info!("bonded"),
            Ok(state) => tracing::warn!(%state, "strap did not bond, continuing unbonded"),
            Err(e) => tracing::warn!(error = %e, "querying bond state after bond"),
        }

        Ok(())
    }

    async fn discover(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let transport = &self.inner.transport;

        let service = self
            .guarded(cancel, transport.discover_service(&self.inner.device, gatt::SERVICE))
            .await??;

        let mut channels = BTreeMap::new();

        for channel in Channel::ALL {
            match self.guarded(cancel, transport.characteristic(&service, channel.uuid())).await? {
                Ok(Some(characteristic)) => {
                    tracing::debug!(%channel, ?characteristic, "resolved characteristic");
                    channels.insert(channel, characteristic);
                },
                Ok(None) if channel.required() => {
                    return Err(SessionError::MissingCharacteristic(channel));
                },
                Ok(None) => tracing::debug!(%channel, "optional characteristic absent"),
                Err(e) if channel.required() => {
                    tracing::error!(%channel, error = %e, "resolving characteristic");
                    return Err(SessionError::MissingCharacteristic(channel));
                },
                Err(e) => tracing::warn!(%channel, error = %e, "resolving optional characteristic"),
            }
        }

        self.lock().channels = channels;
        Ok(())
    }

    fn notification_handler(&self, channel: Channel) -> NotificationHandler {
        let weak = Arc::downgrade(&self.inner);

        Arc::new(move |data: Bytes| {
            if let Some(session) = Session::from_weak(&weak) {
                session.dispatch(channel, &data);
            }
        })
    }

    async fn subscribe_all(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let targets = self
            .lock()
            .channels
            .iter()
            .filter(|(channel, c)| channel.notifies() && c.properties.notify)
            .map(|(channel, c)| (*channel, *c))
            .collect::<Vec<_>>();

        for (channel, characteristic) in targets {
            let handler = self.notification_handler(channel);

            match self.guarded(cancel, self.inner.transport.subscribe(&characteristic, handler)).await? {
                Ok(()) => {
                    tracing::info!(%channel, "subscribed");

                    if !self.keep_subscription(channel, characteristic).await {
                        return Err(SessionError::Interrupted(self.state()));
                    }
                },
                Err(e) => tracing::warn!(%channel, error = %e, "subscription failed"),
            }
        }

        let shared = self.lock();

        let writable = shared
            .channels
            .get(&Channel::CmdToStrap)
            .map(|c| c.properties.write)
            .unwrap_or(false);

        if !writable {
            return Err(SessionError::MissingCharacteristic(Channel::CmdToStrap));
        }

        if !shared.subscribed.iter().any(|(channel, _)| *channel == Channel::DataFromStrap) {
            return Err(SessionError::SubscriptionFailed(Channel::DataFromStrap));
        }

        Ok(())
    }

    /// Record a fresh subscription for release at teardown. If teardown has already collected
    /// the list, release it here instead.
    async fn keep_subscription(&self, channel: Channel, characteristic: Characteristic) -> bool {
        {
            let mut shared = self.lock();

            if !self.inner.tearing_down.load(Ordering::SeqCst) {
                shared.subscribed.push((channel, characteristic));
                return true;
            }
        }

        util::trace_catch!(
            warn,
            self.inner.transport.unsubscribe(&characteristic).await,
            %channel,
            "releasing late subscription"
        );

        false
    }

    async fn handshake(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or_default();

        let sequence = [
            Command::Hello,
            Command::SetClock {
                unix: now,
            },
            Command::GetDeviceName,
            Command::EnterHighFreqSync,
        ];

        for (i, command) in sequence.into_iter().enumerate() {
            if i > 0 {
                self.pause(cancel, self.inner.config.handshake_spacing()).await?;
            }

            if cancel.is_cancelled() {
                return Err(SessionError::Cancelled);
            }

            if !self.send_cancellable(command, cancel).await {
                tracing::warn!(?command, "handshake command failed");
            }
        }

        Ok(())
    }

    fn spawn_link_watcher(&self, events: broadcast::Receiver<LinkEvent>) {
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let mut events = BroadcastStream::new(events);

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.next() => event,
                };

                match event {
                    None => break,
                    Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                        tracing::warn!(missed = n, "link event stream lagged")
                    },
                    Some(Ok(event)) if event.is_loss() => {
                        if let Some(session) = Session::from_weak(&weak) {
                            tracing::warn!(?event, device = %session.inner.device, "link lost");
                            session.teardown().await;
                        }

                        break;
                    },
                    Some(Ok(event)) => tracing::debug!(?event, "link event"),
                }
            }
        });
    }

    /// Write one already-encoded frame to the strap.
    ///
    /// Only valid while `Ready` or `Disconnecting`. Never retries.
    pub async fn send_command(&self, frame: &[u8]) -> bool {
        self.send_command_cancellable(frame, &CancellationToken::new()).await
    }

    #[tracing::instrument(skip_all, fields(frame = %hex::encode(frame)))]
    pub async fn send_command_cancellable(&self, frame: &[u8], cancel: &CancellationToken) -> bool {
        let characteristic = {
            let shared = self.lock();

            if !shared.state.accepts_commands() {
                tracing::debug!(state = %shared.state, "rejecting command");
                return false;
            }

            match shared.channels.get(&Channel::CmdToStrap) {
                Some(c) => *c,
                None => {
                    tracing::warn!("no write characteristic");
                    return false;
                },
            }
        };

        let _write = tokio::select! {
            biased;

            _ = cancel.cancelled() => return false,
            guard = self.inner.write_lock.lock() => guard,
        };

        // state may have moved while waiting for the write lock
        if !self.state().accepts_commands() {
            return false;
        }

        let result = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::warn!("command write cancelled");
                return false;
            },
            result = self.inner.transport.write(&characteristic, frame) => result,
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "command write failed");
            return false;
        }

        tokio::time::sleep(self.inner.config.write_settle()).await;
        true
    }

    /// Encode `command` with the next sequence number and write it.
    pub async fn send(&self, command: Command) -> bool {
        self.send_cancellable(command, &CancellationToken::new()).await
    }

    pub async fn send_cancellable(&self, command: Command, cancel: &CancellationToken) -> bool {
        let frame = match command.encode(self.next_sequence()) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, ?command, "encoding command");
                return false;
            },
        };

        tracing::debug!(?command, "sending command");
        self.send_command_cancellable(&frame, cancel).await
    }

    /// Tear the session down. Idempotent: concurrent and repeated callers wait for the first.
    #[tracing::instrument(skip_all, fields(device = %self.inner.device))]
    pub async fn disconnect(&self) {
        self.teardown().await
    }

    async fn teardown(&self) {
        if self.inner.tearing_down.swap(true, Ordering::SeqCst) {
            self.inner.closed.cancelled().await;
            return;
        }

        self.inner.shutdown.cancel();

        let from = {
            let mut shared = self.lock();
            let from = shared.state;

            if from != SessionState::Idle {
                shared.state = SessionState::Disconnecting;
            }

            from
        };

        if from == SessionState::Idle {
            self.set_state(SessionState::Disconnected);
            self.inner.closed.cancel();
            return;
        }

        self.announce(from, SessionState::Disconnecting, self.observer());

        let grace = self.inner.config.disconnect_grace();
        for command in [Command::AbortHistoricalTransmits, Command::ExitHighFreqSync] {
            if self.send(command).await {
                tokio::time::sleep(grace).await;
            } else {
                tracing::debug!(?command, "best-effort teardown command not sent");
            }
        }

        let subscribed = {
            let mut shared = self.lock();
            shared.sync.active = false;
            shared.pump = None;

            std::mem::take(&mut shared.subscribed)
        };

        self.release(subscribed).await;

        let batch = {
            let mut shared = self.lock();
            shared.channels.clear();

            shared.sync.take_buffer()
        };

        self.flush(batch);

        let observer = {
            let mut shared = self.lock();
            shared.state = SessionState::Disconnected;

            shared.observer.take()
        };

        self.announce(SessionState::Disconnecting, SessionState::Disconnected, observer);
        self.inner.closed.cancel();
    }

    async fn release(&self, subscribed: Vec<(Channel, Characteristic)>) {
        let transport = &self.inner.transport;

        for (channel, characteristic) in subscribed {
            util::trace_catch!(warn, transport.unsubscribe(&characteristic).await, %channel, "unsubscribing");
        }

        util::trace_catch!(warn, transport.disconnect(&self.inner.device).await, "disconnecting transport");
    }

    /// Setup failed: release everything and park in `Failed`.
    async fn fail(&self) {
        if self.inner.tearing_down.swap(true, Ordering::SeqCst) {
            return;
        }

        self.inner.shutdown.cancel();
        self.set_state(SessionState::Failed);

        let (subscribed, batch) = {
            let mut shared = self.lock();

            shared.channels.clear();
            shared.pump = None;
            shared.observer = None;
            shared.sync.active = false;

            (std::mem::take(&mut shared.subscribed), shared.sync.take_buffer())
        };

        self.release(subscribed).await;
        self.flush(batch);

        self.inner.closed.cancel();
    }

    fn flush(&self, batch: Vec<message::HeartRateRecord>) {
        if batch.is_empty() {
            return;
        }

        tracing::info!(records = batch.len(), "flushing historical records");
        self.inner.sink.accept_batch(batch);
    }
}
