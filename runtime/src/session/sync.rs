use std::sync::Arc;

use message::{
    history,
    Command,
    CommandNumber,
    HeartRateRecord,
    HistoryMetadata,
    MetadataType,
    Packet,
    PacketType,
};
use tokio::sync::mpsc;

use super::{
    Session,
    SessionError,
    SessionState,
};

#[derive(Debug, Default)]
pub(super) struct HistoricalSync {
    pub active:       bool,
    pub buffer:       Vec<HeartRateRecord>,
    pub window_start: Option<u32>,
    pub window_end:   Option<u32>,
}

impl HistoricalSync {
    pub fn take_buffer(&mut self) -> Vec<HeartRateRecord> {
        std::mem::take(&mut self.buffer)
    }

    fn finish(&mut self) -> Vec<HeartRateRecord> {
        self.active = false;
        self.window_start = None;
        self.window_end = None;

        self.take_buffer()
    }
}

/// Outbound work the dispatch path can't do inline.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(super) enum SyncAction {
    Ack(u32),
    Conclude,
}

impl Session {
    pub fn sync_active(&self) -> bool {
        self.lock().sync.active
    }

    /// Records decoded but not yet handed to the sink.
    pub fn buffered(&self) -> usize {
        self.lock().sync.buffer.len()
    }

    /// Point the strap's read cursor at `window_start` and begin paginated transfer.
    ///
    /// If `window_end` is set, the sync concludes on the first chunk ending at or past it.
    #[tracing::instrument(skip(self))]
    pub async fn start_historical_sync(
        &self,
        window_start: u32,
        window_end: Option<u32>,
    ) -> Result<(), SessionError> {
        {
            let shared = self.lock();

            if shared.state != SessionState::Ready {
                return Err(SessionError::InvalidState {
                    op:    "start historical sync",
                    state: shared.state,
                });
            }

            if shared.sync.active {
                return Err(SessionError::SyncActive);
            }
        }

        if !self.send(Command::SetReadPointer { unix: window_start }).await {
            return Err(SessionError::CommandFailed(CommandNumber::SetReadPointer));
        }

        {
            let mut shared = self.lock();

            shared.sync.active = true;
            shared.sync.window_start = Some(window_start);
            shared.sync.window_end = window_end;
        }

        if !self.send(Command::SendHistoricalData { start: true }).await {
            self.lock().sync.finish();
            return Err(SessionError::CommandFailed(CommandNumber::SendHistoricalData));
        }

        tracing::info!("historical sync started");
        Ok(())
    }

    /// Stop the transfer and flush whatever has been buffered. Returns whether the strap was told.
    #[tracing::instrument(skip(self))]
    pub async fn abort_historical_sync(&self) -> bool {
        let sent = self.send(Command::AbortHistoricalTransmits).await;

        if !sent {
            tracing::warn!("abort command not delivered, concluding locally");
        }

        let batch = self.lock().sync.finish();
        self.flush(batch);

        sent
    }

    pub(super) fn spawn_sync_pump(&self) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.lock().pump = Some(tx);

        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let action = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    action = rx.recv() => match action {
                        Some(action) => action,
                        None => break,
                    },
                };

                let session = match Session::from_weak(&weak) {
                    Some(session) => session,
                    None => break,
                };

                match action {
                    SyncAction::Ack(offset) => {
                        if !session.send(Command::history_end_ack(offset)).await {
                            tracing::warn!(offset, "history chunk ack not delivered");
                        }
                    },
                    SyncAction::Conclude => {
                        session.abort_historical_sync().await;
                    },
                }
            }
        });
    }

    fn queue(&self, action: SyncAction) {
        let sent = self
            .lock()
            .pump
            .as_ref()
            .map(|tx| tx.send(action).is_ok())
            .unwrap_or(false);

        if !sent {
            tracing::warn!(?action, "sync pump not running, dropping action");
        }
    }

    /// Session-side handling of historical-data and metadata packets. Runs before observers.
    pub(super) fn on_history(&self, packet: &Packet) {
        match packet.packet_type {
            PacketType::HistoricalData => self.on_records(packet),
            PacketType::Metadata => self.on_metadata(packet),
            _ => {},
        }
    }

    fn on_records(&self, packet: &Packet) {
        let decoded = history::decode_records(&packet.payload);

        tracing::debug!(
            records = decoded.records.len(),
            discarded = decoded.discarded,
            skipped = decoded.skipped,
            "decoded historical data"
        );

        let batch_size = self.inner.config.history_batch_size.max(1);

        let batches = {
            let mut shared = self.lock();

            if !shared.sync.active {
                tracing::debug!("historical data outside an active sync");
            }

            let mut full = vec![];

            for record in decoded.records {
                shared.sync.buffer.push(record);

                if shared.sync.buffer.len() >= batch_size {
                    full.push(shared.sync.take_buffer());
                }
            }

            full
        };

        for batch in batches {
            self.flush(batch);
        }
    }

    fn on_metadata(&self, packet: &Packet) {
        let meta = match HistoryMetadata::try_from(packet) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, payload = %hex::encode(&packet.payload), "malformed history metadata");
                return;
            },
        };

        match meta.kind {
            MetadataType::HistoryStart => {
                tracing::debug!(unix = meta.unix, data = meta.data, "history chunk start");
            },

            MetadataType::HistoryEnd => {
                let (active, past_window) = {
                    let shared = self.lock();
                    let past = shared.sync.window_end.map(|end| meta.unix >= end).unwrap_or(false);

                    (shared.sync.active, past)
                };

                if !active {
                    tracing::debug!(data = meta.data, "history end outside an active sync, not acking");
                } else if past_window {
                    tracing::info!(unix = meta.unix, "history window reached, concluding");
                    self.queue(SyncAction::Conclude);
                } else {
                    tracing::debug!(unix = meta.unix, offset = meta.data, "acking history chunk");
                    self.queue(SyncAction::Ack(meta.data));
                }
            },

            MetadataType::HistoryComplete => {
                tracing::info!("strap reports history complete");

                let batch = self.lock().sync.finish();
                self.flush(batch);
            },
        }
    }
}
