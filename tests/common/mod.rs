#![allow(dead_code)]

use std::{
    sync::Arc,
    time::Duration,
};

use strapsync::{
    message::{
        self,
        Command,
        CommandNumber,
        MetadataType,
        Packet,
        PacketType,
    },
    runtime::{
        gatt::Channel,
        transport::mock::{
            Knobs,
            MockTransport,
        },
        CancellationToken,
        MemorySink,
    },
    DeviceRef,
    Session,
    SessionConfig,
};
use tokio::task::JoinHandle;

/// Scripted strap: answers commands written to the mock transport.
///
/// History is served in pages of `page_size` records, each page framed by start/end metadata.
/// The session's ack for a page releases the next one.
#[derive(Clone, Debug)]
pub struct Strap {
    pub battery:   u8,
    pub clock:     u32,
    pub first:     u32,
    pub total:     usize,
    pub page_size: usize,
}

impl Default for Strap {
    fn default() -> Self {
        Self {
            battery:   87,
            clock:     1_736_703_145,
            first:     1_736_600_000,
            total:     120,
            page_size: 20,
        }
    }
}

impl Strap {
    fn record(&self, i: usize) -> Vec<u8> {
        let mut out = vec![0; 4];
        out.extend_from_slice(&(self.first + i as u32).to_le_bytes());
        out.extend_from_slice(&[0; 6]);
        out.push(55 + (i % 50) as u8);

        let rr = [900 + i as u16, 910 + i as u16];
        out.push(rr.len() as u8);
        for slot in 0..4 {
            out.extend_from_slice(&rr.get(slot).copied().unwrap_or(0).to_le_bytes());
        }

        out.extend_from_slice(&0u32.to_le_bytes());
        out
    }

    fn metadata(kind: MetadataType, unix: u32, data: u32) -> Vec<u8> {
        let mut payload = unix.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 6]);
        payload.extend_from_slice(&data.to_le_bytes());

        frame(PacketType::Metadata, kind as u8, &payload)
    }

    /// Frames for the page starting at record `offset`, or the completion marker past the end.
    fn page(&self, offset: usize) -> Vec<Vec<u8>> {
        if offset >= self.total {
            return vec![Self::metadata(MetadataType::HistoryComplete, self.clock, 0)];
        }

        let end = (offset + self.page_size).min(self.total);
        let start_unix = self.first + offset as u32;
        let end_unix = self.first + end as u32 - 1;

        let payload = (offset..end).flat_map(|i| self.record(i)).collect::<Vec<_>>();

        vec![
            Self::metadata(MetadataType::HistoryStart, start_unix, offset as u32),
            frame(PacketType::HistoricalData, 0, &payload),
            Self::metadata(MetadataType::HistoryEnd, end_unix, end as u32),
        ]
    }

    fn respond(&self, packet: &Packet, transport: &MockTransport) {
        let command = match packet.command() {
            Some(command) => command,
            None => return,
        };

        let reply = |payload: &[u8]| {
            let out = frame(PacketType::CommandResponse, command as u8, payload);
            transport.notify(Channel::CmdFromStrap, out);
        };

        match command {
            CommandNumber::GetBatteryLevel => reply(&[0, 0, self.battery]),
            CommandNumber::GetClock => {
                let mut payload = vec![0, 0];
                payload.extend_from_slice(&self.clock.to_le_bytes());
                reply(&payload);
            },
            CommandNumber::SendHistoricalData => {
                for f in self.page(0) {
                    transport.notify(Channel::DataFromStrap, f);
                }
            },
            CommandNumber::HistoricalDataResult => {
                let acked = packet
                    .payload
                    .get(1..5)
                    .and_then(|b| b.try_into().ok())
                    .map(u32::from_le_bytes)
                    .unwrap_or(0);

                for f in self.page(acked as usize) {
                    transport.notify(Channel::DataFromStrap, f);
                }
            },
            _ => reply(&[]),
        }
    }
}

pub fn frame(packet_type: PacketType, number: u8, payload: &[u8]) -> Vec<u8> {
    match message::encode(packet_type, 0, number, payload) {
        Ok(frame) => frame.to_vec(),
        Err(e) => panic!("encoding test frame: {e}"),
    }
}

pub struct Harness {
    pub session:   Session,
    pub transport: Arc<MockTransport>,
    pub sink:      Arc<MemorySink>,
    pub strap:     JoinHandle<()>,
}

impl Harness {
    pub fn new(strap: Strap) -> Self {
        Self::with_config(strap, SessionConfig::default().immediate())
    }

    pub fn with_config(strap: Strap, config: SessionConfig) -> Self {
        strapsync::trace::init();

        let transport = Arc::new(MockTransport::new(Knobs::default()));
        let sink = Arc::new(MemorySink::default());

        let session = Session::new(
            transport.clone(),
            DeviceRef::named("E4:11:93:0C:7A:52", "strap-test"),
            sink.clone(),
            config,
        );

        let strap = {
            let transport = transport.clone();

            tokio::spawn(async move {
                let mut seen = 0;

                loop {
                    transport.wait_for_writes(seen + 1).await;

                    let writes = transport.writes();
                    for raw in &writes[seen..] {
                        match message::try_decode(raw) {
                            Ok(packet) => strap.respond(&packet, &transport),
                            Err(reason) => tracing::warn!(%reason, "strap got an invalid frame"),
                        }
                    }

                    seen = writes.len();
                }
            })
        };

        Self {
            session,
            transport,
            sink,
            strap,
        }
    }

    pub async fn connect(&self) -> eyre::Result<()> {
        self.session.connect(&CancellationToken::new()).await?;
        Ok(())
    }

    pub async fn until(&self, what: &str, f: impl Fn(&Self) -> bool) -> eyre::Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !f(self) {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .map_err(|_| eyre::eyre!("timed out waiting for {what}"))
    }

    pub fn sent(&self) -> Vec<CommandNumber> {
        self.transport.commands()
    }

    pub async fn send(&self, command: Command) -> eyre::Result<()> {
        if !self.session.send(command).await {
            eyre::bail!("sending {command:?} failed");
        }

        Ok(())
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.strap.abort();
    }
}
