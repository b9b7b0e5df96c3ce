use std::sync::Mutex;

use message::HeartRateRecord;
use tokio::sync::mpsc;

/// Receives completed batches of historical records.
///
/// Called from the dispatch path: hand the batch off, don't do I/O here.
pub trait RecordSink: Send + Sync {
    fn accept_batch(&self, batch: Vec<HeartRateRecord>);
}

impl RecordSink for mpsc::UnboundedSender<Vec<HeartRateRecord>> {
    fn accept_batch(&self, batch: Vec<HeartRateRecord>) {
        let len = batch.len();

        if let Err(_e) = self.send(batch) {
            tracing::error!(dropped = len, "record sink receiver closed");
        }
    }
}

/// Keeps every batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink(Mutex<Vec<Vec<HeartRateRecord>>>);

impl MemorySink {
    pub fn batches(&self) -> Vec<Vec<HeartRateRecord>> {
        match self.0.lock() {
            Ok(batches) => batches.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn records(&self) -> Vec<HeartRateRecord> {
        self.batches().into_iter().flatten().collect()
    }
}

impl RecordSink for MemorySink {
    fn accept_batch(&self, batch: Vec<HeartRateRecord>) {
        match self.0.lock() {
            Ok(mut batches) => batches.push(batch),
            Err(poisoned) => poisoned.into_inner().push(batch),
        }
    }
}
