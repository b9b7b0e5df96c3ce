use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

/// How the session numbers outbound commands.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencePolicy {
    /// Every command carries the same sequence byte.
    Fixed(u8),
    /// Wrapping per-session counter starting at 0.
    Incrementing,
}

impl Default for SequencePolicy {
    fn default() -> Self {
        SequencePolicy::Fixed(0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Wait after a bond request before polling bond state.
    pub bond_settle_ms:       u64,
    /// Gap between handshake commands.
    pub handshake_spacing_ms: u64,
    /// Held after each write before the next may start.
    pub write_settle_ms:      u64,
    /// Wait after each best-effort command during teardown.
    pub disconnect_grace_ms:  u64,
    pub history_batch_size:   usize,
    pub sequence:             SequencePolicy,
    pub handshake:            bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bond_settle_ms:       1000,
            handshake_spacing_ms: 100,
            write_settle_ms:      20,
            disconnect_grace_ms:  500,
            history_batch_size:   50,
            sequence:             SequencePolicy::default(),
            handshake:            true,
        }
    }
}

impl SessionConfig {
    #[inline]
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    #[inline]
    pub fn bond_settle(&self) -> Duration {
        Duration::from_millis(self.bond_settle_ms)
    }

    #[inline]
    pub fn handshake_spacing(&self) -> Duration {
        Duration::from_millis(self.handshake_spacing_ms)
    }

    #[inline]
    pub fn write_settle(&self) -> Duration {
        Duration::from_millis(self.write_settle_ms)
    }

    #[inline]
    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    /// All delays zeroed. Batch size and policy are kept.
    pub fn immediate(self) -> Self {
        Self {
            bond_settle_ms: 0,
            handshake_spacing_ms: 0,
            write_settle_ms: 0,
            disconnect_grace_ms: 0,
            ..self
        }
    }
}
