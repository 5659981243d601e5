//! Subscriber push channel.
//!
//! The coordinator publishes one `StreamUpdate` per processed frame to every
//! subscriber. How updates reach viewers (websocket, file, stdout) is the
//! subscriber's business; `publish` must not block the processing loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::{Serialize, Serializer};

use crate::detect::{EquipmentTally, Violation};

/// Annotated frame plus the statistics of the result it was drawn from.
#[derive(Clone, Debug, Serialize)]
pub struct StreamUpdate {
    /// JPEG-encoded annotated frame; base64 when serialized.
    #[serde(serialize_with = "serialize_base64")]
    pub frame: Arc<[u8]>,
    pub people_count: u32,
    pub safety_equipment: EquipmentTally,
    pub violations: Vec<Violation>,
    pub fps: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub sequence: u64,
    /// True when the result came from a detection run on this frame rather than the cache.
    #[serde(skip)]
    pub fresh: bool,
}

impl StreamUpdate {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn serialize_base64<S: Serializer>(bytes: &Arc<[u8]>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&general_purpose::STANDARD.encode(bytes))
}

pub trait Subscriber: Send {
    fn name(&self) -> &str;

    /// Deliver one update. Errors are logged by the coordinator; the subscriber stays registered.
    fn publish(&mut self, update: &StreamUpdate) -> Result<()>;
}

/// Subscriber backed by a bounded channel. A full channel drops the update.
pub struct ChannelSubscriber {
    name: String,
    sender: Sender<StreamUpdate>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSubscriber {
    pub fn bounded(name: impl Into<String>, capacity: usize) -> (Self, Receiver<StreamUpdate>) {
        let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
        let subscriber = Self {
            name: name.into(),
            sender,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (subscriber, receiver)
    }

    /// Updates dropped because the receiver fell behind.
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn publish(&mut self, update: &StreamUpdate) -> Result<()> {
        match self.sender.try_send(update.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => {
                Err(anyhow!("subscriber {} disconnected", self.name))
            }
        }
    }
}
