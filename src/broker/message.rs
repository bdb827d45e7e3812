use std::borrow::Cow;

use bytes::Bytes;
use chrono::{DateTime, Utc};

/// A message handed out by a receiver.
///
/// The payload is opaque bytes. The handle is whatever the binding needs
/// to acknowledge the delivery; the sequence number and enqueue time are
/// informational and only present when the binding knows them.
#[derive(Debug, Clone)]
pub struct Delivery<H> {
    payload: Bytes,
    sequence: Option<u64>,
    enqueued_at: Option<DateTime<Utc>>,
    handle: H,
}

impl<H> Delivery<H> {
    pub fn new(payload: impl Into<Bytes>, handle: H) -> Self {
        Self {
            payload: payload.into(),
            sequence: None,
            enqueued_at: None,
            handle,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = Some(enqueued_at);
        self
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload as text, invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    pub fn enqueued_at(&self) -> Option<DateTime<Utc>> {
        self.enqueued_at
    }

    pub fn handle(&self) -> &H {
        &self.handle
    }
}
