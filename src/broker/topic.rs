use std::collections::HashMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub type SubscriptionName = String;

/// What travels down a subscription queue.
#[derive(Debug, Clone)]
pub enum Frame {
    Message {
        payload: Bytes,
        sequence: u64,
        enqueued_at: DateTime<Utc>,
    },
    /// Makes the next receive on the subscription fail with this reason.
    Fault(String),
}

/// A named, independently consumed queue over a topic.
///
/// The receiving half is parked here while no receiver is attached, so
/// messages published in the meantime are kept.
#[derive(Debug)]
pub struct Subscription {
    tx: UnboundedSender<Frame>,
    rx: Option<UnboundedReceiver<Frame>>,
    next_sequence: u64,
}

impl Subscription {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            next_sequence: 1,
        }
    }

    pub fn enqueue(&mut self, payload: Bytes) {
        let frame = Frame::Message {
            payload,
            sequence: self.next_sequence,
            enqueued_at: Utc::now(),
        };
        self.next_sequence += 1;
        // tx and the parked/attached rx live as long as the subscription
        let _ = self.tx.send(frame);
    }

    pub fn inject(&self, frame: Frame) {
        let _ = self.tx.send(frame);
    }

    /// Hands the queue to a receiver; `None` while another one holds it.
    pub fn take_queue(&mut self) -> Option<UnboundedReceiver<Frame>> {
        self.rx.take()
    }

    pub fn park_queue(&mut self, rx: UnboundedReceiver<Frame>) {
        self.rx = Some(rx);
    }
}

/// Represents a topic in the in-memory broker.
///
/// Every message published to the topic is copied into each of its
/// subscriptions.
#[derive(Debug, Default)]
pub struct Topic {
    pub name: String,
    pub subscriptions: HashMap<SubscriptionName, Subscription>,
}

impl Topic {
    /// Creates a new instance of the Topic with the given name
    /// Initializes an empty set of subscriptions
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            subscriptions: HashMap::new(),
        }
    }

    /// Adds a subscription. Existing subscriptions are left untouched.
    pub fn subscribe(&mut self, name: &str) {
        self.subscriptions
            .entry(name.to_string())
            .or_insert_with(Subscription::new);
    }

    /// Removes a subscription and drops its queued messages.
    pub fn unsubscribe(&mut self, name: &str) {
        self.subscriptions.remove(name);
    }

    pub fn publish(&mut self, payload: Bytes) {
        for subscription in self.subscriptions.values_mut() {
            subscription.enqueue(payload.clone());
        }
    }
}
