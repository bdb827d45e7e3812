//! In-process broker binding.
//!
//! `MemoryBroker` keeps topics and subscriptions in memory and implements
//! the whole connector chain on top of them. Every operation is recorded in
//! a journal, and the [`Faults`] switches make individual steps fail, which
//! is what the link, client and lifecycle tests are built on. It is also
//! what `ASB_TRANSPORT=memory` runs against.
//!
//! Unacknowledged deliveries are not redelivered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use super::topic::{Frame, Topic};
use super::{Connection, Connector, Delivery, Endpoint, Receiver, Sender, Session};
use crate::config::{BrokerSettings, ConnectionDescriptor};
use crate::utils::BoxError;

const SUBSCRIPTION_SEPARATOR: &str = "/subscriptions/";

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("{0} refused by broker")]
    Refused(&'static str),

    #[error("no such entity: {0}")]
    UnknownEntity(String),

    #[error("subscription {0} already has an active receiver")]
    Busy(String),

    #[error("connection severed")]
    Severed,

    #[error("subscription {0} was deleted")]
    Deleted(String),

    #[error("{0}")]
    Fault(String),
}

/// Switches that make broker operations fail.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub refuse_connect: bool,
    pub refuse_session: bool,
    pub refuse_attach: bool,
    /// Every send on every sender fails, as if its connection was cut.
    pub sever_senders: bool,
    pub reject_accept: bool,
    pub fail_close_endpoint: bool,
    pub fail_close_session: bool,
}

/// Journal entry. Connections are numbered from 1 in connect order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Connected(u64),
    SessionBegun(u64),
    Attached { connection: u64, address: String },
    Sent { topic: String, payload: Bytes },
    Accepted { subscription: String, sequence: u64 },
    Detached { connection: u64, address: String },
    SessionEnded(u64),
    ConnectionClosed(u64),
}

#[derive(Debug, Default)]
struct State {
    topics: HashMap<String, Topic>,
    journal: Vec<Event>,
    faults: Faults,
    send_delay: Option<Duration>,
    connections: u64,
}

impl State {
    fn record(&mut self, event: Event) {
        debug!(?event, "memory broker");
        self.journal.push(event);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn create_topic(&self, topic: &str) {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic));
    }

    /// Creates the subscription, and its topic if needed.
    pub fn create_subscription(&self, topic: &str, name: &str) {
        self.state()
            .topics
            .entry(topic.to_string())
            .or_insert_with(|| Topic::new(topic))
            .subscribe(name);
    }

    pub fn delete_subscription(&self, topic: &str, name: &str) {
        if let Some(t) = self.state().topics.get_mut(topic) {
            t.unsubscribe(name);
        }
    }

    /// Creates the topic and subscription the relay is configured with.
    pub fn provision(&self, settings: &BrokerSettings) {
        match split_subscription_path(&settings.subscription) {
            Some((topic, name)) => {
                self.create_topic(&settings.topic);
                self.create_subscription(topic, name);
            }
            None => self.create_topic(&settings.topic),
        }
    }

    /// Publishes from outside the relay, bypassing any sender.
    pub fn enqueue(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), MemoryError> {
        let mut state = self.state();
        let t = state
            .topics
            .get_mut(topic)
            .ok_or_else(|| MemoryError::UnknownEntity(topic.to_string()))?;
        t.publish(payload.into());
        Ok(())
    }

    /// Makes the next receive on `subscription_path` fail after the
    /// messages already queued.
    pub fn inject_receive_fault(
        &self,
        subscription_path: &str,
        reason: &str,
    ) -> Result<(), MemoryError> {
        let mut state = self.state();
        let unknown = || MemoryError::UnknownEntity(subscription_path.to_string());
        let (topic, name) = split_subscription_path(subscription_path).ok_or_else(unknown)?;
        let subscription = state
            .topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(name))
            .ok_or_else(unknown)?;
        subscription.inject(Frame::Fault(reason.to_string()));
        Ok(())
    }

    pub fn update_faults(&self, update: impl FnOnce(&mut Faults)) {
        update(&mut self.state().faults);
    }

    /// Every send sleeps this long before it is delivered.
    pub fn set_send_delay(&self, delay: Duration) {
        self.state().send_delay = Some(delay);
    }

    pub fn journal(&self) -> Vec<Event> {
        self.state().journal.clone()
    }

    /// Payloads successfully sent to `topic`, in order.
    pub fn sent(&self, topic: &str) -> Vec<Bytes> {
        self.state()
            .journal
            .iter()
            .filter_map(|event| match event {
                Event::Sent { topic: t, payload } if t == topic => Some(payload.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn accepted_count(&self) -> usize {
        self.state()
            .journal
            .iter()
            .filter(|event| matches!(event, Event::Accepted { .. }))
            .count()
    }
}

/// Splits `topic/subscriptions/name` into its two names.
pub fn split_subscription_path(path: &str) -> Option<(&str, &str)> {
    path.split_once(SUBSCRIPTION_SEPARATOR)
        .filter(|(topic, name)| !topic.is_empty() && !name.is_empty())
}

#[async_trait]
impl Connector for MemoryBroker {
    type Connection = MemoryConnection;

    async fn connect(&self, _descriptor: &ConnectionDescriptor) -> Result<MemoryConnection, BoxError> {
        let mut state = self.state();
        if state.faults.refuse_connect {
            return Err(MemoryError::Refused("connect").into());
        }
        state.connections += 1;
        let id = state.connections;
        state.record(Event::Connected(id));
        Ok(MemoryConnection {
            broker: self.clone(),
            id,
        })
    }
}

pub struct MemoryConnection {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Session = MemorySession;

    async fn begin_session(&mut self) -> Result<MemorySession, BoxError> {
        let mut state = self.broker.state();
        if state.faults.refuse_session {
            return Err(MemoryError::Refused("session").into());
        }
        state.record(Event::SessionBegun(self.id));
        Ok(MemorySession {
            broker: self.broker.clone(),
            connection: self.id,
        })
    }

    async fn close(self) -> Result<(), BoxError> {
        self.broker.state().record(Event::ConnectionClosed(self.id));
        Ok(())
    }
}

pub struct MemorySession {
    broker: MemoryBroker,
    connection: u64,
}

#[async_trait]
impl Session for MemorySession {
    type Sender = MemorySender;
    type Receiver = MemoryReceiver;

    async fn attach_sender(&mut self, _name: &str, address: &str) -> Result<MemorySender, BoxError> {
        let mut state = self.broker.state();
        if state.faults.refuse_attach {
            return Err(MemoryError::Refused("attach").into());
        }
        if !state.topics.contains_key(address) {
            return Err(MemoryError::UnknownEntity(address.to_string()).into());
        }
        state.record(Event::Attached {
            connection: self.connection,
            address: address.to_string(),
        });
        Ok(MemorySender {
            broker: self.broker.clone(),
            connection: self.connection,
            topic: address.to_string(),
        })
    }

    async fn attach_receiver(
        &mut self,
        _name: &str,
        address: &str,
    ) -> Result<MemoryReceiver, BoxError> {
        let mut state = self.broker.state();
        if state.faults.refuse_attach {
            return Err(MemoryError::Refused("attach").into());
        }
        let unknown = || MemoryError::UnknownEntity(address.to_string());
        let (topic, name) = split_subscription_path(address).ok_or_else(unknown)?;
        let subscription = state
            .topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(name))
            .ok_or_else(unknown)?;
        let queue = subscription
            .take_queue()
            .ok_or_else(|| MemoryError::Busy(address.to_string()))?;
        state.record(Event::Attached {
            connection: self.connection,
            address: address.to_string(),
        });
        Ok(MemoryReceiver {
            broker: self.broker.clone(),
            connection: self.connection,
            path: address.to_string(),
            queue: Some(queue),
        })
    }

    async fn end(self) -> Result<(), BoxError> {
        let mut state = self.broker.state();
        if state.faults.fail_close_session {
            return Err(MemoryError::Refused("end session").into());
        }
        state.record(Event::SessionEnded(self.connection));
        Ok(())
    }
}

fn detach(broker: &MemoryBroker, connection: u64, address: &str) -> Result<(), BoxError> {
    let mut state = broker.state();
    if state.faults.fail_close_endpoint {
        return Err(MemoryError::Refused("detach").into());
    }
    state.record(Event::Detached {
        connection,
        address: address.to_string(),
    });
    Ok(())
}

pub struct MemorySender {
    broker: MemoryBroker,
    connection: u64,
    topic: String,
}

#[async_trait]
impl Endpoint for MemorySender {
    async fn close(self) -> Result<(), BoxError> {
        detach(&self.broker, self.connection, &self.topic)
    }
}

#[async_trait]
impl Sender for MemorySender {
    async fn send(&mut self, payload: Bytes) -> Result<(), BoxError> {
        let delay = self.broker.state().send_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.broker.state();
        if state.faults.sever_senders {
            return Err(MemoryError::Severed.into());
        }
        let topic = state
            .topics
            .get_mut(&self.topic)
            .ok_or_else(|| MemoryError::UnknownEntity(self.topic.clone()))?;
        topic.publish(payload.clone());
        state.record(Event::Sent {
            topic: self.topic.clone(),
            payload,
        });
        Ok(())
    }
}

/// Acknowledgement handle of a memory delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryHandle {
    pub sequence: u64,
}

pub struct MemoryReceiver {
    broker: MemoryBroker,
    connection: u64,
    path: String,
    queue: Option<UnboundedReceiver<Frame>>,
}

impl Drop for MemoryReceiver {
    fn drop(&mut self) {
        // hand the queue back so the subscription can be attached again
        let Some(queue) = self.queue.take() else {
            return;
        };
        let Some((topic, name)) = split_subscription_path(&self.path) else {
            return;
        };
        if let Some(subscription) = self
            .broker
            .state()
            .topics
            .get_mut(topic)
            .and_then(|t| t.subscriptions.get_mut(name))
        {
            subscription.park_queue(queue);
        }
    }
}

#[async_trait]
impl Endpoint for MemoryReceiver {
    async fn close(self) -> Result<(), BoxError> {
        detach(&self.broker, self.connection, &self.path)
    }
}

#[async_trait]
impl Receiver for MemoryReceiver {
    type Handle = MemoryHandle;

    async fn receive(&mut self) -> Result<Delivery<MemoryHandle>, BoxError> {
        let queue = self
            .queue
            .as_mut()
            .ok_or_else(|| MemoryError::Deleted(self.path.clone()))?;
        match queue.recv().await {
            Some(Frame::Message {
                payload,
                sequence,
                enqueued_at,
            }) => Ok(Delivery::new(payload, MemoryHandle { sequence })
                .with_sequence(sequence)
                .with_enqueued_at(enqueued_at)),
            Some(Frame::Fault(reason)) => Err(MemoryError::Fault(reason).into()),
            None => Err(MemoryError::Deleted(self.path.clone()).into()),
        }
    }

    async fn accept(&mut self, delivery: &Delivery<MemoryHandle>) -> Result<(), BoxError> {
        let mut state = self.broker.state();
        if state.faults.reject_accept {
            return Err(MemoryError::Refused("accept").into());
        }
        state.record(Event::Accepted {
            subscription: self.path.clone(),
            sequence: delivery.handle().sequence,
        });
        Ok(())
    }
}
