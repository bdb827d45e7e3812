//! The `broker` module is the seam between the relay and a message broker.
//!
//! A broker is reached through a chain of owned handles, each created from
//! its parent and closed before it:
//!
//! ```text
//! Connector --connect--> Connection --begin_session--> Session
//!     Session --attach_sender--> Sender     (bound to a topic)
//!     Session --attach_receiver--> Receiver (bound to a subscription path)
//! ```
//!
//! Bindings:
//! - `amqp`: AMQP 1.0 over TLS (Azure Service Bus style brokers).
//! - `memory`: in-process topics and subscriptions with fault injection.
//!
//! [`link`] builds one full chain per role and owns its cleanup.

pub mod amqp;
pub mod link;
pub mod memory;
pub mod message;
pub mod topic;

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ConnectionDescriptor;
use crate::utils::BoxError;

pub use link::{BrokerLink, LinkError, open_receiver, open_sender};
pub use message::Delivery;

/// Which end of the broker a link is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Bound to the topic, used by the publisher.
    Send,
    /// Bound to the subscription path, used by the subscriber.
    Receive,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Send => f.write_str("sender"),
            Role::Receive => f.write_str("receiver"),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    async fn connect(&self, descriptor: &ConnectionDescriptor)
    -> Result<Self::Connection, BoxError>;
}

#[async_trait]
pub trait Connection: Send + 'static {
    type Session: Session;

    async fn begin_session(&mut self) -> Result<Self::Session, BoxError>;

    async fn close(self) -> Result<(), BoxError>;
}

#[async_trait]
pub trait Session: Send + 'static {
    type Sender: Sender;
    type Receiver: Receiver;

    async fn attach_sender(&mut self, name: &str, address: &str)
    -> Result<Self::Sender, BoxError>;

    async fn attach_receiver(
        &mut self,
        name: &str,
        address: &str,
    ) -> Result<Self::Receiver, BoxError>;

    async fn end(self) -> Result<(), BoxError>;
}

/// Anything attached to a session.
#[async_trait]
pub trait Endpoint: Send + 'static {
    async fn close(self) -> Result<(), BoxError>;
}

#[async_trait]
pub trait Sender: Endpoint {
    /// Sends one opaque payload and waits for the broker to settle it.
    async fn send(&mut self, payload: Bytes) -> Result<(), BoxError>;
}

#[async_trait]
pub trait Receiver: Endpoint {
    /// Broker-assigned metadata needed to acknowledge a delivery.
    type Handle: Send + Sync + 'static;

    /// Waits for the next delivery, in broker order.
    async fn receive(&mut self) -> Result<Delivery<Self::Handle>, BoxError>;

    async fn accept(&mut self, delivery: &Delivery<Self::Handle>) -> Result<(), BoxError>;
}

pub type SessionOf<C> = <<C as Connector>::Connection as Connection>::Session;
pub type SenderOf<C> = <SessionOf<C> as Session>::Sender;
pub type ReceiverOf<C> = <SessionOf<C> as Session>::Receiver;
