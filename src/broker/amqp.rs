//! AMQP 1.0 binding built on `fe2o3-amqp`.
//!
//! Connections use TLS straight away (no AMQP-level TLS upgrade, which is
//! what Service Bus expects) and authenticate with SASL PLAIN using the
//! credential pair of the [`ConnectionDescriptor`]. Payloads are sent as a
//! single `Data` section.

use async_trait::async_trait;
use bytes::Bytes;
use fe2o3_amqp::link::delivery::Delivery as AmqpDelivery;
use fe2o3_amqp::sasl_profile::SaslProfile;
use fe2o3_amqp::types::messaging::{AmqpValue, Body, Message, Outcome};
use fe2o3_amqp::types::primitives::{Binary, Value};
use fe2o3_amqp::{connection::ConnectionHandle, session::SessionHandle};
use thiserror::Error;
use uuid::Uuid;

use super::{Connection, Connector, Delivery, Endpoint, Receiver, Sender, Session};
use crate::config::ConnectionDescriptor;
use crate::utils::BoxError;

#[derive(Debug, Error)]
pub enum AmqpError {
    #[error("delivery not accepted by broker: {0}")]
    NotAccepted(String),
}

/// Opens AMQP connections under one container id.
#[derive(Debug, Clone)]
pub struct AmqpConnector {
    container_id: String,
}

impl AmqpConnector {
    pub fn new(container_id: impl Into<String>) -> Self {
        Self {
            container_id: container_id.into(),
        }
    }
}

impl Default for AmqpConnector {
    fn default() -> Self {
        Self::new(format!("busrelay-{}", Uuid::new_v4()))
    }
}

#[async_trait]
impl Connector for AmqpConnector {
    type Connection = AmqpConnection;

    async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<AmqpConnection, BoxError> {
        let url = descriptor.url();
        let handle = fe2o3_amqp::Connection::builder()
            .container_id(self.container_id.clone())
            .alt_tls_establishment(true)
            .sasl_profile(SaslProfile::Plain {
                username: descriptor.key_name().to_owned(),
                password: descriptor.key().to_owned(),
            })
            .open(url.as_str())
            .await?;
        Ok(AmqpConnection { handle })
    }
}

pub struct AmqpConnection {
    handle: ConnectionHandle<()>,
}

#[async_trait]
impl Connection for AmqpConnection {
    type Session = AmqpSession;

    async fn begin_session(&mut self) -> Result<AmqpSession, BoxError> {
        let handle = fe2o3_amqp::Session::begin(&mut self.handle).await?;
        Ok(AmqpSession { handle })
    }

    async fn close(mut self) -> Result<(), BoxError> {
        self.handle.close().await?;
        Ok(())
    }
}

pub struct AmqpSession {
    handle: SessionHandle<()>,
}

#[async_trait]
impl Session for AmqpSession {
    type Sender = AmqpSender;
    type Receiver = AmqpReceiver;

    async fn attach_sender(&mut self, name: &str, address: &str) -> Result<AmqpSender, BoxError> {
        let link =
            fe2o3_amqp::Sender::attach(&mut self.handle, name.to_owned(), address.to_owned())
                .await?;
        Ok(AmqpSender { link })
    }

    async fn attach_receiver(&mut self, name: &str, address: &str) -> Result<AmqpReceiver, BoxError> {
        let link =
            fe2o3_amqp::Receiver::attach(&mut self.handle, name.to_owned(), address.to_owned())
                .await?;
        Ok(AmqpReceiver { link })
    }

    async fn end(mut self) -> Result<(), BoxError> {
        self.handle.end().await?;
        Ok(())
    }
}

pub struct AmqpSender {
    link: fe2o3_amqp::Sender,
}

#[async_trait]
impl Endpoint for AmqpSender {
    async fn close(self) -> Result<(), BoxError> {
        self.link.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Sender for AmqpSender {
    async fn send(&mut self, payload: Bytes) -> Result<(), BoxError> {
        let message = Message::builder()
            .data(Binary::from(payload.to_vec()))
            .build();
        match self.link.send(message).await? {
            Outcome::Accepted(_) => Ok(()),
            other => Err(AmqpError::NotAccepted(format!("{other:?}")).into()),
        }
    }
}

pub struct AmqpReceiver {
    link: fe2o3_amqp::Receiver,
}

#[async_trait]
impl Endpoint for AmqpReceiver {
    async fn close(self) -> Result<(), BoxError> {
        self.link.close().await?;
        Ok(())
    }
}

#[async_trait]
impl Receiver for AmqpReceiver {
    type Handle = AmqpDelivery<Body<Value>>;

    async fn receive(&mut self) -> Result<Delivery<Self::Handle>, BoxError> {
        let delivery = self.link.recv::<Body<Value>>().await?;
        let payload = body_bytes(delivery.body());
        Ok(Delivery::new(payload, delivery))
    }

    async fn accept(&mut self, delivery: &Delivery<Self::Handle>) -> Result<(), BoxError> {
        self.link.accept(delivery.handle()).await?;
        Ok(())
    }
}

/// Flattens a message body into bytes. `Data` sections are concatenated;
/// string and binary values are taken as is; anything else is rendered.
pub(crate) fn body_bytes(body: &Body<Value>) -> Bytes {
    match body {
        Body::Data(sections) => sections
            .iter()
            .flat_map(|section| section.0.iter().copied())
            .collect(),
        Body::Value(AmqpValue(Value::String(text))) => Bytes::copy_from_slice(text.as_bytes()),
        Body::Value(AmqpValue(Value::Binary(bytes))) => Bytes::copy_from_slice(bytes),
        other => Bytes::from(format!("{other:?}")),
    }
}
