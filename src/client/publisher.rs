use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

use crate::broker::{BrokerLink, Connection, Sender};
use crate::utils::BoxError;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to send message: {0}")]
    Send(#[source] BoxError),

    #[error("publisher link is closed")]
    Closed,
}

/// Something the HTTP layer can hand a message body to.
#[async_trait]
pub trait Publish: Send + Sync {
    async fn publish(&self, message: &str) -> Result<(), PublishError>;
}

/// Sends each message to the topic its link is bound to.
///
/// The send endpoint needs exclusive access, so concurrent callers take
/// turns on the link.
pub struct Publisher<K: Connection, S: Sender> {
    link: Mutex<BrokerLink<K, S>>,
}

impl<K: Connection, S: Sender> Publisher<K, S> {
    pub fn new(link: BrokerLink<K, S>) -> Self {
        Self {
            link: Mutex::new(link),
        }
    }

    /// Releases the link. Publishing afterwards fails with `Closed`.
    pub async fn close(&self) {
        self.link.lock().await.close().await;
    }
}

#[async_trait]
impl<K: Connection, S: Sender> Publish for Publisher<K, S> {
    async fn publish(&self, message: &str) -> Result<(), PublishError> {
        let mut link = self.link.lock().await;
        let sender = link.endpoint_mut().ok_or(PublishError::Closed)?;
        sender
            .send(Bytes::copy_from_slice(message.as_bytes()))
            .await
            .map_err(PublishError::Send)?;
        info!("Published message: {message}");
        Ok(())
    }
}
