use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::broker::{BrokerLink, Connection, Receiver};
use crate::utils::BoxError;

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("failed to receive message: {0}")]
    Receive(#[source] BoxError),

    #[error("failed to accept message: {0}")]
    Accept(#[source] BoxError),

    #[error("subscriber link is closed")]
    Closed,
}

/// Drains one subscription, strictly one message at a time.
pub struct Subscriber<K: Connection, R: Receiver> {
    link: BrokerLink<K, R>,
}

impl<K: Connection, R: Receiver> Subscriber<K, R> {
    pub fn new(link: BrokerLink<K, R>) -> Self {
        Self { link }
    }

    /// Receives, logs and accepts messages until `token` is cancelled.
    ///
    /// Cancellation is checked at the top of every iteration and also ends
    /// a receive that is still waiting. It is the only way this returns
    /// `Ok`; any receive or accept failure ends the loop with an error.
    pub async fn run(&mut self, token: CancellationToken) -> Result<(), SubscribeError> {
        let receiver = self.link.endpoint_mut().ok_or(SubscribeError::Closed)?;

        loop {
            if token.is_cancelled() {
                break;
            }

            let delivery = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                received = receiver.receive() => received.map_err(SubscribeError::Receive)?,
            };

            info!("Received message: {}", delivery.text());
            debug!(
                sequence = ?delivery.sequence(),
                enqueued_at = ?delivery.enqueued_at(),
                "delivery metadata"
            );
            receiver
                .accept(&delivery)
                .await
                .map_err(SubscribeError::Accept)?;
        }

        info!("Subscriber shutting down...");
        Ok(())
    }

    /// Releases the link once the loop has stopped.
    pub async fn close(&mut self) {
        self.link.close().await;
    }
}
