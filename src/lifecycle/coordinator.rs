use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::broker::{Connector, ReceiverOf, open_receiver, open_sender};
use crate::client::{Publisher, SubscribeError, Subscriber};
use crate::config::Settings;
use crate::transport;
use crate::utils::{Error, Result};

type SubscriberOf<C> = Subscriber<<C as Connector>::Connection, ReceiverOf<C>>;
type SubscriberTask<C> = JoinHandle<(SubscriberOf<C>, Result<(), SubscribeError>)>;

/// Starts the publisher, the subscriber loop and the HTTP listener, in that
/// order, and tears them down again when the termination future resolves
/// or one of the background activities fails.
pub struct Coordinator<C: Connector> {
    settings: Settings,
    connector: C,
}

impl<C: Connector> Coordinator<C> {
    pub fn new(settings: Settings, connector: C) -> Self {
        Self {
            settings,
            connector,
        }
    }

    /// Runs until `termination` resolves or something fatal happens.
    ///
    /// Shutdown sequence: cancel the subscriber, stop the listener and give
    /// in-flight requests the configured grace period, wait for the
    /// subscriber to stop, then close the subscriber's and the publisher's
    /// links. The first fatal error met on the way is returned after the
    /// links are closed. Once the grace period has run out, each remaining
    /// step gets at most another grace period before it is abandoned.
    pub async fn run<F>(self, listener: TcpListener, termination: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let broker = &self.settings.broker;
        let addr = listener.local_addr().map_err(Error::Ingress)?;

        let publisher = Arc::new(Publisher::new(open_sender(&self.connector, broker).await?));
        info!(topic = %broker.topic, "Publisher started successfully");

        let subscriber = match open_receiver(&self.connector, broker).await {
            Ok(link) => Subscriber::new(link),
            Err(e) => {
                publisher.close().await;
                return Err(e.into());
            }
        };

        let token = CancellationToken::new();
        let mut subscriber_task: SubscriberTask<C> = tokio::spawn({
            let token = token.clone();
            let mut subscriber = subscriber;
            async move {
                let result = subscriber.run(token).await;
                (subscriber, result)
            }
        });
        info!(subscription = %broker.subscription, "Subscriber started successfully");

        let stop = CancellationToken::new();
        let mut server_task = tokio::spawn(transport::serve(
            listener,
            transport::router(publisher.clone()),
            stop.clone(),
        ));
        info!("HTTP server started on {addr}");

        let mut failure = None;
        let mut subscriber_done = None;
        let mut server_done = None;

        tokio::select! {
            () = termination => info!("Shutdown signal received"),
            joined = &mut subscriber_task => subscriber_done = Some(joined),
            served = &mut server_task => server_done = Some(served),
        }

        token.cancel();
        stop.cancel();

        let grace = self.settings.server.shutdown_grace;
        // set once the drain overran; every later step gets at most `grace`
        let mut limit = None;
        let served = match server_done {
            Some(served) => Some(served),
            None => match tokio::time::timeout(grace, &mut server_task).await {
                Ok(served) => Some(served),
                Err(_) => {
                    server_task.abort();
                    limit = Some(grace);
                    record(&mut failure, Error::ShutdownTimeout(grace));
                    None
                }
            },
        };
        match served {
            Some(Ok(Ok(()))) | None => {}
            Some(Ok(Err(e))) => record(&mut failure, Error::Ingress(e)),
            Some(Err(e)) => record(&mut failure, Error::Task(e)),
        }

        let joined = match subscriber_done {
            Some(joined) => Some(joined),
            None => bounded(limit, "subscriber", &mut subscriber_task).await,
        };
        match joined {
            Some(Ok((mut subscriber, result))) => {
                if let Err(e) = result {
                    record(&mut failure, e.into());
                }
                bounded(limit, "subscriber link", subscriber.close()).await;
            }
            Some(Err(e)) => record(&mut failure, Error::Task(e)),
            // the link is released by its drop guard
            None => subscriber_task.abort(),
        }

        // a request still sending holds the publisher link; abandoning the
        // close leaves it to the drop guard once that request ends
        bounded(limit, "publisher link", publisher.close()).await;

        match failure {
            Some(e) => Err(e),
            None => {
                info!("Gracefully shut down");
                Ok(())
            }
        }
    }
}

/// Keeps the first fatal error for the caller to report; later ones are
/// only logged.
fn record(slot: &mut Option<Error>, e: Error) {
    if slot.is_some() {
        warn!("additional failure during shutdown: {e}");
    } else {
        *slot = Some(e);
    }
}

/// Awaits `step`, for at most `limit` when one is set.
async fn bounded<T>(
    limit: Option<Duration>,
    what: &str,
    step: impl Future<Output = T>,
) -> Option<T> {
    let Some(limit) = limit else {
        return Some(step.await);
    };
    match tokio::time::timeout(limit, step).await {
        Ok(output) => Some(output),
        Err(_) => {
            warn!("{what} still busy {limit:?} after the grace period ran out, abandoning it");
            None
        }
    }
}
