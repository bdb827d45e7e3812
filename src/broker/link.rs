//! One role's Connection -> Session -> Endpoint chain.
//!
//! `open_sender` / `open_receiver` build the chain step by step. When a
//! step fails, whatever was already opened is released before the error is
//! returned. A successfully opened [`BrokerLink`] is released with
//! [`BrokerLink::close`]; a link dropped while still open releases itself on
//! the current tokio runtime.

use thiserror::Error;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{Connection, Connector, Endpoint, ReceiverOf, Role, SenderOf, Session};
use crate::config::BrokerSettings;
use crate::utils::BoxError;

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("{role}: failed to connect to broker: {source}")]
    Connect {
        role: Role,
        #[source]
        source: BoxError,
    },

    #[error("{role}: failed to create session: {source}")]
    Session {
        role: Role,
        #[source]
        source: BoxError,
    },

    #[error("{role}: failed to attach endpoint: {source}")]
    Endpoint {
        role: Role,
        #[source]
        source: BoxError,
    },
}

impl LinkError {
    pub fn role(&self) -> Role {
        match self {
            LinkError::Connect { role, .. }
            | LinkError::Session { role, .. }
            | LinkError::Endpoint { role, .. } => *role,
        }
    }
}

/// An open chain owned by exactly one component.
pub struct BrokerLink<K: Connection, E: Endpoint> {
    role: Role,
    chain: Option<Chain<K, E>>,
}

struct Chain<K: Connection, E> {
    connection: K,
    session: K::Session,
    endpoint: E,
}

impl<K: Connection, E: Endpoint> BrokerLink<K, E> {
    fn assemble(role: Role, connection: K, session: K::Session, endpoint: E) -> Self {
        Self {
            role,
            chain: Some(Chain {
                connection,
                session,
                endpoint,
            }),
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_open(&self) -> bool {
        self.chain.is_some()
    }

    /// The bound endpoint, `None` once the link is closed.
    pub fn endpoint_mut(&mut self) -> Option<&mut E> {
        self.chain.as_mut().map(|chain| &mut chain.endpoint)
    }

    /// Closes endpoint, session and connection in that order. Each level is
    /// attempted even if the previous one failed. Later calls do nothing.
    pub async fn close(&mut self) {
        if let Some(chain) = self.chain.take() {
            chain.release(self.role).await;
        }
    }
}

impl<K: Connection, E: Endpoint> Drop for BrokerLink<K, E> {
    fn drop(&mut self) {
        let Some(chain) = self.chain.take() else {
            return;
        };
        let role = self.role;
        match Handle::try_current() {
            Ok(handle) => {
                warn!(%role, "broker link dropped while open, releasing in background");
                handle.spawn(chain.release(role));
            }
            Err(_) => warn!(%role, "broker link dropped outside a runtime, chain not released"),
        }
    }
}

impl<K: Connection, E: Endpoint> Chain<K, E> {
    async fn release(self, role: Role) {
        let Chain {
            connection,
            session,
            endpoint,
        } = self;
        if let Err(error) = endpoint.close().await {
            warn!(%role, %error, "failed to close endpoint");
        }
        release_session(role, session, connection).await;
        debug!(%role, "broker link closed");
    }
}

async fn release_session<K: Connection>(role: Role, session: K::Session, connection: K) {
    if let Err(error) = session.end().await {
        warn!(%role, %error, "failed to end session");
    }
    release_connection(role, connection).await;
}

async fn release_connection<K: Connection>(role: Role, connection: K) {
    if let Err(error) = connection.close().await {
        warn!(%role, %error, "failed to close connection");
    }
}

fn link_name(role: Role) -> String {
    format!("busrelay-{role}-{}", Uuid::new_v4())
}

/// Connection and session, shared by both roles.
async fn establish<C: Connector>(
    connector: &C,
    settings: &BrokerSettings,
    role: Role,
) -> Result<(C::Connection, super::SessionOf<C>), LinkError> {
    let mut connection = connector
        .connect(&settings.connection)
        .await
        .map_err(|source| LinkError::Connect { role, source })?;
    debug!(%role, host = settings.connection.host(), "connected to broker");

    match connection.begin_session().await {
        Ok(session) => Ok((connection, session)),
        Err(source) => {
            release_connection(role, connection).await;
            Err(LinkError::Session { role, source })
        }
    }
}

/// Opens a chain whose endpoint sends to `settings.topic`.
pub async fn open_sender<C: Connector>(
    connector: &C,
    settings: &BrokerSettings,
) -> Result<BrokerLink<C::Connection, SenderOf<C>>, LinkError> {
    let role = Role::Send;
    let (connection, mut session) = establish(connector, settings, role).await?;

    match session.attach_sender(&link_name(role), &settings.topic).await {
        Ok(endpoint) => {
            debug!(%role, address = %settings.topic, "endpoint attached");
            Ok(BrokerLink::assemble(role, connection, session, endpoint))
        }
        Err(source) => {
            release_session(role, session, connection).await;
            Err(LinkError::Endpoint { role, source })
        }
    }
}

/// Opens a chain whose endpoint receives from `settings.subscription`.
pub async fn open_receiver<C: Connector>(
    connector: &C,
    settings: &BrokerSettings,
) -> Result<BrokerLink<C::Connection, ReceiverOf<C>>, LinkError> {
    let role = Role::Receive;
    let (connection, mut session) = establish(connector, settings, role).await?;

    match session
        .attach_receiver(&link_name(role), &settings.subscription)
        .await
    {
        Ok(endpoint) => {
            debug!(%role, address = %settings.subscription, "endpoint attached");
            Ok(BrokerLink::assemble(role, connection, session, endpoint))
        }
        Err(source) => {
            release_session(role, session, connection).await;
            Err(LinkError::Endpoint { role, source })
        }
    }
}
