//! The `error` module defines the error taxonomy of the relay.
//!
//! Each layer owns a narrow error enum (`ConfigError`, `LinkError`,
//! `PublishError`, `SubscribeError`); this module folds them into the
//! crate-level [`Error`] that the lifecycle coordinator and the binary deal
//! with. Only publish failures are recovered locally (as an HTTP 500); every
//! variant of [`Error`] is fatal to the process.

use std::time::Duration;

use thiserror::Error;

use crate::broker::LinkError;
use crate::client::SubscribeError;
use crate::config::ConfigError;

/// Boxed error surfaced by broker bindings.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to load config: {0}")]
    Config(#[from] ConfigError),

    /// Connect, session or endpoint setup failed for one of the two links.
    #[error("initialization failed: {0}")]
    Initialization(#[from] LinkError),

    #[error("subscriber error: {0}")]
    Subscriber(#[from] SubscribeError),

    #[error("HTTP listener failed: {0}")]
    Ingress(#[source] std::io::Error),

    #[error("HTTP server did not drain within the {0:?} grace period")]
    ShutdownTimeout(Duration),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
