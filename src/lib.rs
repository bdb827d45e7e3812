//! # busrelay
//!
//! `busrelay` bridges HTTP producers and a message-broker topic. Messages
//! posted to `POST /publish` are forwarded to the topic, and a background
//! subscriber drains one subscription of that topic, logging and
//! acknowledging every message it receives.
//!
//! ## Core Modules
//!
//! - `broker`: the broker seam (connector, connection, session, endpoints),
//!   the AMQP 1.0 and in-memory bindings, and the owned per-role link.
//! - `client`: the publisher and the subscriber loop.
//! - `config`: loading settings from a file and `ASB_*` variables.
//! - `lifecycle`: startup order, the shared cancellation token and graceful
//!   shutdown.
//! - `transport`: the HTTP ingress.
//! - `utils`: error taxonomy and logging.

pub mod broker;
pub mod client;
pub mod config;
pub mod lifecycle;
pub mod transport;
pub mod utils;
