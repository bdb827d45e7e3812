//! The `transport` module is the HTTP ingress of the relay.
//!
//! It exposes `POST /publish`, turns each JSON body into one call on a
//! [`Publish`](crate::client::Publish) implementation, and maps the outcome
//! to a fixed set of JSON replies.

pub mod http;
pub mod message;

pub use http::{router, serve};
pub use message::{PublishRequest, Reply};

#[cfg(test)]
mod tests;
