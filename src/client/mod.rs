//! The `client` module holds the two broker clients of the relay.
//!
//! - [`Publisher`] owns a send link and forwards one HTTP request body per
//!   call to the topic.
//! - [`Subscriber`] owns a receive link and drains the subscription until
//!   it is cancelled or the broker fails.
//!
//! Each client opens its own link, so a failure on one path never touches
//! the connection of the other.

pub mod publisher;
pub mod subscriber;

pub use publisher::{Publish, PublishError, Publisher};
pub use subscriber::{SubscribeError, Subscriber};

#[cfg(test)]
mod tests;
