//! The `utils` module provides the pieces shared by every other module:
//! the crate-wide error type and the tracing setup.

pub mod error;
pub mod logging;

pub use error::{BoxError, Error, Result};
