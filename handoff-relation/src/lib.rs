//! # handoff-relation
//!
//! The `db` relation protocol between a key-value store (provider) and a web
//! front-end (requirer).
//!
//! - [`Provider`] publishes `host` and `port` once the local endpoint is
//!   known. Leader only.
//! - [`Requirer`] reads them back and raises [`Signal::Ready`] or
//!   [`Signal::Broken`].

pub mod error;
pub mod provider;
pub mod requirer;

pub use error::{ProviderError, RequirerError};
pub use provider::{Offer, Provider};
pub use requirer::{BrokenReason, Requirer, Signal};

/// Endpoint name both workloads bind the relation to.
pub const DB_ENDPOINT: &str = "db";
