//! Hookline — chat portal gateway with asynchronous webhook reply reconciliation.
//!
//! A user's chat turn is relayed to an external automation endpoint that does
//! not answer synchronously. The provider posts its answer back later, on an
//! unrelated inbound HTTP connection, and the reconciliation core correlates
//! that callback to the exact pending conversation turn that triggered it.

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod gateway;
pub mod security;
pub mod storage;
pub mod util;
pub mod webhook;

pub use config::Config;
