//! Backup backend for Tardigrade (Storj) decentralized cloud storage.
//!
//! [`backend::Tardigrade`] is the async backend; [`blocking::BlockingTardigrade`]
//! wraps it for synchronous callers. Storage access goes through the
//! capabilities in [`adapters`], so the same backend runs against the S3
//! gateway or the in-memory store.

pub mod access;
pub mod adapters;
pub mod backend;
pub mod blocking;
pub mod config;
pub mod model;
pub mod path;
pub mod util;

pub use backend::Tardigrade;
pub use blocking::BlockingTardigrade;
pub use config::Config;
pub use model::error::{Error, Result};
