//! Shared error helpers and identifier types used across all chronos crates.

pub mod error;
pub mod id;

pub use error::FromMessage;
