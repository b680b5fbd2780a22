//! Shared configuration and error types for the moe-socket workspace.

pub mod config;
pub mod error;

pub use error::{Error, Result};
