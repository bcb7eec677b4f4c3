//! Prefstore Common - Shared types and utilities
//!
//! This crate provides the value model, error definitions, and size limits
//! used by both storage engines and the public facade.

pub mod config;
pub mod error;
pub mod value;

pub use config::StoreConfig;
pub use error::{Error, Result};
pub use value::{Value, ValueKind};
