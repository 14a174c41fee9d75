//! Core domain + application logic for the attendance bot.
//!
//! This crate is framework-agnostic. Telegram lives behind the messaging port
//! implemented in the adapter crate.

pub mod attendance;
pub mod config;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod logging;
pub mod messaging;
pub mod report;
pub mod scheduler;
pub mod security;
pub mod store;

pub use errors::{Error, Result};
