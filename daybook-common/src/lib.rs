//! # Daybook Common Library
//!
//! Shared code for the daybook workspace:
//! - Error type shared by persistence and configuration code
//! - TOML configuration and root folder resolution
//! - Tracing initialisation
//! - SQLite schema creation and seed data

pub mod config;
pub mod db;
pub mod error;
pub mod logging;

pub use error::{Error, Result};
