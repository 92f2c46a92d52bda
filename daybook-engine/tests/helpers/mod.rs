//! Test Helper Utilities
//!
//! Shared utilities for testing daybook-engine

#![allow(dead_code)]

pub mod db_utils;
pub mod mock_provider;

// Re-export commonly used items
pub use db_utils::{create_test_db, make_atoms, run_config, seed_batch, test_settings};
pub use mock_provider::{mock_client, AuditSnapshot, ScriptedAdapter, MOCK_MODEL, MOCK_PROVIDER};
