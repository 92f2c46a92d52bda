//! Engine services
//!
//! The run engine and classification pipeline sit on top of the bundle,
//! hashing and locking services.

pub mod advisory_lock;
pub mod bundle_builder;
pub mod bundle_hasher;
pub mod classify;
pub mod run_engine;

pub use advisory_lock::{compute_lock_key, AdvisoryLockService, LockGuard};
pub use bundle_builder::{render_bundle, Bundle, BundleBuilder, SqliteBundleBuilder};
pub use bundle_hasher::{bundle_context_hash, bundle_hash, BundleContext};
pub use classify::{parse_classification, ClassifyPipeline, ParsedLabel};
pub use run_engine::RunEngine;
