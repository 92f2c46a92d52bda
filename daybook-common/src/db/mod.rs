//! Database schema and initialisation

pub mod init;

pub use init::*;
