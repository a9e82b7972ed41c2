//! Core Mirror module
//!
//! This module provides the fundamental pieces shared by every Mirror crate:
//! the ordered key-value storage abstraction, hashing, and calendar helpers.

pub mod storage;
pub mod crypto;
pub mod utils;

// Re-export key components
pub use storage::{
    pad_id, JsonStorage, MemoryStorage, SledStorage, Storage, StorageError, StorageResult,
    WriteBatch,
};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Package description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Initialize tracing for Mirror
///
/// `RUST_LOG` takes precedence over `default_level`. Returns `false` when a
/// global subscriber was already installed.
pub fn init_tracing(default_level: &str) -> bool {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();

    tracing::subscriber::set_global_default(subscriber).is_ok()
}
