//! # Keel Core
//!
//! Device-agnostic building blocks for GPU resource management:
//!
//! - [`handle`] - generation-checked, kind-tagged handles
//! - [`pool`] - chunked, reference-counted slot storage
//! - [`cache`] - content-addressed pools with bounded garbage collection
//! - [`profiling`] - optional Tracy instrumentation

pub mod cache;
pub mod handle;
pub mod pool;
pub mod profiling;

pub use cache::{Cache, CacheError, EntryInfo, GcCursor, Lookup};
pub use handle::{Handle, ResourceKind};
pub use pool::{Pool, PoolError, Release};

/// Core library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
