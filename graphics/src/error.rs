//! Graphics error types.

use std::fmt;

use keel_core::{CacheError, PoolError};

/// Errors that can occur while creating or managing GPU resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphicsError {
    /// Failed to initialize the device.
    InitializationFailed(String),
    /// The device refused to create a resource.
    ResourceCreationFailed(String),
    /// A requested feature is not supported.
    FeatureNotSupported(String),
    /// No shader stage format could be compiled or consumed.
    ShaderCompilationFailed(String),
    /// Out of GPU memory.
    OutOfMemory,
    /// The GPU device was lost.
    DeviceLost,
    /// An invalid parameter was provided.
    InvalidParameter(String),
    /// A handle did not name a live resource.
    StaleHandle(String),
    /// A pool reached its slot limit.
    PoolExhausted(String),
    /// An internal error occurred.
    Internal(String),
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InitializationFailed(msg) => write!(f, "initialization failed: {msg}"),
            Self::ResourceCreationFailed(msg) => write!(f, "resource creation failed: {msg}"),
            Self::FeatureNotSupported(msg) => write!(f, "feature not supported: {msg}"),
            Self::ShaderCompilationFailed(msg) => write!(f, "shader compilation failed: {msg}"),
            Self::OutOfMemory => write!(f, "out of GPU memory"),
            Self::DeviceLost => write!(f, "GPU device lost"),
            Self::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Self::StaleHandle(msg) => write!(f, "stale handle: {msg}"),
            Self::PoolExhausted(msg) => write!(f, "pool exhausted: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for GraphicsError {}

impl From<PoolError> for GraphicsError {
    fn from(e: PoolError) -> Self {
        Self::PoolExhausted(e.to_string())
    }
}

impl From<CacheError<GraphicsError>> for GraphicsError {
    fn from(e: CacheError<GraphicsError>) -> Self {
        match e {
            CacheError::Pool(e) => e.into(),
            CacheError::Construct(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GraphicsError::OutOfMemory;
        assert_eq!(err.to_string(), "out of GPU memory");

        let err = GraphicsError::InvalidParameter("size is zero".to_string());
        assert_eq!(err.to_string(), "invalid parameter: size is zero");
    }

    #[test]
    fn test_from_cache_error() {
        let err: GraphicsError =
            CacheError::Construct(GraphicsError::DeviceLost).into();
        assert_eq!(err, GraphicsError::DeviceLost);

        let err: GraphicsError = CacheError::<GraphicsError>::Pool(PoolError::Exhausted {
            kind: "sampler",
            max_slots: 4,
        })
        .into();
        assert_eq!(
            err.to_string(),
            "pool exhausted: sampler pool exhausted (4 slots)"
        );
    }
}
