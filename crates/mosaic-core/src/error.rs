//! Error types for atlas allocation, texture virtualization and batching.

use thiserror::Error;

/// Result type for mosaic-core operations.
pub type Result<T> = std::result::Result<T, MosaicError>;

/// Errors surfaced by the core.
///
/// Capacity failures of the allocator and of a single atlas are plain return
/// values (`Option`/`bool`); they only show up here once a caller has no
/// further fallback.
#[derive(Error, Debug)]
pub enum MosaicError {
    /// Invalid construction parameters (sizes, factors, unit counts).
    #[error("invalid configuration: {0}")]
    Config(String),

    /// No room for the request.
    #[error("capacity exceeded: {0}")]
    Capacity(String),

    /// Precondition violated by the caller.
    #[error("usage error: {0}")]
    Usage(String),

    /// The low-resource fallback could not find a physical texture.
    #[error("resource exhaustion: {0}")]
    ResourceExhausted(String),

    /// Graphics backend failure.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// Broken internal invariant. Indicates a bug.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl MosaicError {
    pub fn is_capacity(&self) -> bool {
        matches!(self, MosaicError::Capacity(_))
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, MosaicError::Usage(_))
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, MosaicError::Internal(_))
    }
}

/// Errors reported by a [`crate::backend::TextureBackend`] or
/// [`crate::backend::DrawBackend`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The device could not allocate the resource.
    #[error("out of device memory")]
    OutOfMemory,

    #[error("unknown texture {0}")]
    UnknownTexture(u32),

    #[error("unknown buffer {0}")]
    UnknownBuffer(u32),

    /// Region or range outside the resource.
    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    /// Any other device failure.
    #[error("device error: {0}")]
    Device(String),
}

impl BackendError {
    /// True when the failure means "no more resources" rather than misuse.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, BackendError::OutOfMemory)
    }
}
