//! Core error types.
//!
//! Backend failures are wrapped into [`RenderError`]. The two backend
//! conditions a caller is expected to recover from, descriptor pool exhaustion
//! and an out-of-date surface, are lifted into their own variants so callers
//! can match on them without digging into the backend error.

use thiserror::Error;

use crate::backend::BackendError;

/// Errors surfaced by the render core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// A device capability (extension, feature) required by this path is absent.
    #[error("unsupported capability: {0}")]
    Unsupported(String),
    /// No internal format fix made the requested image format usable.
    #[error("unsupported image format {format}: {reason}")]
    UnsupportedFormat { format: String, reason: String },
    /// The descriptor pool is exhausted or fragmented; grow it and retry.
    #[error("descriptor pool needs reallocation")]
    NeedsReallocation,
    /// The presentation surface changed; the swapchain must be recreated.
    #[error("surface out of date, swapchain recreation required")]
    SurfaceOutOfDate,
    /// A fixed-capacity GPU array has no free slots left.
    #[error("{what} capacity of {capacity} elements exceeded")]
    CapacityExceeded { what: &'static str, capacity: usize },
    /// An operation needed a GPU object that has not been created yet.
    #[error("{0} has not been created")]
    NotCreated(&'static str),
    /// An invalid parameter was provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The initialisation registry found a dependency cycle.
    #[error("dependency cycle detected involving {0}")]
    DependencyCycle(String),
    /// Any other backend failure.
    #[error(transparent)]
    Backend(BackendError),
}

impl From<BackendError> for RenderError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::OutOfPoolMemory | BackendError::FragmentedPool => {
                RenderError::NeedsReallocation
            }
            BackendError::SurfaceOutOfDate => RenderError::SurfaceOutOfDate,
            BackendError::Unsupported(what) => RenderError::Unsupported(what),
            other => RenderError::Backend(other),
        }
    }
}

/// Result type used throughout the render core.
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_maps_to_reallocation() {
        assert_eq!(
            RenderError::from(BackendError::OutOfPoolMemory),
            RenderError::NeedsReallocation
        );
        assert_eq!(
            RenderError::from(BackendError::FragmentedPool),
            RenderError::NeedsReallocation
        );
    }

    #[test]
    fn test_out_of_date_is_distinct() {
        let err = RenderError::from(BackendError::SurfaceOutOfDate);
        assert_eq!(err, RenderError::SurfaceOutOfDate);
        assert_ne!(err, RenderError::from(BackendError::DeviceLost));
    }

    #[test]
    fn test_error_display() {
        let err = RenderError::CapacityExceeded {
            what: "materials",
            capacity: 16,
        };
        assert_eq!(err.to_string(), "materials capacity of 16 elements exceeded");

        let err = RenderError::from(BackendError::Api {
            call: "vkQueueSubmit",
            code: -4,
        });
        assert_eq!(err.to_string(), "vkQueueSubmit failed with status -4");
    }
}
