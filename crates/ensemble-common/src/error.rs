//! Common error types for Ensemble components.

use thiserror::Error;

/// Boxed underlying cause carried by wrapped store failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias used throughout the coordination layer
pub type Result<T, E = CoordError> = std::result::Result<T, E>;

/// Errors raised by the coordination layer and its store backends
#[derive(Debug, Error)]
pub enum CoordError {
    /// Malformed path or input, raised before any store call
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Node does not exist
    #[error("No node: {0}")]
    NoNode(String),

    /// Node already exists
    #[error("Node exists: {0}")]
    NodeExists(String),

    /// Node still has children
    #[error("Node not empty: {0}")]
    NotEmpty(String),

    /// Store is partitioned, read-only, or unreachable
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Store call did not answer in time
    #[error("Store operation timed out: {0}")]
    Timeout(String),

    /// Any other store failure, wrapped with context
    #[error("Store operation failed: {context}")]
    StoreOperationFailed {
        context: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Requested digest algorithm is not available
    #[error("Digest unavailable: {0}")]
    DigestUnavailable(String),
}

impl CoordError {
    /// Build a `StoreOperationFailed` without an underlying cause
    pub fn operation(context: impl Into<String>) -> Self {
        Self::StoreOperationFailed {
            context: context.into(),
            source: None,
        }
    }

    /// Wrap this error as a `StoreOperationFailed`, keeping availability errors distinct
    pub fn wrap(self, context: impl Into<String>) -> Self {
        match self {
            Self::StoreUnavailable(_) | Self::InvalidArgument(_) | Self::DigestUnavailable(_) => {
                self
            }
            other => Self::StoreOperationFailed {
                context: context.into(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Returns true if the caller may retry the same call
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_) | Self::Timeout(_))
    }

    pub fn is_no_node(&self) -> bool {
        matches!(self, Self::NoNode(_))
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, Self::NodeExists(_))
    }

    pub fn is_not_empty(&self) -> bool {
        matches!(self, Self::NotEmpty(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_keeps_unavailable_distinct() {
        let err = CoordError::StoreUnavailable("read-only".into()).wrap("cannot write");
        assert!(matches!(err, CoordError::StoreUnavailable(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_wrap_boxes_other_errors() {
        let err = CoordError::NoNode("/a".into()).wrap("cannot read /a");
        match err {
            CoordError::StoreOperationFailed { context, source } => {
                assert_eq!(context, "cannot read /a");
                assert!(source.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
