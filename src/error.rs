//! Engine error taxonomy.
//!
//! Every public operation returns [`Result`]. Errors fall into the classes
//! reported by [`EngineError::kind`]; only conflicts are worth retrying.

use uuid::Uuid;

use crate::collaborators::CollaboratorError;
use crate::model::{OrderStatus, SubscriptionStatus};
use crate::storage::StorageError;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the order, subscription and billing components.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("out of stock: {product_id} (requested {requested})")]
    OutOfStock { product_id: String, requested: u32 },

    #[error("invalid address: missing {field}")]
    InvalidAddress { field: &'static str },

    #[error("illegal order transition: {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("subscription {0} is already paused")]
    AlreadyPaused(Uuid),

    #[error("subscription {id} is not active (status: {status})")]
    NotActive { id: Uuid, status: SubscriptionStatus },

    #[error("subscription {id} is not paused (status: {status})")]
    NotPaused { id: Uuid, status: SubscriptionStatus },

    #[error("subscription {id} is closed (status: {status})")]
    SubscriptionClosed { id: Uuid, status: SubscriptionStatus },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("concurrent modification of {entity} {id}")]
    Conflict { entity: &'static str, id: String },

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("storage error: {0}")]
    Storage(StorageError),
}

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or a rejected state change. Terminal to the request.
    Validation,
    /// Concurrent mutation. Re-read and retry.
    Conflict,
    /// Entity does not exist. Terminal to the request.
    NotFound,
    /// A collaborator (payment, tax, inventory, email) failed.
    External,
    /// Storage or other infrastructure failure.
    Internal,
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound { .. } => ErrorKind::NotFound,
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Collaborator(_) => ErrorKind::External,
            EngineError::Storage(_) => ErrorKind::Internal,
            EngineError::OutOfStock { .. }
            | EngineError::InvalidAddress { .. }
            | EngineError::IllegalTransition { .. }
            | EngineError::AlreadyPaused(_)
            | EngineError::NotActive { .. }
            | EngineError::NotPaused { .. }
            | EngineError::SubscriptionClosed { .. }
            | EngineError::Validation(_) => ErrorKind::Validation,
        }
    }

    /// Returns true if the caller may re-read state and try again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }

    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        EngineError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation(message.into())
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { entity, id } => EngineError::NotFound { entity, id },
            StorageError::VersionConflict { entity, id, .. } => {
                EngineError::Conflict { entity, id }
            }
            StorageError::StatusConflict { entity, id, .. } => {
                EngineError::Conflict { entity, id }
            }
            other => EngineError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_not_found_maps_to_not_found() {
        let err: EngineError = StorageError::NotFound {
            entity: "order",
            id: "abc".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "order not found: abc");
    }

    #[test]
    fn test_version_conflict_is_retryable() {
        let err: EngineError = StorageError::VersionConflict {
            entity: "subscription",
            id: "s-1".to_string(),
            expected: 3,
        }
        .into();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_validation_errors_are_terminal() {
        let err = EngineError::InvalidAddress { field: "city" };
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(!err.is_retryable());
        assert_eq!(err.to_string(), "invalid address: missing city");
    }

    #[test]
    fn test_illegal_transition_display() {
        let err = EngineError::IllegalTransition {
            from: OrderStatus::Delivered,
            to: OrderStatus::Processing,
        };
        assert_eq!(
            err.to_string(),
            "illegal order transition: delivered -> processing"
        );
    }
}
