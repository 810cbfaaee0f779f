use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecipeError {
    #[error("not initialized: run 'recipes init'")]
    NotInitialized,

    #[error("recipe not found: {0}")]
    RecipeNotFound(u64),

    #[error("recipe revision not found: {0}")]
    RevisionNotFound(u64),

    #[error("action not found: {0}")]
    ActionNotFound(String),

    #[error("approval request not found: {0}")]
    ApprovalRequestNotFound(u64),

    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("approval conflict: {0}")]
    ApprovalConflict(String),

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: String,
        to: String,
        reason: String,
    },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("signing error: {0}")]
    Signing(String),

    #[error("store error: {0}")]
    Store(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl RecipeError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for every variant that means "the thing you asked for does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RecipeError::RecipeNotFound(_)
                | RecipeError::RevisionNotFound(_)
                | RecipeError::ActionNotFound(_)
                | RecipeError::ApprovalRequestNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RecipeError>;
