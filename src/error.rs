use thiserror::Error;

use crate::providers::types::ProviderError;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Invalid message: {0}")]
    Validation(String),

    #[error("Response failed: {0}")]
    ResponseFetch(#[from] ProviderError),

    /// Internal invariant broken; never a user-facing condition.
    #[error("Consistency violation: {0}")]
    Consistency(String),
}
