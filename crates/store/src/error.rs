use paygate_core::Credit;
use thiserror::Error;

/// Errors raised directly by the key/group store. The gate and admin
/// surfaces translate these into the shared [`paygate_core::PaygateError`]
/// taxonomy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyStoreError {
    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("insufficient credits: balance {available} < requested {requested}")]
    InsufficientCredits { available: Credit, requested: Credit },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("maximum key count exceeded")]
    MaxKeysExceeded,
}

impl From<KeyStoreError> for paygate_core::PaygateError {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::KeyNotFound(id) => Self::NotFound(format!("key {id}")),
            KeyStoreError::GroupNotFound(name) => Self::NotFound(format!("group {name}")),
            KeyStoreError::InsufficientCredits { .. } => Self::deny("insufficient_credits"),
            KeyStoreError::Conflict(msg) => Self::Conflict(msg),
            KeyStoreError::MaxKeysExceeded => Self::Validation("maximum key count exceeded".into()),
        }
    }
}
