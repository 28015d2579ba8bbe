pub mod error;
pub mod key_store;
pub mod persistence;

pub use error::KeyStoreError;
pub use key_store::{
    CreateKeyOptions, ImportMode, KeyFilter, KeyPage, KeyPatch, KeySort, KeyStore,
    KeyStoreSnapshot, MAX_GROUPS, MAX_KEYS,
};
