//! Secret vault for deployments
//!
//! Secrets are stored encrypted (AES-256-GCM) and handed to agents only as
//! placeholder tokens. The plaintext leaves the vault solely through
//! [`SecretVault::resolve`], and only for a host the secret is scoped to.

pub mod crypto;
pub mod host;
pub mod placeholder;
pub mod vault;

pub use crypto::{generate_key, SecretCipher};
pub use host::host_matches;
pub use placeholder::{
    placeholder_for, replace_placeholders, replace_placeholders_in_bytes,
    scan_bytes_for_placeholders, scan_for_placeholders, PLACEHOLDER_PREFIX,
};
pub use vault::{SecretSummary, SecretVault};

use clawrelay_store::StoreError;
use thiserror::Error;

/// Vault errors
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Invalid secret name '{0}': use letters, digits and underscores")]
    InvalidName(String),

    #[error("Secret store error: {0}")]
    Store(#[from] StoreError),
}
