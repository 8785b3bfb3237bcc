use thiserror::Error;

use crate::cipher::CipherError;
use crate::config::ConfigError;
use crate::derivation::DerivationError;
use crate::mnemonic::MnemonicError;
use crate::storage::StorageError;

pub type VaultResult<T> = std::result::Result<T, VaultError>;

/// Every failure a vault operation can surface to its caller.
///
/// Lookup misses are not errors; they come back as `Option::None`.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("Invalid recovery phrase: {0}")]
    InvalidMnemonic(#[from] MnemonicError),

    #[error("Unsupported chain: {0}")]
    UnsupportedChain(String),

    #[error("Key derivation failed: {0}")]
    DerivationFailure(#[from] DerivationError),

    /// Wrong password and damaged ciphertext are reported identically.
    #[error("Incorrect password or corrupted vault")]
    AuthenticationFailure,

    #[error("No encrypted vault found")]
    NoVaultPresent,

    #[error("Vault is locked")]
    Locked,

    /// Create and import never overwrite; reset or wipe first.
    #[error("An encrypted vault already exists")]
    VaultAlreadyExists,

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to encode vault: {0}")]
    Encoding(String),
}

impl From<CipherError> for VaultError {
    fn from(err: CipherError) -> Self {
        match err {
            CipherError::Authentication => VaultError::AuthenticationFailure,
            CipherError::Encryption => VaultError::Encoding(err.to_string()),
        }
    }
}
