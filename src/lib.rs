pub mod cipher;
pub mod config;
pub mod derivation;
pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod storage;
pub mod vault;

pub use cipher::{CipherError, VaultCipher, KDF_ITERATIONS};
pub use config::{ConfigError, VaultConfig};
pub use derivation::{DerivationError, DerivationPath, ExtendedKey, Slip10Key};
pub use error::{VaultError, VaultResult};
pub use keys::{
    derive,
    ChainId,
    Wallet,
};
pub use mnemonic::{
    MnemonicStrength,
    MnemonicError,
    RecoveryPhrase,
    generate_entropy,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageError};
pub use vault::{
    EncryptedVaultRecord,
    LookupKey,
    PendingCreation,
    SessionSignal,
    VaultPayload,
    WalletListing,
    WalletVault,
};
