use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_STORAGE_KEY: &str = "wallet_password_meta";
pub const DEFAULT_AUXILIARY_KEYS: [&str; 2] = ["wallet_reset_done", "zustand_state"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Runtime settings for a [`WalletVault`](crate::WalletVault).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct VaultConfig {
    /// Key the encrypted vault record is stored under.
    pub storage_key: String,
    /// Caller-owned keys that `wipe` removes alongside the record.
    pub auxiliary_keys: Vec<String>,
    /// Wallets derived per chain when importing or resetting from a phrase.
    pub wallets_per_chain: u32,
    /// Directory for the file-backed store, if one is used.
    pub storage_dir: Option<PathBuf>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        VaultConfig {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            auxiliary_keys: DEFAULT_AUXILIARY_KEYS.iter().map(|k| k.to_string()).collect(),
            wallets_per_chain: 1,
            storage_dir: None,
        }
    }
}

impl VaultConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: VaultConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.trim().is_empty() {
            return Err(ConfigError::Invalid("storageKey must not be empty".into()));
        }
        if self.auxiliary_keys.iter().any(|k| k == &self.storage_key) {
            return Err(ConfigError::Invalid(
                "auxiliaryKeys must not contain the storageKey".into(),
            ));
        }
        if self.wallets_per_chain == 0 {
            return Err(ConfigError::Invalid("walletsPerChain must be at least 1".into()));
        }
        Ok(())
    }
}
