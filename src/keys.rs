use std::fmt;
use std::str::FromStr;

use ed25519_dalek::SigningKey;
use secp256k1::PublicKey;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::derivation::{DerivationError, DerivationPath, ExtendedKey, Slip10Key, HARDENED_BIT};
use crate::error::VaultError;

const BIP44_PURPOSE: u32 = 44;

/// The chains a vault can hold keys for. Serialized as the BIP-44 coin type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainId {
    /// Ed25519, base58 keys. Coin type 501.
    #[serde(rename = "501")]
    Solana,
    /// secp256k1, 0x-hex keys and EIP-55 addresses. Coin type 60.
    #[serde(rename = "60")]
    Ethereum,
}

impl ChainId {
    /// Every supported chain, in the order import derives them.
    pub const ALL: [ChainId; 2] = [ChainId::Ethereum, ChainId::Solana];

    pub fn coin_type(&self) -> u32 {
        match self {
            ChainId::Solana => 501,
            ChainId::Ethereum => 60,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Solana => "solana",
            ChainId::Ethereum => "ethereum",
        }
    }

    pub fn from_coin_type(coin_type: &str) -> Result<Self, VaultError> {
        match coin_type.trim() {
            "501" => Ok(ChainId::Solana),
            "60" => Ok(ChainId::Ethereum),
            other => Err(VaultError::UnsupportedChain(other.to_string())),
        }
    }

    /// The canonical path for the `index`-th wallet on this chain.
    ///
    /// Solana: `m/44'/501'/{index}'/0'`. Ethereum: `m/44'/60'/0'/0/{index}`.
    pub fn derivation_path(&self, index: u32) -> Result<DerivationPath, DerivationError> {
        if index & HARDENED_BIT != 0 {
            return Err(DerivationError::InvalidChildNumber(index.to_string()));
        }

        let hardened = |i: u32| i | HARDENED_BIT;
        let indices = match self {
            ChainId::Solana => vec![
                hardened(BIP44_PURPOSE),
                hardened(self.coin_type()),
                hardened(index),
                hardened(0),
            ],
            ChainId::Ethereum => vec![
                hardened(BIP44_PURPOSE),
                hardened(self.coin_type()),
                hardened(0),
                0,
                index,
            ],
        };
        Ok(DerivationPath::from_indices(indices))
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ChainId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "solana" | "sol" => Ok(ChainId::Solana),
            "ethereum" | "eth" => Ok(ChainId::Ethereum),
            other => ChainId::from_coin_type(other),
        }
    }
}

/// A derived keypair together with the metadata needed to re-derive it.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    #[serde(rename = "path")]
    pub derivation_path: String,
    #[serde(with = "secret_string")]
    pub derived_seed: Zeroizing<String>,
    #[serde(with = "secret_string")]
    pub private_key: Zeroizing<String>,
    pub public_key: String,
    #[serde(rename = "coinType")]
    pub chain_id: ChainId,
    #[serde(rename = "accountNumber")]
    pub account_id: Uuid,
    pub index: u32,
}

impl Wallet {
    /// True when both wallets hold the same keys, ignoring `account_id`.
    pub fn same_keys(&self, other: &Wallet) -> bool {
        self.chain_id == other.chain_id
            && self.index == other.index
            && self.derivation_path == other.derivation_path
            && *self.derived_seed == *other.derived_seed
            && *self.private_key == *other.private_key
            && self.public_key == other.public_key
    }
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("chain_id", &self.chain_id)
            .field("index", &self.index)
            .field("derivation_path", &self.derivation_path)
            .field("public_key", &self.public_key)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

/// Derives the `index`-th wallet of `chain` from a BIP-39 master seed.
///
/// Everything except `account_id` is a pure function of the inputs.
pub fn derive(master_seed: &[u8], chain: ChainId, index: u32) -> Result<Wallet, DerivationError> {
    let path = chain.derivation_path(index)?;

    let wallet = match chain {
        ChainId::Solana => derive_solana(master_seed, &path)?,
        ChainId::Ethereum => derive_ethereum(master_seed, &path)?,
    };

    debug!(chain = %chain, index, path = %path, "derived wallet");
    Ok(Wallet {
        derivation_path: path.to_string(),
        chain_id: chain,
        account_id: Uuid::new_v4(),
        index,
        ..wallet
    })
}

fn derive_solana(master_seed: &[u8], path: &DerivationPath) -> Result<Wallet, DerivationError> {
    let node = Slip10Key::derive_path(master_seed, path)?;
    let signing_key = SigningKey::from_bytes(&node.key);
    let keypair = Zeroizing::new(signing_key.to_keypair_bytes());

    Ok(Wallet {
        derivation_path: String::new(),
        derived_seed: Zeroizing::new(hex::encode(&node.key[..])),
        private_key: Zeroizing::new(bs58::encode(&keypair[..]).into_string()),
        public_key: bs58::encode(signing_key.verifying_key().as_bytes()).into_string(),
        chain_id: ChainId::Solana,
        account_id: Uuid::nil(),
        index: 0,
    })
}

fn derive_ethereum(master_seed: &[u8], path: &DerivationPath) -> Result<Wallet, DerivationError> {
    let key = ExtendedKey::from_seed(master_seed)?.derive_path(path)?;
    let secret_hex = Zeroizing::new(hex::encode(key.secret_bytes()));

    Ok(Wallet {
        derivation_path: String::new(),
        private_key: Zeroizing::new(format!("0x{}", secret_hex.as_str())),
        derived_seed: secret_hex,
        public_key: eth_address(&key.public_key),
        chain_id: ChainId::Ethereum,
        account_id: Uuid::nil(),
        index: 0,
    })
}

/// EIP-55 checksummed address of a secp256k1 public key.
pub fn eth_address(public_key: &PublicKey) -> String {
    // Drop the 0x04 uncompressed-point prefix
    let key_bytes = public_key.serialize_uncompressed();
    let hash = keccak_hash::keccak(&key_bytes[1..]);
    to_checksum_address(&hash.as_bytes()[12..32])
}

/// Applies the EIP-55 mixed-case checksum to a 20-byte address.
pub fn to_checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = keccak_hash::keccak(lower.as_bytes());
    let hash = hash.as_bytes();

    let mut result = String::with_capacity(2 + lower.len());
    result.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            result.push(c.to_ascii_uppercase());
        } else {
            result.push(c);
        }
    }
    result
}

mod secret_string {
    use serde::{Deserialize, Deserializer, Serializer};
    use zeroize::Zeroizing;

    pub fn serialize<S: Serializer>(value: &Zeroizing<String>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(value.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Zeroizing<String>, D::Error> {
        String::deserialize(deserializer).map(Zeroizing::new)
    }
}
