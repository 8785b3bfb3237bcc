use std::fmt;
use std::str::FromStr;

use bitcoin_hashes::{hash160, Hash};
use hmac::{Hmac, Mac};
use secp256k1::{PublicKey, Scalar, Secp256k1, SecretKey};
use sha2::Sha512;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

type HmacSha512 = Hmac<Sha512>;

pub const HARDENED_BIT: u32 = 0x80000000;

const BIP32_MASTER_SECRET: &[u8] = b"Bitcoin seed";
const SLIP10_ED25519_SECRET: &[u8] = b"ed25519 seed";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DerivationError {
    #[error("invalid derivation path '{0}'")]
    InvalidPath(String),

    #[error("invalid child number '{0}'")]
    InvalidChildNumber(String),

    #[error("ed25519 derivation requires hardened segments, got '{0}'")]
    NonHardenedSegment(String),

    #[error("seed must be 16 to 64 bytes, got {0}")]
    InvalidSeed(usize),

    #[error("derived key is outside the curve order")]
    KeyDerivationFailed,

    #[error("HMAC operation failed")]
    HmacError,
}

/// A BIP-32 path such as `m/44'/60'/0'/0/7`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivationPath {
    indices: Vec<u32>,
}

impl DerivationPath {
    pub fn from_indices(indices: Vec<u32>) -> Self {
        DerivationPath { indices }
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn is_fully_hardened(&self) -> bool {
        self.indices.iter().all(|i| i & HARDENED_BIT != 0)
    }
}

impl FromStr for DerivationPath {
    type Err = DerivationError;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        let path = path.trim();
        let mut components = path.split('/');
        if components.next() != Some("m") {
            return Err(DerivationError::InvalidPath(path.to_string()));
        }

        let indices: Result<Vec<u32>, _> = components
            .map(|component| {
                let hardened = component.ends_with('\'') || component.ends_with('h');
                let index_str = if hardened {
                    &component[..component.len() - 1]
                } else {
                    component
                };

                match index_str.parse::<u32>() {
                    Ok(index) if index < HARDENED_BIT => {
                        if hardened {
                            Ok(index | HARDENED_BIT)
                        } else {
                            Ok(index)
                        }
                    }
                    _ => Err(DerivationError::InvalidChildNumber(component.to_string())),
                }
            })
            .collect();

        indices.map(|indices| DerivationPath { indices })
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "m")?;
        for index in &self.indices {
            if index & HARDENED_BIT != 0 {
                write!(f, "/{}'", index & !HARDENED_BIT)?;
            } else {
                write!(f, "/{}", index)?;
            }
        }
        Ok(())
    }
}

/// A BIP-32 extended private key on secp256k1.
#[derive(Clone)]
pub struct ExtendedKey {
    secret: Zeroizing<[u8; 32]>,
    pub public_key: PublicKey,
    pub chain_code: Zeroizing<[u8; 32]>,
}

impl ExtendedKey {
    /// Creates a new master key from a seed
    pub fn from_seed(seed: &[u8]) -> Result<Self, DerivationError> {
        check_seed_len(seed)?;

        let (left, chain_code) = hmac_split(BIP32_MASTER_SECRET, &[seed])?;
        let private_key =
            SecretKey::from_slice(&left[..]).map_err(|_| DerivationError::KeyDerivationFailed)?;

        Ok(Self::assemble(private_key, chain_code))
    }

    /// Derives a child key based on the provided index
    pub fn derive_child(&self, index: u32) -> Result<Self, DerivationError> {
        let parent = self.secret_key()?;

        let mut data = Zeroizing::new(Vec::with_capacity(37));
        if index & HARDENED_BIT != 0 {
            data.push(0);
            data.extend_from_slice(&self.secret[..]);
        } else {
            data.extend_from_slice(&self.public_key.serialize());
        }
        data.extend_from_slice(&index.to_be_bytes());

        let (left, chain_code) = hmac_split(&self.chain_code[..], &[&data[..]])?;

        // IL >= n or a zero child key make this index unusable (BIP-32 §Private parent key)
        let tweak =
            Scalar::from_be_bytes(*left).map_err(|_| DerivationError::KeyDerivationFailed)?;
        let child = parent
            .add_tweak(&tweak)
            .map_err(|_| DerivationError::KeyDerivationFailed)?;

        Ok(Self::assemble(child, chain_code))
    }

    /// Walks `path` starting from this key.
    pub fn derive_path(&self, path: &DerivationPath) -> Result<Self, DerivationError> {
        let mut key = self.clone();
        for &index in path.indices() {
            key = key.derive_child(index)?;
        }
        Ok(key)
    }

    /// Calculates the fingerprint of this key
    pub fn fingerprint(&self) -> [u8; 4] {
        let hash = hash160::Hash::hash(&self.public_key.serialize());
        let mut result = [0u8; 4];
        result.copy_from_slice(&<hash160::Hash as AsRef<[u8]>>::as_ref(&hash)[0..4]);
        result
    }

    pub fn secret_bytes(&self) -> &[u8; 32] {
        &self.secret
    }

    pub fn secret_key(&self) -> Result<SecretKey, DerivationError> {
        SecretKey::from_slice(&self.secret[..]).map_err(|_| DerivationError::KeyDerivationFailed)
    }

    fn assemble(private_key: SecretKey, chain_code: Zeroizing<[u8; 32]>) -> Self {
        let secp = Secp256k1::signing_only();
        let public_key = PublicKey::from_secret_key(&secp, &private_key);
        ExtendedKey {
            secret: Zeroizing::new(private_key.secret_bytes()),
            public_key,
            chain_code,
        }
    }
}

/// A SLIP-0010 ed25519 node. Only hardened children exist on this curve.
pub struct Slip10Key {
    pub key: Zeroizing<[u8; 32]>,
    pub chain_code: Zeroizing<[u8; 32]>,
}

impl Slip10Key {
    pub fn from_seed(seed: &[u8]) -> Result<Self, DerivationError> {
        check_seed_len(seed)?;
        let (key, chain_code) = hmac_split(SLIP10_ED25519_SECRET, &[seed])?;
        Ok(Slip10Key { key, chain_code })
    }

    /// Derives the hardened child `index'`. The hardened bit is applied here.
    pub fn derive_hardened(&self, index: u32) -> Result<Self, DerivationError> {
        let hardened_index = index | HARDENED_BIT;
        let (key, chain_code) = hmac_split(
            &self.chain_code[..],
            &[&[0x00u8][..], &self.key[..], &hardened_index.to_be_bytes()[..]],
        )?;
        Ok(Slip10Key { key, chain_code })
    }

    pub fn derive_path(seed: &[u8], path: &DerivationPath) -> Result<Self, DerivationError> {
        if !path.is_fully_hardened() {
            return Err(DerivationError::NonHardenedSegment(path.to_string()));
        }

        let mut node = Self::from_seed(seed)?;
        for &index in path.indices() {
            node = node.derive_hardened(index)?;
        }
        Ok(node)
    }
}

fn check_seed_len(seed: &[u8]) -> Result<(), DerivationError> {
    if !(16..=64).contains(&seed.len()) {
        return Err(DerivationError::InvalidSeed(seed.len()));
    }
    Ok(())
}

/// HMAC-SHA512 over the concatenation of `parts`, split into IL and IR.
fn hmac_split(
    key: &[u8],
    parts: &[&[u8]],
) -> Result<(Zeroizing<[u8; 32]>, Zeroizing<[u8; 32]>), DerivationError> {
    let mut mac = HmacSha512::new_from_slice(key).map_err(|_| DerivationError::HmacError)?;
    for part in parts {
        mac.update(part);
    }

    let mut result = mac.finalize().into_bytes();
    let mut left = Zeroizing::new([0u8; 32]);
    let mut right = Zeroizing::new([0u8; 32]);
    left.copy_from_slice(&result[..32]);
    right.copy_from_slice(&result[32..]);
    result.as_mut_slice().zeroize();

    Ok((left, right))
}
