use std::fmt;

use bip39::{Language, Mnemonic};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize, Serializer};
use serde::ser::SerializeStruct;
use thiserror::Error;
use zeroize::{Zeroize, Zeroizing};

/// Length in bytes of a BIP-39 seed.
pub const SEED_LEN: usize = 64;

pub enum MnemonicStrength {
    Words12,
    Words24,
}

impl MnemonicStrength {
    fn to_entropy_bits(&self) -> usize {
        match self {
            MnemonicStrength::Words12 => 128,
            MnemonicStrength::Words24 => 256,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MnemonicError {
    #[error("expected 12 or 24 words, got {0}")]
    InvalidWordCount(usize),

    #[error("word '{0}' is not in the BIP-39 wordlist")]
    UnknownWord(String),

    #[error("checksum validation failed")]
    ChecksumFailed,

    #[error("{0}")]
    Malformed(String),

    #[error("failed to generate entropy")]
    EntropyGenerationFailed,

    #[error("stored seed does not match the recovery phrase")]
    SeedMismatch,
}

/// The vault's root secret: a checksummed mnemonic and the seed it expands to.
///
/// Both halves are wiped from memory on drop.
pub struct RecoveryPhrase {
    mnemonic: Zeroizing<String>,
    master_seed: Zeroizing<[u8; SEED_LEN]>,
}

impl RecoveryPhrase {
    /// Generates a fresh 12-word phrase from OS randomness.
    pub fn generate() -> Result<Self, MnemonicError> {
        Self::generate_with(MnemonicStrength::Words12)
    }

    pub fn generate_with(strength: MnemonicStrength) -> Result<Self, MnemonicError> {
        let entropy_bytes = strength.to_entropy_bits() / 8;
        let entropy = generate_entropy(entropy_bytes)?;

        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|_| MnemonicError::EntropyGenerationFailed)?;
        let phrase = join_words(&mnemonic);

        Ok(Self {
            master_seed: seed_of(&mnemonic),
            mnemonic: phrase,
        })
    }

    /// Parses a user-supplied phrase. Case and whitespace are normalized first.
    pub fn from_phrase(phrase: &str) -> Result<Self, MnemonicError> {
        let normalized = normalize(phrase);
        let mnemonic = parse(&normalized)?;

        Ok(Self {
            master_seed: seed_of(&mnemonic),
            mnemonic: normalized,
        })
    }

    pub fn phrase(&self) -> &str {
        &self.mnemonic
    }

    pub fn word_count(&self) -> usize {
        self.mnemonic.split(' ').count()
    }

    pub fn master_seed(&self) -> &[u8; SEED_LEN] {
        &self.master_seed
    }

    pub fn master_seed_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(&self.master_seed[..]))
    }
}

impl Clone for RecoveryPhrase {
    fn clone(&self) -> Self {
        Self {
            mnemonic: self.mnemonic.clone(),
            master_seed: self.master_seed.clone(),
        }
    }
}

impl PartialEq for RecoveryPhrase {
    fn eq(&self, other: &Self) -> bool {
        *self.mnemonic == *other.mnemonic
    }
}

impl Eq for RecoveryPhrase {}

impl fmt::Debug for RecoveryPhrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryPhrase")
            .field("words", &self.word_count())
            .finish_non_exhaustive()
    }
}

impl Serialize for RecoveryPhrase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let seed_hex = self.master_seed_hex();
        let mut state = serializer.serialize_struct("RecoveryPhrase", 2)?;
        state.serialize_field("mnemonicPhrase", self.mnemonic.as_str())?;
        state.serialize_field("masterSeedPhrase", seed_hex.as_str())?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecoveryPhrase {
    mnemonic_phrase: String,
    master_seed_phrase: String,
}

impl Drop for StoredRecoveryPhrase {
    fn drop(&mut self) {
        self.mnemonic_phrase.zeroize();
        self.master_seed_phrase.zeroize();
    }
}

impl<'de> Deserialize<'de> for RecoveryPhrase {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredRecoveryPhrase::deserialize(deserializer)?;
        let phrase = RecoveryPhrase::from_phrase(&stored.mnemonic_phrase)
            .map_err(serde::de::Error::custom)?;

        // The seed is always recomputed; the stored copy only has to agree with it.
        if !phrase.master_seed_hex().eq_ignore_ascii_case(&stored.master_seed_phrase) {
            return Err(serde::de::Error::custom(MnemonicError::SeedMismatch));
        }
        Ok(phrase)
    }
}

/// Lowercases, trims and collapses runs of whitespace to single spaces.
pub fn normalize(phrase: &str) -> Zeroizing<String> {
    let lowered = Zeroizing::new(phrase.to_lowercase());
    let words: Vec<&str> = lowered.split_whitespace().collect();
    Zeroizing::new(words.join(" "))
}

/// True when `phrase` has 12 or 24 words and a valid BIP-39 checksum.
pub fn validate(phrase: &str) -> bool {
    parse(&normalize(phrase)).is_ok()
}

/// Derives the 64-byte BIP-39 seed (empty passphrase) for `phrase`.
pub fn seed_from(phrase: &str) -> Result<Zeroizing<[u8; SEED_LEN]>, MnemonicError> {
    let mnemonic = parse(&normalize(phrase))?;
    Ok(seed_of(&mnemonic))
}

pub fn generate_entropy(byte_length: usize) -> Result<Zeroizing<Vec<u8>>, MnemonicError> {
    let mut bytes = Zeroizing::new(vec![0u8; byte_length]);
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|_| MnemonicError::EntropyGenerationFailed)?;
    Ok(bytes)
}

fn parse(normalized: &str) -> Result<Mnemonic, MnemonicError> {
    let words: Vec<&str> = normalized.split(' ').filter(|w| !w.is_empty()).collect();
    if words.len() != 12 && words.len() != 24 {
        return Err(MnemonicError::InvalidWordCount(words.len()));
    }

    Mnemonic::parse_in_normalized(Language::English, normalized).map_err(|e| match e {
        bip39::Error::UnknownWord(i) => {
            MnemonicError::UnknownWord(words.get(i).map(|w| w.to_string()).unwrap_or_default())
        }
        bip39::Error::InvalidChecksum => MnemonicError::ChecksumFailed,
        other => MnemonicError::Malformed(other.to_string()),
    })
}

fn seed_of(mnemonic: &Mnemonic) -> Zeroizing<[u8; SEED_LEN]> {
    let mut seed_bytes = mnemonic.to_seed_normalized("");
    let seed = Zeroizing::new(seed_bytes);
    seed_bytes.zeroize();
    seed
}

fn join_words(mnemonic: &Mnemonic) -> Zeroizing<String> {
    let mut result = Zeroizing::new(String::new());
    for (i, word) in mnemonic.word_iter().enumerate() {
        if i > 0 {
            result.push(' ');
        }
        result.push_str(word);
    }
    result
}
