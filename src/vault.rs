use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cipher::VaultCipher;
use crate::config::VaultConfig;
use crate::error::{VaultError, VaultResult};
use crate::keys::{self, ChainId, Wallet};
use crate::mnemonic::RecoveryPhrase;
use crate::storage::KeyValueStore;

/// Everything the vault encrypts: the derived wallets and the phrase they came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultPayload {
    pub wallets: Vec<Wallet>,
    pub recovery: RecoveryPhrase,
}

impl VaultPayload {
    fn to_bytes(&self) -> VaultResult<Zeroizing<Vec<u8>>> {
        serde_json::to_vec(self)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::Encoding(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> VaultResult<Self> {
        // A blob that authenticates but does not parse is still a corrupted vault
        serde_json::from_slice(bytes).map_err(|_| VaultError::AuthenticationFailure)
    }
}

/// The only thing the vault ever writes to storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedVaultRecord {
    #[serde(rename = "hint", default)]
    pub password_hint: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "encryptedVault")]
    pub ciphertext_blob: String,
}

/// Older writers sometimes stored the bare blob string instead of the record.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredRecord {
    Full(EncryptedVaultRecord),
    Bare(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey {
    AccountId,
    PrivateKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletListing {
    pub all: Vec<Wallet>,
    pub solana: Vec<Wallet>,
    pub ethereum: Vec<Wallet>,
}

/// A freshly generated phrase and its preview wallets, not yet persisted.
///
/// Hand it back to [`WalletVault::finalize`] once the user has confirmed the phrase.
pub struct PendingCreation {
    recovery: RecoveryPhrase,
    preview: Vec<Wallet>,
}

impl PendingCreation {
    pub fn phrase(&self) -> &str {
        self.recovery.phrase()
    }

    pub fn recovery(&self) -> &RecoveryPhrase {
        &self.recovery
    }

    pub fn preview(&self) -> &[Wallet] {
        &self.preview
    }
}

impl fmt::Debug for PendingCreation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCreation")
            .field("recovery", &self.recovery)
            .field("preview", &self.preview)
            .finish()
    }
}

/// Read-only view of the unlocked flag for routing code.
#[derive(Debug, Clone, Default)]
pub struct SessionSignal(Arc<AtomicBool>);

impl SessionSignal {
    pub fn is_unlocked(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn set(&self, unlocked: bool) {
        self.0.store(unlocked, Ordering::SeqCst);
    }
}

/// Password-protected store of HD wallets derived from one recovery phrase.
///
/// Every operation holds the vault mutex from the first read to the final
/// write, so concurrent callers cannot interleave a read-modify-persist cycle.
pub struct WalletVault<S: KeyValueStore> {
    store: S,
    config: VaultConfig,
    cipher: VaultCipher,
    // None while locked
    unlocked: Mutex<Option<VaultPayload>>,
    session: SessionSignal,
}

impl<S: KeyValueStore> WalletVault<S> {
    pub fn new(store: S) -> Self {
        WalletVault {
            store,
            config: VaultConfig::default(),
            cipher: VaultCipher::new(),
            unlocked: Mutex::new(None),
            session: SessionSignal::default(),
        }
    }

    pub fn with_config(store: S, config: VaultConfig) -> VaultResult<Self> {
        config.validate()?;
        Ok(WalletVault {
            config,
            ..Self::new(store)
        })
    }

    #[cfg(test)]
    pub(crate) fn with_cipher(store: S, config: VaultConfig, cipher: VaultCipher) -> Self {
        WalletVault {
            config,
            cipher,
            ..Self::new(store)
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session(&self) -> SessionSignal {
        self.session.clone()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.lock().is_some()
    }

    /// True when a record is stored, whether or not it is readable.
    pub fn has_vault(&self) -> VaultResult<bool> {
        let _guard = self.unlocked.lock();
        Ok(self.store.contains(&self.config.storage_key)?)
    }

    pub fn password_hint(&self) -> VaultResult<Option<String>> {
        let _guard = self.unlocked.lock();
        Ok(self.require_record()?.password_hint)
    }

    /// Generates a phrase and previews its first Ethereum and Solana wallets.
    /// Nothing is stored until [`finalize`](Self::finalize).
    pub fn begin_creation(&self) -> VaultResult<PendingCreation> {
        let recovery = RecoveryPhrase::generate()?;
        let preview = ChainId::ALL
            .iter()
            .map(|&chain| keys::derive(recovery.master_seed(), chain, 0))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(PendingCreation { recovery, preview })
    }

    /// Encrypts and stores a confirmed [`PendingCreation`].
    ///
    /// The vault stays locked afterwards; the caller unlocks with the new password.
    pub fn finalize(
        &self,
        pending: PendingCreation,
        password: &str,
        hint: Option<&str>,
    ) -> VaultResult<()> {
        let mut state = self.unlocked.lock();
        if self.load_record()?.is_some() {
            return Err(VaultError::VaultAlreadyExists);
        }

        let payload = VaultPayload {
            wallets: pending.preview,
            recovery: pending.recovery,
        };
        self.persist(&payload, password, hint.map(str::to_string), Utc::now())?;

        *state = None;
        self.session.set(false);
        info!(wallets = payload.wallets.len(), "vault created");
        Ok(())
    }

    /// One-shot create: generate, persist, and hand back the phrase for backup.
    pub fn create_new(&self, password: &str, hint: Option<&str>) -> VaultResult<RecoveryPhrase> {
        let pending = self.begin_creation()?;
        let recovery = pending.recovery.clone();
        self.finalize(pending, password, hint)?;
        Ok(recovery)
    }

    pub fn import_from_mnemonic(
        &self,
        mnemonic: &str,
        password: &str,
        hint: Option<&str>,
    ) -> VaultResult<()> {
        let mut state = self.unlocked.lock();
        let recovery = RecoveryPhrase::from_phrase(mnemonic)?;
        if self.load_record()?.is_some() {
            return Err(VaultError::VaultAlreadyExists);
        }

        let payload = self.install(recovery, password, hint)?;
        info!(wallets = payload.wallets.len(), "vault imported from recovery phrase");
        *state = Some(payload);
        self.session.set(true);
        Ok(())
    }

    /// Replaces whatever vault exists with one rebuilt from `mnemonic`.
    pub fn reset_with_recovery_phrase(
        &self,
        mnemonic: &str,
        new_password: &str,
        hint: Option<&str>,
    ) -> VaultResult<()> {
        let mut state = self.unlocked.lock();
        let recovery = RecoveryPhrase::from_phrase(mnemonic)?;

        *state = None;
        self.session.set(false);

        let payload = self.install(recovery, new_password, hint)?;
        info!(wallets = payload.wallets.len(), "vault reset from recovery phrase");
        *state = Some(payload);
        self.session.set(true);
        Ok(())
    }

    pub fn unlock(&self, password: &str) -> VaultResult<()> {
        let mut state = self.unlocked.lock();
        let record = self.require_record()?;
        let payload = self.open(&record, password)?;

        info!(wallets = payload.wallets.len(), "vault unlocked");
        *state = Some(payload);
        self.session.set(true);
        Ok(())
    }

    pub fn lock(&self) {
        let mut state = self.unlocked.lock();
        // Dropping the payload zeroizes the phrase, seed and private keys
        *state = None;
        self.session.set(false);
        info!("vault locked");
    }

    pub fn add_wallet(&self, password: &str, chain: ChainId) -> VaultResult<Wallet> {
        let mut state = self.unlocked.lock();
        let current = state.as_ref().ok_or(VaultError::Locked)?;
        let record = self.require_record()?;
        self.open(&record, password)?;

        let index = next_index(&current.wallets, chain);
        let wallet = keys::derive(current.recovery.master_seed(), chain, index)?;

        let mut updated = current.clone();
        updated.wallets.push(wallet.clone());
        self.persist(&updated, password, record.password_hint, record.created_at)?;

        info!(chain = %chain, index, account_id = %wallet.account_id, "wallet added");
        *state = Some(updated);
        Ok(wallet)
    }

    pub fn get_wallet(&self, identifier: &str, key: LookupKey) -> VaultResult<Option<Wallet>> {
        let state = self.unlocked.lock();
        let payload = state.as_ref().ok_or(VaultError::Locked)?;

        let found = match key {
            LookupKey::AccountId => match Uuid::parse_str(identifier.trim()) {
                Ok(id) => payload.wallets.iter().find(|w| w.account_id == id),
                Err(_) => None,
            },
            LookupKey::PrivateKey => payload
                .wallets
                .iter()
                .find(|w| w.private_key.as_str() == identifier),
        };
        Ok(found.cloned())
    }

    /// Removes one wallet. Returns `None` when no wallet has that id.
    pub fn delete_wallet(&self, account_id: &Uuid, password: &str) -> VaultResult<Option<Wallet>> {
        let mut state = self.unlocked.lock();
        let current = state.as_ref().ok_or(VaultError::Locked)?;
        let record = self.require_record()?;
        self.open(&record, password)?;

        let position = match current.wallets.iter().position(|w| &w.account_id == account_id) {
            Some(position) => position,
            None => return Ok(None),
        };

        let mut updated = current.clone();
        let removed = updated.wallets.remove(position);
        self.persist(&updated, password, record.password_hint, record.created_at)?;

        info!(chain = %removed.chain_id, index = removed.index, account_id = %removed.account_id, "wallet deleted");
        *state = Some(updated);
        Ok(Some(removed))
    }

    /// Drops every derived wallet but keeps the recovery phrase.
    pub fn delete_all_wallets(&self, password: &str) -> VaultResult<usize> {
        let mut state = self.unlocked.lock();
        let current = state.as_ref().ok_or(VaultError::Locked)?;
        let record = self.require_record()?;
        self.open(&record, password)?;

        let mut updated = current.clone();
        let removed = updated.wallets.len();
        updated.wallets.clear();
        self.persist(&updated, password, record.password_hint, record.created_at)?;

        info!(removed, "all wallets deleted");
        *state = Some(updated);
        Ok(removed)
    }

    pub fn list_wallets(&self) -> VaultResult<WalletListing> {
        let state = self.unlocked.lock();
        let payload = state.as_ref().ok_or(VaultError::Locked)?;

        let on_chain = |chain: ChainId| -> Vec<Wallet> {
            payload
                .wallets
                .iter()
                .filter(|w| w.chain_id == chain)
                .cloned()
                .collect()
        };
        Ok(WalletListing {
            all: payload.wallets.clone(),
            solana: on_chain(ChainId::Solana),
            ethereum: on_chain(ChainId::Ethereum),
        })
    }

    /// Returns the mnemonic after re-checking the password.
    pub fn reveal_recovery_phrase(&self, password: &str) -> VaultResult<Zeroizing<String>> {
        let state = self.unlocked.lock();
        let payload = state.as_ref().ok_or(VaultError::Locked)?;
        let record = self.require_record()?;
        self.open(&record, password)?;

        Ok(Zeroizing::new(payload.recovery.phrase().to_string()))
    }

    /// Re-encrypts the stored payload under `new_password`. Works locked or unlocked.
    pub fn change_password(&self, old_password: &str, new_password: &str) -> VaultResult<()> {
        let _guard = self.unlocked.lock();
        let record = self.require_record()?;

        let plaintext = self
            .cipher
            .decrypt(&record.ciphertext_blob, old_password)
            .map_err(|e| {
                warn!("password change rejected");
                VaultError::from(e)
            })?;
        let blob = self.cipher.encrypt(&plaintext, new_password)?;

        self.write_record(&EncryptedVaultRecord {
            password_hint: record.password_hint,
            created_at: Utc::now(),
            ciphertext_blob: blob,
        })?;
        info!("vault password changed");
        Ok(())
    }

    /// Deletes the stored vault and every auxiliary key. Irreversible.
    pub fn wipe(&self) -> VaultResult<()> {
        let mut state = self.unlocked.lock();
        *state = None;
        self.session.set(false);

        self.store.remove(&self.config.storage_key)?;
        for key in &self.config.auxiliary_keys {
            self.store.remove(key)?;
        }
        info!("vault wiped");
        Ok(())
    }

    /// Derives the configured number of wallets per chain and persists a fresh record.
    fn install(
        &self,
        recovery: RecoveryPhrase,
        password: &str,
        hint: Option<&str>,
    ) -> VaultResult<VaultPayload> {
        let mut wallets = Vec::new();
        for chain in ChainId::ALL {
            for index in 0..self.config.wallets_per_chain {
                wallets.push(keys::derive(recovery.master_seed(), chain, index)?);
            }
        }

        let payload = VaultPayload { wallets, recovery };
        self.persist(&payload, password, hint.map(str::to_string), Utc::now())?;
        Ok(payload)
    }

    fn persist(
        &self,
        payload: &VaultPayload,
        password: &str,
        password_hint: Option<String>,
        created_at: DateTime<Utc>,
    ) -> VaultResult<()> {
        let plaintext = payload.to_bytes()?;
        let blob = self.cipher.encrypt(&plaintext, password)?;
        self.write_record(&EncryptedVaultRecord {
            password_hint,
            created_at,
            ciphertext_blob: blob,
        })
    }

    fn open(&self, record: &EncryptedVaultRecord, password: &str) -> VaultResult<VaultPayload> {
        let plaintext = self
            .cipher
            .decrypt(&record.ciphertext_blob, password)
            .map_err(|e| {
                warn!("vault password rejected");
                VaultError::from(e)
            })?;
        VaultPayload::from_bytes(&plaintext)
    }

    fn write_record(&self, record: &EncryptedVaultRecord) -> VaultResult<()> {
        let bytes = serde_json::to_vec(record).map_err(|e| VaultError::Encoding(e.to_string()))?;
        self.store.set(&self.config.storage_key, &bytes)?;
        debug!(key = %self.config.storage_key, bytes = bytes.len(), "vault record written");
        Ok(())
    }

    fn load_record(&self) -> VaultResult<Option<EncryptedVaultRecord>> {
        let bytes = match self.store.get(&self.config.storage_key)? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice::<StoredRecord>(&bytes) {
            Ok(StoredRecord::Full(record)) => Ok(Some(record)),
            Ok(StoredRecord::Bare(blob)) => Ok(Some(bare_record(blob))),
            Err(_) => match std::str::from_utf8(&bytes) {
                // unquoted base64 text
                Ok(text) if !text.trim_start().starts_with('{') => {
                    Ok(Some(bare_record(text.trim().to_string())))
                }
                _ => Err(VaultError::AuthenticationFailure),
            },
        }
    }

    fn require_record(&self) -> VaultResult<EncryptedVaultRecord> {
        self.load_record()?.ok_or(VaultError::NoVaultPresent)
    }
}

fn bare_record(ciphertext_blob: String) -> EncryptedVaultRecord {
    warn!("vault record is a bare blob; hint and creation time are unknown");
    EncryptedVaultRecord {
        password_hint: None,
        created_at: DateTime::<Utc>::from(std::time::UNIX_EPOCH),
        ciphertext_blob,
    }
}

/// The wallet count on `chain`, skipping past indices still held after deletions.
fn next_index(wallets: &[Wallet], chain: ChainId) -> u32 {
    let used: HashSet<u32> = wallets
        .iter()
        .filter(|w| w.chain_id == chain)
        .map(|w| w.index)
        .collect();

    let mut index = used.len() as u32;
    while used.contains(&index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageError};
    use std::io;

    const PASSWORD: &str = "Secr3t!pass";
    const FIXTURE: &str =
        "ready artist rack elite distance owner elephant search end culture use season";

    fn vault_on(store: Arc<MemoryStore>) -> WalletVault<Arc<MemoryStore>> {
        WalletVault::with_cipher(store, VaultConfig::default(), VaultCipher::with_iterations(1_000))
    }

    fn vault() -> WalletVault<Arc<MemoryStore>> {
        vault_on(Arc::new(MemoryStore::new()))
    }

    /// A memory store whose writes can be switched off.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl KeyValueStore for FlakyStore {
        fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Io(io::Error::new(io::ErrorKind::Other, "disk full")));
            }
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), StorageError> {
            self.inner.remove(key)
        }

        fn clear(&self) -> Result<(), StorageError> {
            self.inner.clear()
        }
    }

    fn public_keys(wallets: &[Wallet]) -> Vec<String> {
        wallets.iter().map(|w| w.public_key.clone()).collect()
    }

    #[test]
    fn test_two_phase_creation() {
        let vault = vault();
        let pending = vault.begin_creation().unwrap();
        assert_eq!(pending.phrase().split(' ').count(), 12);
        assert_eq!(pending.preview().len(), 2);
        assert_eq!(pending.preview()[0].chain_id, ChainId::Ethereum);
        assert_eq!(pending.preview()[1].chain_id, ChainId::Solana);
        assert!(!vault.has_vault().unwrap());

        let preview = public_keys(pending.preview());
        vault.finalize(pending, PASSWORD, Some("pets")).unwrap();

        assert!(vault.has_vault().unwrap());
        assert!(!vault.is_unlocked());
        assert_eq!(vault.password_hint().unwrap().as_deref(), Some("pets"));

        vault.unlock(PASSWORD).unwrap();
        assert_eq!(public_keys(&vault.list_wallets().unwrap().all), preview);
    }

    #[test]
    fn test_create_refuses_to_overwrite() {
        let vault = vault();
        vault.create_new(PASSWORD, None).unwrap();
        assert!(matches!(
            vault.create_new(PASSWORD, None),
            Err(VaultError::VaultAlreadyExists)
        ));
        assert!(matches!(
            vault.import_from_mnemonic(FIXTURE, PASSWORD, None),
            Err(VaultError::VaultAlreadyExists)
        ));
    }

    #[test]
    fn test_unlock_without_vault() {
        let vault = vault();
        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::NoVaultPresent)));
        assert!(matches!(
            vault.change_password(PASSWORD, "x"),
            Err(VaultError::NoVaultPresent)
        ));
        assert!(matches!(vault.password_hint(), Err(VaultError::NoVaultPresent)));
    }

    #[test]
    fn test_create_add_lock_unlock() {
        let vault = vault();
        vault.create_new(PASSWORD, None).unwrap();
        vault.unlock(PASSWORD).unwrap();
        vault.delete_all_wallets(PASSWORD).unwrap();

        let sol = vault.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        let eth = vault.add_wallet(PASSWORD, ChainId::Ethereum).unwrap();
        vault.lock();
        assert!(!vault.is_unlocked());
        assert!(matches!(vault.list_wallets(), Err(VaultError::Locked)));

        vault.unlock(PASSWORD).unwrap();
        let listing = vault.list_wallets().unwrap();
        assert_eq!(listing.all.len(), 2);
        assert_eq!(public_keys(&listing.all), vec![sol.public_key, eth.public_key]);

        vault.lock();
        assert!(matches!(vault.unlock("wrong"), Err(VaultError::AuthenticationFailure)));
        assert!(!vault.is_unlocked());
    }

    #[test]
    fn test_import_derives_every_chain() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, Some("hint")).unwrap();
        assert!(vault.is_unlocked());

        let listing = vault.list_wallets().unwrap();
        assert_eq!(listing.all.len(), 2);
        assert_eq!(listing.ethereum.len(), 1);
        assert_eq!(listing.solana.len(), 1);
        assert_eq!(listing.solana[0].public_key, "8ixLuTUy1idfC7w4MWEQTKN8dQ5kj2uN4Wf9rYhodbcx");
        assert_eq!(listing.ethereum[0].public_key, "0xF2f4d4c487Bdd753912419517941C1aa5e4a31Db");
    }

    #[test]
    fn test_import_respects_wallets_per_chain() {
        let config = VaultConfig {
            wallets_per_chain: 3,
            ..VaultConfig::default()
        };
        let vault = WalletVault::with_cipher(
            MemoryStore::new(),
            config,
            VaultCipher::with_iterations(1_000),
        );
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();

        let listing = vault.list_wallets().unwrap();
        assert_eq!(listing.all.len(), 6);
        let indices: Vec<u32> = listing.solana.iter().map(|w| w.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
    }

    #[test]
    fn test_import_rejects_bad_phrase() {
        let vault = vault();
        let result = vault.import_from_mnemonic("abandon abandon abandon", PASSWORD, None);
        assert!(matches!(result, Err(VaultError::InvalidMnemonic(_))));
        assert!(!vault.has_vault().unwrap());
    }

    #[test]
    fn test_import_normalizes_phrase() {
        let vault = vault();
        vault
            .import_from_mnemonic(&format!("  {}  ", FIXTURE.to_uppercase()), PASSWORD, None)
            .unwrap();
        assert_eq!(&*vault.reveal_recovery_phrase(PASSWORD).unwrap(), FIXTURE);
    }

    #[test]
    fn test_add_wallet_indices_and_persistence() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_on(Arc::clone(&store));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();

        let second = vault.add_wallet(PASSWORD, ChainId::Ethereum).unwrap();
        assert_eq!(second.index, 1);
        assert_eq!(second.derivation_path, "m/44'/60'/0'/0/1");
        assert_eq!(second.public_key, "0x410824079FEdea3F6E65Da46297205A45C461DB6");

        let third = vault.add_wallet(PASSWORD, ChainId::Ethereum).unwrap();
        assert_eq!(third.index, 2);

        // The persisted blob must include the wallets just added
        let reopened = vault_on(store);
        reopened.unlock(PASSWORD).unwrap();
        let listing = reopened.list_wallets().unwrap();
        assert_eq!(listing.ethereum.len(), 3);
        assert_eq!(listing.all, vault.list_wallets().unwrap().all);
    }

    #[test]
    fn test_add_wallet_requires_password_and_unlock() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();

        assert!(matches!(
            vault.add_wallet("nope", ChainId::Solana),
            Err(VaultError::AuthenticationFailure)
        ));
        assert_eq!(vault.list_wallets().unwrap().all.len(), 2);

        vault.lock();
        assert!(matches!(
            vault.add_wallet(PASSWORD, ChainId::Solana),
            Err(VaultError::Locked)
        ));
    }

    #[test]
    fn test_add_after_delete_never_reuses_index() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        let one = vault.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        let first = vault.list_wallets().unwrap().solana[0].clone();

        vault.delete_wallet(&first.account_id, PASSWORD).unwrap();
        let next = vault.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        assert_ne!(next.index, one.index);
        assert_eq!(next.index, 2);
    }

    #[test]
    fn test_failed_write_leaves_memory_and_storage_in_step() {
        let store = Arc::new(FlakyStore::default());
        let vault = WalletVault::with_cipher(
            Arc::clone(&store),
            VaultConfig::default(),
            VaultCipher::with_iterations(1_000),
        );
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        let before = vault.list_wallets().unwrap();
        let target = before.solana[0].account_id;

        store.fail_writes.store(true, Ordering::SeqCst);
        assert!(matches!(
            vault.add_wallet(PASSWORD, ChainId::Solana),
            Err(VaultError::Storage(_))
        ));
        assert!(matches!(
            vault.delete_wallet(&target, PASSWORD),
            Err(VaultError::Storage(_))
        ));
        assert!(matches!(vault.delete_all_wallets(PASSWORD), Err(VaultError::Storage(_))));
        assert_eq!(vault.list_wallets().unwrap(), before);

        // Storage still holds the pre-failure payload
        store.fail_writes.store(false, Ordering::SeqCst);
        vault.lock();
        vault.unlock(PASSWORD).unwrap();
        assert_eq!(vault.list_wallets().unwrap(), before);

        let added = vault.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        assert_eq!(added.index, 1);
    }

    #[test]
    fn test_get_wallet() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        let wallet = vault.list_wallets().unwrap().solana[0].clone();

        let by_id = vault
            .get_wallet(&wallet.account_id.to_string(), LookupKey::AccountId)
            .unwrap();
        assert_eq!(by_id.as_ref(), Some(&wallet));

        let by_key = vault.get_wallet(&wallet.private_key, LookupKey::PrivateKey).unwrap();
        assert_eq!(by_key.as_ref(), Some(&wallet));

        assert_eq!(vault.get_wallet("not-a-uuid", LookupKey::AccountId).unwrap(), None);
        assert_eq!(
            vault.get_wallet(&Uuid::new_v4().to_string(), LookupKey::AccountId).unwrap(),
            None
        );

        vault.lock();
        assert!(matches!(
            vault.get_wallet(&wallet.private_key, LookupKey::PrivateKey),
            Err(VaultError::Locked)
        ));
    }

    #[test]
    fn test_delete_wallet() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_on(Arc::clone(&store));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        let target = vault.list_wallets().unwrap().ethereum[0].clone();

        assert!(matches!(
            vault.delete_wallet(&target.account_id, "wrong"),
            Err(VaultError::AuthenticationFailure)
        ));
        assert_eq!(vault.delete_wallet(&Uuid::new_v4(), PASSWORD).unwrap(), None);

        let removed = vault.delete_wallet(&target.account_id, PASSWORD).unwrap().unwrap();
        assert_eq!(removed.account_id, target.account_id);
        assert_eq!(vault.list_wallets().unwrap().all.len(), 1);

        let reopened = vault_on(store);
        reopened.unlock(PASSWORD).unwrap();
        let listing = reopened.list_wallets().unwrap();
        assert!(listing.ethereum.is_empty());
        assert_eq!(listing.solana.len(), 1);
    }

    #[test]
    fn test_delete_all_keeps_phrase() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_on(Arc::clone(&store));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();

        assert_eq!(vault.delete_all_wallets(PASSWORD).unwrap(), 2);
        assert!(vault.list_wallets().unwrap().all.is_empty());

        let reopened = vault_on(store);
        reopened.unlock(PASSWORD).unwrap();
        assert!(reopened.list_wallets().unwrap().all.is_empty());
        assert_eq!(&*reopened.reveal_recovery_phrase(PASSWORD).unwrap(), FIXTURE);

        // Re-adding walks the same deterministic path again
        let again = reopened.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        assert_eq!(again.public_key, "8ixLuTUy1idfC7w4MWEQTKN8dQ5kj2uN4Wf9rYhodbcx");
    }

    #[test]
    fn test_reveal_recovery_phrase_checks_password() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        assert!(matches!(
            vault.reveal_recovery_phrase("bad"),
            Err(VaultError::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_change_password() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, Some("old hint")).unwrap();
        vault.add_wallet(PASSWORD, ChainId::Solana).unwrap();
        let before = vault.list_wallets().unwrap().all;
        vault.lock();

        assert!(matches!(
            vault.change_password("wrong", "N3w!pass"),
            Err(VaultError::AuthenticationFailure)
        ));
        vault.change_password(PASSWORD, "N3w!pass").unwrap();

        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::AuthenticationFailure)));
        vault.unlock("N3w!pass").unwrap();
        assert_eq!(vault.list_wallets().unwrap().all, before);
        assert_eq!(vault.password_hint().unwrap().as_deref(), Some("old hint"));
    }

    #[test]
    fn test_reset_replaces_existing_vault() {
        let vault = vault();
        vault.create_new(PASSWORD, Some("first")).unwrap();

        vault.reset_with_recovery_phrase(FIXTURE, "R3set!pass", None).unwrap();
        assert!(vault.is_unlocked());
        assert_eq!(vault.password_hint().unwrap(), None);

        let listing = vault.list_wallets().unwrap();
        assert_eq!(listing.solana[0].public_key, "8ixLuTUy1idfC7w4MWEQTKN8dQ5kj2uN4Wf9rYhodbcx");

        vault.lock();
        assert!(vault.unlock(PASSWORD).is_err());
        vault.unlock("R3set!pass").unwrap();
    }

    #[test]
    fn test_reset_with_bad_phrase_keeps_old_vault() {
        let vault = vault();
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        assert!(matches!(
            vault.reset_with_recovery_phrase("zoo zoo zoo", "x", None),
            Err(VaultError::InvalidMnemonic(_))
        ));
        assert!(vault.is_unlocked());
        vault.lock();
        vault.unlock(PASSWORD).unwrap();
    }

    #[test]
    fn test_wipe() {
        let store = Arc::new(MemoryStore::new());
        store.set("wallet_reset_done", b"true").unwrap();
        store.set("theme", b"dark").unwrap();

        let vault = vault_on(Arc::clone(&store));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        vault.wipe().unwrap();

        assert!(!vault.is_unlocked());
        assert!(!vault.has_vault().unwrap());
        assert_eq!(store.get("wallet_reset_done").unwrap(), None);
        assert_eq!(store.get("theme").unwrap().as_deref(), Some(&b"dark"[..]));
        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::NoVaultPresent)));
    }

    #[test]
    fn test_session_signal_follows_state() {
        let vault = vault();
        let session = vault.session();
        assert!(!session.is_unlocked());

        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();
        assert!(session.is_unlocked());
        vault.lock();
        assert!(!session.is_unlocked());
        vault.unlock(PASSWORD).unwrap();
        assert!(session.is_unlocked());
        assert!(vault.unlock("wrong").is_err());
        // a failed unlock attempt leaves the existing session alone
        assert!(session.is_unlocked());
        vault.wipe().unwrap();
        assert!(!session.is_unlocked());
    }

    #[test]
    fn test_record_json_shape() {
        let store = Arc::new(MemoryStore::new());
        let vault = vault_on(Arc::clone(&store));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, Some("h")).unwrap();

        let raw = store.get("wallet_password_meta").unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["hint"], "h");
        assert!(value["createdAt"].is_string());
        assert!(value["encryptedVault"].is_string());

        let plain = String::from_utf8_lossy(&raw);
        assert!(!plain.contains("ready artist"));
        assert!(!plain.contains("8ixLuTUy1idfC7w4MWEQTKN8dQ5kj2uN4Wf9rYhodbcx"));
    }

    #[test]
    fn test_bare_blob_record_is_readable() {
        let store = Arc::new(MemoryStore::new());
        let cipher = VaultCipher::with_iterations(1_000);
        let payload = VaultPayload {
            wallets: Vec::new(),
            recovery: RecoveryPhrase::from_phrase(FIXTURE).unwrap(),
        };
        let blob = cipher.encrypt(&payload.to_bytes().unwrap(), PASSWORD).unwrap();
        store
            .set("wallet_password_meta", &serde_json::to_vec(&blob).unwrap())
            .unwrap();

        let vault = vault_on(store);
        vault.unlock(PASSWORD).unwrap();
        assert_eq!(vault.password_hint().unwrap(), None);
        assert!(vault.list_wallets().unwrap().all.is_empty());
    }

    #[test]
    fn test_unquoted_blob_record_is_readable() {
        let store = Arc::new(MemoryStore::new());
        let cipher = VaultCipher::with_iterations(1_000);
        let payload = VaultPayload {
            wallets: Vec::new(),
            recovery: RecoveryPhrase::from_phrase(FIXTURE).unwrap(),
        };
        let blob = cipher.encrypt(&payload.to_bytes().unwrap(), PASSWORD).unwrap();
        store.set("wallet_password_meta", blob.as_bytes()).unwrap();

        let vault = vault_on(store);
        vault.unlock(PASSWORD).unwrap();
        assert_eq!(&*vault.reveal_recovery_phrase(PASSWORD).unwrap(), FIXTURE);
    }

    #[test]
    fn test_garbage_record_reads_as_corruption() {
        let store = Arc::new(MemoryStore::new());
        store.set("wallet_password_meta", b"{not json").unwrap();
        let vault = vault_on(store);
        assert!(vault.has_vault().unwrap());
        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::AuthenticationFailure)));
    }

    #[test]
    fn test_has_vault_does_not_parse_record() {
        let store = Arc::new(MemoryStore::new());
        store.set("wallet_password_meta", br#"{"foo":1}"#).unwrap();
        let vault = vault_on(store);

        assert!(vault.has_vault().unwrap());
        assert!(matches!(vault.unlock(PASSWORD), Err(VaultError::AuthenticationFailure)));
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let vault = Arc::new(vault_on(Arc::clone(&store)));
        vault.import_from_mnemonic(FIXTURE, PASSWORD, None).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let vault = Arc::clone(&vault);
                std::thread::spawn(move || {
                    let chain = if i % 2 == 0 { ChainId::Solana } else { ChainId::Ethereum };
                    vault.add_wallet(PASSWORD, chain).unwrap()
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let reopened = vault_on(store);
        reopened.unlock(PASSWORD).unwrap();
        let listing = reopened.list_wallets().unwrap();
        assert_eq!(listing.all.len(), 6);
        let mut sol: Vec<u32> = listing.solana.iter().map(|w| w.index).collect();
        sol.sort_unstable();
        assert_eq!(sol, vec![0, 1, 2]);
    }

    #[test]
    fn test_next_index() {
        let seed = crate::mnemonic::seed_from(FIXTURE).unwrap();
        let wallets: Vec<Wallet> = [0, 2]
            .iter()
            .map(|&i| keys::derive(&seed[..], ChainId::Solana, i).unwrap())
            .collect();
        assert_eq!(next_index(&wallets, ChainId::Solana), 3);
        assert_eq!(next_index(&wallets, ChainId::Ethereum), 0);
        assert_eq!(next_index(&wallets[..1], ChainId::Solana), 1);
    }
}
