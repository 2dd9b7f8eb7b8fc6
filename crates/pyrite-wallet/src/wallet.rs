//! Keypair storage keyed by address.
//!
//! The wallet file is a bincode map from address string to the 32-byte
//! secret scalar; public keys are re-derived on load. One wallet file
//! exists per node at `<data-dir>/wallet_<node>.dat`.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use pyrite_core::address;
use pyrite_core::crypto::KeyPair;

use crate::error::WalletError;

/// A collection of keypairs, persisted as one file per node.
pub struct Wallet {
    accounts: BTreeMap<String, KeyPair>,
    path: PathBuf,
}

impl Wallet {
    /// Load the wallet at `path`, or start an empty one if the file does
    /// not exist yet.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let path = path.as_ref().to_path_buf();
        let mut wallet = Self {
            accounts: BTreeMap::new(),
            path,
        };
        if wallet.path.exists() {
            wallet.load()?;
        }
        Ok(wallet)
    }

    /// Generate a fresh keypair, register it, and return its address.
    ///
    /// The wallet is not saved automatically; call [`Wallet::save`].
    pub fn create_account(&mut self) -> String {
        let keypair = KeyPair::generate();
        let addr = address::make_address(&keypair.public_key().to_bytes());
        self.accounts.insert(addr.clone(), keypair);
        addr
    }

    /// All known addresses, sorted.
    pub fn addresses(&self) -> Vec<String> {
        self.accounts.keys().cloned().collect()
    }

    /// Look up the keypair for an address.
    pub fn account(&self, addr: &str) -> Result<&KeyPair, WalletError> {
        self.accounts
            .get(addr)
            .ok_or_else(|| WalletError::UnknownAddress(addr.to_string()))
    }

    /// Number of stored keypairs.
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    /// True when the wallet holds no keypairs.
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// Persist the wallet, creating parent directories as needed.
    ///
    /// The file is written with owner-only permissions and synced to disk
    /// before success is reported.
    pub fn save(&self) -> Result<(), WalletError> {
        let secrets: BTreeMap<&String, [u8; 32]> = self
            .accounts
            .iter()
            .map(|(addr, keypair)| (addr, keypair.secret_bytes()))
            .collect();
        let bytes = bincode::encode_to_vec(&secrets, bincode::config::standard())
            .map_err(|e| WalletError::Corrupt(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&self.path)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(&bytes)?;
        file.sync_all()?;
        debug!(path = %self.path.display(), accounts = self.accounts.len(), "saved wallet");
        Ok(())
    }

    fn load(&mut self) -> Result<(), WalletError> {
        let bytes = std::fs::read(&self.path)?;
        let (secrets, _): (BTreeMap<String, [u8; 32]>, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard())
                .map_err(|e| WalletError::Corrupt(e.to_string()))?;

        for (addr, secret) in secrets {
            let keypair = KeyPair::from_secret_bytes(secret)
                .map_err(|e| WalletError::Corrupt(e.to_string()))?;
            self.accounts.insert(addr, keypair);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_account_registers_valid_address() {
        let dir = tempfile::tempdir().unwrap();
        let mut wallet = Wallet::load_or_create(dir.path().join("wallet_3000.dat")).unwrap();

        let addr = wallet.create_account();
        assert!(address::pub_key_hash_of(&addr).is_ok());
        assert_eq!(wallet.addresses(), vec![addr.clone()]);
        assert!(wallet.account(&addr).is_ok());
    }

    #[test]
    fn save_and_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet_3000.dat");

        let mut wallet = Wallet::load_or_create(&path).unwrap();
        let a1 = wallet.create_account();
        let a2 = wallet.create_account();
        wallet.save().unwrap();

        let reloaded = Wallet::load_or_create(&path).unwrap();
        assert_eq!(reloaded.len(), 2);
        let mut expected = vec![a1.clone(), a2.clone()];
        expected.sort();
        assert_eq!(reloaded.addresses(), expected);

        // The reloaded key re-derives the same address.
        let keypair = reloaded.account(&a1).unwrap();
        assert_eq!(
            address::make_address(&keypair.public_key().to_bytes()),
            a1
        );
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::load_or_create(dir.path().join("absent.dat")).unwrap();
        assert!(wallet.is_empty());
    }

    #[test]
    fn unknown_address_errors() {
        let dir = tempfile::tempdir().unwrap();
        let wallet = Wallet::load_or_create(dir.path().join("wallet.dat")).unwrap();
        assert!(matches!(
            wallet.account("1BoatSLRHtKNngkdXEeobR76b53LETtpyT"),
            Err(WalletError::UnknownAddress(_))
        ));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet.dat");
        std::fs::write(&path, b"\xFF\xFF\xFF not a wallet").unwrap();
        assert!(matches!(
            Wallet::load_or_create(&path),
            Err(WalletError::Corrupt(_))
        ));
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/wallet.dat");
        let mut wallet = Wallet::load_or_create(&path).unwrap();
        wallet.create_account();
        wallet.save().unwrap();
        assert!(path.exists());
    }
}
