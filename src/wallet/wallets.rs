use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::collections::HashMap;
use std::env::current_dir;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::PathBuf;

pub const WALLET_FILE: &str = "wallets.dat";

/// Local wallet collection, keyed by address, persisted to `wallets.dat`.
pub struct Wallets {
    wallets: HashMap<String, Wallet>,
    path: PathBuf,
}

impl Wallets {
    /// Load `wallets.dat` from the working directory if present;
    /// otherwise start empty.
    pub fn new() -> Result<Wallets> {
        Self::from_file(current_dir()?.join(WALLET_FILE))
    }

    /// Same, against an explicit wallet file
    pub fn from_file(path: PathBuf) -> Result<Wallets> {
        let mut wallets = Wallets {
            wallets: HashMap::new(),
            path,
        };
        wallets.load_from_file()?;
        Ok(wallets)
    }

    pub fn create_wallet(&mut self) -> Result<String> {
        let wallet = Wallet::new()?;
        let address = wallet.get_address();
        self.wallets.insert(address.clone(), wallet);
        self.save_to_file()?;
        Ok(address)
    }

    pub fn get_addresses(&self) -> Vec<String> {
        self.wallets.keys().cloned().collect()
    }

    pub fn get_wallet(&self, address: &str) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    fn load_from_file(&mut self) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }

        let mut file = File::open(&self.path)?;
        let metadata = file.metadata()?;
        let mut buf = vec![0; metadata.len() as usize];
        file.read_exact(&mut buf)?;
        self.wallets = deserialize(&buf[..])
            .map_err(|e| BlockchainError::Corrupt(format!("Wallet file unreadable: {e}")))?;
        Ok(())
    }

    fn save_to_file(&self) -> Result<()> {
        let mut options = OpenOptions::new();
        options.create(true).truncate(true).write(true);
        // Keys on disk are secrets: owner read/write only.
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let wallets_bytes = serialize(&self.wallets)?;
        writer.write_all(wallets_bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_persist_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);

        let address = {
            let mut wallets = Wallets::from_file(path.clone()).unwrap();
            wallets.create_wallet().unwrap()
        };

        let reloaded = Wallets::from_file(path).unwrap();
        assert_eq!(reloaded.get_addresses(), vec![address.clone()]);
        assert!(reloaded.get_wallet(&address).is_some());
        assert!(reloaded.get_wallet("unknown-address").is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_wallet_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let path = dir.path().join(WALLET_FILE);
        let mut wallets = Wallets::from_file(path.clone()).unwrap();
        wallets.create_wallet().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
