use crate::error::{BlockchainError, Result};
use crate::utils::{deserialize, serialize};
use crate::wallet::Wallet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

pub const WALLET_FILE: &str = "wallet.dat";

/// The node's local wallet file. Holds exactly one identity.
pub struct WalletStore {
    path: PathBuf,
}

impl WalletStore {
    pub fn new(path: impl Into<PathBuf>) -> WalletStore {
        WalletStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<Wallet>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let mut buf = vec![];
        file.read_to_end(&mut buf)?;
        let wallet = deserialize::<Wallet>(&buf).map_err(|e| {
            BlockchainError::Wallet(format!("Corrupt wallet at {}: {e}", self.path.display()))
        })?;
        Ok(Some(wallet))
    }

    /// Loads the wallet, failing when none has been created yet.
    pub fn require(&self) -> Result<Wallet> {
        self.load()?.ok_or_else(|| {
            BlockchainError::Wallet(format!(
                "No wallet found at {}. Run 'createwallet' first.",
                self.path.display()
            ))
        })
    }

    /// Returns the stored wallet, creating and saving one if none exists.
    pub fn load_or_create(&self) -> Result<Wallet> {
        if let Some(wallet) = self.load()? {
            return Ok(wallet);
        }
        let wallet = Wallet::new()?;
        self.save(&wallet)?;
        log::info!("Created wallet {}", wallet.get_address());
        Ok(wallet)
    }

    pub fn save(&self, wallet: &Wallet) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        let mut writer = BufWriter::new(file);
        let bytes = serialize(wallet)?;
        writer.write_all(bytes.as_slice())?;
        writer.flush()?;
        Ok(())
    }
}
