use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signer},
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::ports::{SignerError, SignerProvider, TransactionSigner};

/// Signing capability backed by an ed25519 keypair held in memory
pub struct KeypairSigner {
    keypair: Keypair,
}

impl KeypairSigner {
    /// Load keypair from a file path (JSON array format)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SignerError> {
        let contents = fs::read_to_string(path.as_ref())?;

        // Parse JSON array of bytes
        let bytes: Vec<u8> = serde_json::from_str(&contents)
            .map_err(|e| SignerError::Creation(format!("Invalid JSON format: {}", e)))?;

        Self::from_bytes(&bytes)
    }

    /// Load keypair from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
        let keypair = Keypair::try_from(bytes).map_err(|e| SignerError::Creation(e.to_string()))?;
        Ok(Self { keypair })
    }

    /// Load keypair from a base58 secret key, as exported by most wallets
    pub fn from_base58(secret: &str) -> Result<Self, SignerError> {
        let bytes = bs58::decode(secret.trim())
            .into_vec()
            .map_err(|e| SignerError::Creation(format!("Invalid base58 key: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn new_random() -> Self {
        Self {
            keypair: Keypair::new(),
        }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    /// Save keypair to file (JSON array format)
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SignerError> {
        let bytes = self.keypair.to_bytes().to_vec();
        let json = serde_json::to_string(&bytes)
            .map_err(|e| SignerError::Creation(format!("Failed to serialize: {}", e)))?;

        fs::write(path.as_ref(), json)?;
        Ok(())
    }
}

impl TransactionSigner for KeypairSigner {
    fn address(&self) -> String {
        self.keypair.pubkey().to_string()
    }

    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        Ok(self.keypair.sign_message(message).as_ref().to_vec())
    }
}

/// Main funding keypair plus freshly generated pool keypairs.
///
/// With a keystore directory every generated keypair is written to
/// `<dir>/<address>.json` before it is handed out, so a crash between
/// funding and recall never strands funds.
pub struct KeypairVault {
    main: Arc<KeypairSigner>,
    keystore: Option<PathBuf>,
}

impl KeypairVault {
    pub fn new(main: KeypairSigner, keystore: Option<PathBuf>) -> Result<Self, SignerError> {
        if let Some(dir) = &keystore {
            fs::create_dir_all(dir)?;
        }
        Ok(Self {
            main: Arc::new(main),
            keystore,
        })
    }

    /// Random main key, nothing persisted (paper trading)
    pub fn ephemeral() -> Self {
        Self {
            main: Arc::new(KeypairSigner::new_random()),
            keystore: None,
        }
    }

    pub fn main_address(&self) -> String {
        self.main.address()
    }
}

impl SignerProvider for KeypairVault {
    fn main_signer(&self) -> Arc<dyn TransactionSigner> {
        self.main.clone()
    }

    fn create_signer(&self) -> Result<Arc<dyn TransactionSigner>, SignerError> {
        let signer = KeypairSigner::new_random();
        if let Some(dir) = &self.keystore {
            let path = dir.join(format!("{}.json", signer.address()));
            signer.save_to_file(&path)?;
            tracing::debug!("Stored pool keypair at {}", path.display());
        }
        Ok(Arc::new(signer))
    }
}
