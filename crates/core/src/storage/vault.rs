use std::path::Path;

use crate::errors::CoreError;
use crate::models::credential::Credential;

use super::encryption::{self, KdfParams};
use super::format;

/// Password-protected store for provider credentials.
///
/// Flow: `Vec<Credential>` → bincode → AES-256-GCM(Argon2id(password)) → PFYV bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct CredentialVault {
    kdf: KdfParams,
}

impl CredentialVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use custom KDF costs (tests use small ones).
    pub fn with_kdf(kdf: KdfParams) -> Self {
        Self { kdf }
    }

    pub fn seal(&self, credentials: &[Credential], password: &str) -> Result<Vec<u8>, CoreError> {
        if password.is_empty() {
            return Err(CoreError::Validation("vault password must not be empty".into()));
        }
        let plaintext = bincode::serialize(credentials)?;
        let sealed = encryption::seal(&plaintext, password, self.kdf)?;
        Ok(format::encode(&sealed))
    }

    pub fn open(&self, data: &[u8], password: &str) -> Result<Vec<Credential>, CoreError> {
        let sealed = format::decode(data)?;
        let plaintext = encryption::open(&sealed, password)?;
        bincode::deserialize(&plaintext)
            .map_err(|e| CoreError::Deserialization(format!("vault payload: {e}")))
    }

    /// Write atomically: seal into a sibling temp file, then rename over the target.
    pub fn save(
        &self,
        path: &Path,
        credentials: &[Credential],
        password: &str,
    ) -> Result<(), CoreError> {
        let bytes = self.seal(credentials, password)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// A missing file is an empty vault.
    pub fn load(&self, path: &Path, password: &str) -> Result<Vec<Credential>, CoreError> {
        match std::fs::read(path) {
            Ok(bytes) => self.open(&bytes, password),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }
}
