use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{info, warn};
use tokio::sync::RwLock;

use crate::errors::CoreError;
use crate::models::credential::Credential;
use crate::storage::vault::CredentialVault;

/// Source of the broker credential used for authenticated calls.
///
/// `refresh` installs a new access token after the host has completed a
/// login flow; `invalidate` drops the token after the upstream rejected it.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn current(&self) -> Option<Credential>;

    async fn refresh(
        &self,
        access_token: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, CoreError>;

    async fn invalidate(&self);
}

struct Persistence {
    vault: CredentialVault,
    path: PathBuf,
    password: String,
}

/// In-memory credential holder, optionally backed by an encrypted vault file.
///
/// The only shared mutable state in the crate. Refresh and invalidate hold
/// the write lock across the whole read-modify-write (and the vault write),
/// so readers see either the old or the new credential, never a mix.
///
/// Sealing runs Argon2 and a file write, so it happens on the blocking pool;
/// the async lock stays held across that await.
pub struct CredentialStore {
    credential: RwLock<Option<Credential>>,
    persistence: Option<Persistence>,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("persisted", &self.persistence.is_some())
            .finish()
    }
}

impl CredentialStore {
    pub fn new(credential: Option<Credential>) -> Self {
        Self {
            credential: RwLock::new(credential),
            persistence: None,
        }
    }

    /// Load the first credential for `provider` from a vault file, or start
    /// empty if the file does not exist yet. Later updates are written back.
    pub fn with_vault(
        vault: CredentialVault,
        path: impl Into<PathBuf>,
        password: impl Into<String>,
        provider: &str,
    ) -> Result<Self, CoreError> {
        let path = path.into();
        let password = password.into();
        let credential = vault
            .load(&path, &password)?
            .into_iter()
            .find(|c| c.provider == provider);
        Ok(Self {
            credential: RwLock::new(credential),
            persistence: Some(Persistence {
                vault,
                path,
                password,
            }),
        })
    }

    /// Replace the whole credential (e.g. after reading a new API key).
    pub async fn set(&self, credential: Credential) -> Result<(), CoreError> {
        let mut guard = self.credential.write().await;
        self.persist(Some(&credential)).await?;
        *guard = Some(credential);
        Ok(())
    }

    async fn persist(&self, credential: Option<&Credential>) -> Result<(), CoreError> {
        let Some(p) = &self.persistence else {
            return Ok(());
        };
        let all: Vec<Credential> = credential.into_iter().cloned().collect();
        let (vault, path, password) = (p.vault, p.path.clone(), p.password.clone());
        tokio::task::spawn_blocking(move || vault.save(&path, &all, &password))
            .await
            .map_err(|e| CoreError::FileIO(format!("vault write did not complete: {e}")))?
    }
}

#[async_trait]
impl CredentialProvider for CredentialStore {
    async fn current(&self) -> Option<Credential> {
        self.credential.read().await.clone()
    }

    async fn refresh(
        &self,
        access_token: String,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Credential, CoreError> {
        if access_token.trim().is_empty() {
            return Err(CoreError::Validation("access token must not be empty".into()));
        }
        let mut guard = self.credential.write().await;
        let base = guard.clone().ok_or_else(|| CoreError::MissingCredential {
            provider: "kite".into(),
        })?;
        let updated = base.with_access_token(access_token, expires_at);
        self.persist(Some(&updated)).await?;
        *guard = Some(updated.clone());
        info!("credential refreshed for {}", updated.provider);
        Ok(updated)
    }

    async fn invalidate(&self) {
        let mut guard = self.credential.write().await;
        if let Some(cred) = guard.as_mut() {
            cred.access_token = None;
            cred.expires_at = None;
            info!("credential invalidated for {}", cred.provider);
            let cleared = cred.clone();
            if let Err(e) = self.persist(Some(&cleared)).await {
                warn!("failed to persist invalidated credential: {e}");
            }
        }
    }
}
