use crate::cipher::{CipherError, ContentCipher, DEK_LEN};
use crate::repo::{OrgKeyRepository, RepoError};
use chacha20poly1305::aead::{KeyInit, OsRng};
use chacha20poly1305::ChaCha20Poly1305;
use quarry_core::error::{ErrorCode, QuarryError};
use quarry_core::model::OrgKeyRecord;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Debug, Error)]
pub enum KeyVaultError {
    #[error("no data key exists for org {0}")]
    KeyNotFound(String),
    #[error("key storage error: {0}")]
    Storage(#[from] RepoError),
    #[error("key unwrap failed for org {0}")]
    UnwrapFailed(String),
    #[error(transparent)]
    Crypto(#[from] CipherError),
}

impl QuarryError for KeyVaultError {
    fn error_code(&self) -> ErrorCode {
        match self {
            KeyVaultError::KeyNotFound(_) => ErrorCode::NotFound,
            KeyVaultError::Storage(e) => e.error_code(),
            KeyVaultError::UnwrapFailed(_) | KeyVaultError::Crypto(_) => ErrorCode::Internal,
        }
    }
}

/// Per-organization data-encryption keys, wrapped under the process master
/// key with the org id as associated data.
///
/// Unwrapped DEKs are cached for the process lifetime (bounded by tenant
/// count); the cache is only dropped through [`KeyVault::invalidate`]. The
/// AEAD work happens outside both lock scopes. DEK bytes never appear in
/// logs or leave this crate except through the cipher operations.
pub struct KeyVault {
    master_key: [u8; DEK_LEN],
    repo: Arc<dyn OrgKeyRepository>,
    cache: RwLock<HashMap<String, [u8; DEK_LEN]>>,
}

impl KeyVault {
    pub fn new(master_key: [u8; DEK_LEN], repo: Arc<dyn OrgKeyRepository>) -> Self {
        Self {
            master_key,
            repo,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Return the org's DEK, generating and persisting a wrapped one on
    /// first use. Concurrent first encryptions converge on whichever row won
    /// the insert.
    pub async fn get_or_create(&self, org_id: &str) -> Result<[u8; DEK_LEN], KeyVaultError> {
        if let Some(dek) = self.cached(org_id).await {
            return Ok(dek);
        }

        if let Some(record) = self.repo.get_org_key(org_id).await? {
            let dek = self.unwrap_record(&record)?;
            self.remember(org_id, dek).await;
            return Ok(dek);
        }

        let dek: [u8; DEK_LEN] = ChaCha20Poly1305::generate_key(&mut OsRng).into();
        let (wrapped_dek, nonce) = ContentCipher::seal(&dek, &self.master_key, org_id)?;
        let record = OrgKeyRecord {
            org_id: org_id.to_string(),
            wrapped_dek,
            nonce,
            version: 1,
            created_at: unix_now(),
        };

        let stored = self.repo.put_org_key(record).await?;
        // A lost race hands back the winner's row; use its key, not ours.
        let dek = self.unwrap_record(&stored)?;
        self.remember(org_id, dek).await;
        info!(org_id, version = stored.version, "provisioned data key");
        Ok(dek)
    }

    /// Return the DEK for an org that must already have one.
    pub async fn get(&self, org_id: &str) -> Result<[u8; DEK_LEN], KeyVaultError> {
        if let Some(dek) = self.cached(org_id).await {
            return Ok(dek);
        }

        let record = self
            .repo
            .get_org_key(org_id)
            .await?
            .ok_or_else(|| KeyVaultError::KeyNotFound(org_id.to_string()))?;

        let dek = self.unwrap_record(&record)?;
        self.remember(org_id, dek).await;
        Ok(dek)
    }

    /// Admin hook: drop the cached DEK so the next request re-reads the
    /// wrapped row (e.g. after an out-of-band rotation).
    pub async fn invalidate(&self, org_id: &str) {
        self.cache.write().await.remove(org_id);
    }

    async fn cached(&self, org_id: &str) -> Option<[u8; DEK_LEN]> {
        self.cache.read().await.get(org_id).copied()
    }

    async fn remember(&self, org_id: &str, dek: [u8; DEK_LEN]) {
        self.cache.write().await.insert(org_id.to_string(), dek);
    }

    fn unwrap_record(&self, record: &OrgKeyRecord) -> Result<[u8; DEK_LEN], KeyVaultError> {
        let bytes = ContentCipher::open(
            &record.wrapped_dek,
            &record.nonce,
            &record.org_id,
            &self.master_key,
        )
        .map_err(|_| KeyVaultError::UnwrapFailed(record.org_id.clone()))?;

        bytes
            .try_into()
            .map_err(|_| KeyVaultError::UnwrapFailed(record.org_id.clone()))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
