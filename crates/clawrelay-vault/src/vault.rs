//! Deployment-scoped secret operations over a [`SecretStore`]

use crate::crypto::SecretCipher;
use crate::host::host_matches;
use crate::placeholder::{is_name_byte, placeholder_for};
use crate::VaultError;
use chrono::Utc;
use clawrelay_store::{SecretRecord, SecretStore};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What callers may know about a secret: never its value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretSummary {
    pub name: String,
    pub allowed_hosts: Vec<String>,
    pub placeholder: String,
}

impl SecretSummary {
    fn from_record(record: &SecretRecord) -> Self {
        Self {
            name: record.name.clone(),
            allowed_hosts: record.allowed_hosts.clone(),
            placeholder: placeholder_for(&record.name),
        }
    }
}

pub struct SecretVault {
    store: Arc<dyn SecretStore>,
    cipher: SecretCipher,
}

/// Uppercase a secret name and check it against `[A-Z0-9_]+`
pub fn normalize_name(name: &str) -> Result<String, VaultError> {
    let upper = name.trim().to_ascii_uppercase();
    if upper.is_empty() || !upper.bytes().all(is_name_byte) {
        return Err(VaultError::InvalidName(name.to_string()));
    }
    Ok(upper)
}

fn normalize_hosts(hosts: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    hosts
        .iter()
        .map(|host| host.trim().to_ascii_lowercase())
        .filter(|host| !host.is_empty())
        .filter(|host| seen.insert(host.clone()))
        .collect()
}

impl SecretVault {
    pub fn new(store: Arc<dyn SecretStore>, cipher: SecretCipher) -> Self {
        Self { store, cipher }
    }

    /// Encrypt and upsert a secret, returning its summary
    pub async fn store(
        &self,
        deployment_id: &str,
        name: &str,
        plaintext: &str,
        allowed_hosts: &[String],
    ) -> Result<SecretSummary, VaultError> {
        let name = normalize_name(name)?;
        let now = Utc::now();
        let record = SecretRecord {
            deployment_id: deployment_id.to_string(),
            name,
            encrypted_value: self.cipher.encrypt(plaintext)?,
            allowed_hosts: normalize_hosts(allowed_hosts),
            created_at: now,
            updated_at: now,
        };
        let summary = SecretSummary::from_record(&record);

        self.store.upsert(record).await?;

        info!(
            deployment_id = %deployment_id,
            secret = %summary.name,
            hosts = summary.allowed_hosts.len(),
            "Secret stored"
        );
        Ok(summary)
    }

    /// Names, scopes and placeholders of a deployment's secrets
    pub async fn list(&self, deployment_id: &str) -> Result<Vec<SecretSummary>, VaultError> {
        Ok(self
            .store
            .list(deployment_id)
            .await?
            .iter()
            .map(SecretSummary::from_record)
            .collect())
    }

    /// Decrypted value of `name`, only if `target_host` is in its scope
    ///
    /// A missing secret and a host mismatch both yield `Ok(None)`.
    pub async fn resolve(
        &self,
        deployment_id: &str,
        name: &str,
        target_host: &str,
    ) -> Result<Option<String>, VaultError> {
        let Ok(name) = normalize_name(name) else {
            return Ok(None);
        };

        let Some(record) = self.store.get(deployment_id, &name).await? else {
            debug!(deployment_id = %deployment_id, secret = %name, "Secret not found");
            return Ok(None);
        };

        if !host_matches(target_host, record.allowed_hosts.as_slice()) {
            debug!(
                deployment_id = %deployment_id,
                secret = %name,
                host = %target_host,
                "Secret not scoped to host"
            );
            return Ok(None);
        }

        match self.cipher.decrypt(&record.encrypted_value) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(deployment_id = %deployment_id, secret = %name, "Failed to decrypt secret: {}", e);
                Err(e)
            }
        }
    }

    /// Union of allowed-host patterns across a deployment's secrets
    pub async fn allowed_hosts(&self, deployment_id: &str) -> Result<Vec<String>, VaultError> {
        let hosts: BTreeSet<String> = self
            .store
            .list(deployment_id)
            .await?
            .into_iter()
            .flat_map(|record| record.allowed_hosts)
            .collect();
        Ok(hosts.into_iter().collect())
    }

    pub async fn delete(&self, deployment_id: &str, name: &str) -> Result<bool, VaultError> {
        let Ok(name) = normalize_name(name) else {
            return Ok(false);
        };
        Ok(self.store.delete(deployment_id, &name).await?)
    }

    /// Remove every secret of a deployment (teardown)
    pub async fn delete_all(&self, deployment_id: &str) -> Result<u64, VaultError> {
        let removed = self.store.delete_all(deployment_id).await?;
        info!(deployment_id = %deployment_id, removed, "Deployment secrets removed");
        Ok(removed)
    }
}
