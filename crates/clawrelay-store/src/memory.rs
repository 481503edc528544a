//! In-memory store implementations

use crate::{
    token_digest, Deployment, DeploymentStatus, DeploymentStore, NewDeployment, SecretRecord,
    SecretStore, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Default)]
struct DeploymentTable {
    by_id: HashMap<String, Deployment>,
    // token digest -> deployment id
    by_token: HashMap<String, String>,
}

/// In-memory deployment store
#[derive(Default)]
pub struct InMemoryDeploymentStore {
    table: RwLock<DeploymentTable>,
}

impl InMemoryDeploymentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeploymentStore for InMemoryDeploymentStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        Ok(self.table.read().await.by_id.get(id).cloned())
    }

    async fn find_by_relay_token(&self, token: &str) -> Result<Option<Deployment>, StoreError> {
        let table = self.table.read().await;
        Ok(table
            .by_token
            .get(&token_digest(token))
            .and_then(|id| table.by_id.get(id))
            .cloned())
    }

    async fn insert(&self, new: NewDeployment) -> Result<Deployment, StoreError> {
        let mut table = self.table.write().await;
        let digest = token_digest(&new.relay_token);

        if table.by_id.contains_key(&new.id) {
            return Err(StoreError::Conflict(format!(
                "deployment '{}' already exists",
                new.id
            )));
        }
        if table.by_token.contains_key(&digest) {
            return Err(StoreError::Conflict(
                "relay token already assigned to another deployment".to_string(),
            ));
        }

        let deployment = Deployment {
            id: new.id.clone(),
            webhook_secret: new.webhook_secret,
            status: DeploymentStatus::Provisioning,
            created_at: Utc::now(),
        };
        table.by_token.insert(digest, new.id.clone());
        table.by_id.insert(new.id, deployment.clone());
        Ok(deployment)
    }

    async fn set_status(&self, id: &str, status: DeploymentStatus) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        match table.by_id.get_mut(id) {
            Some(deployment) => {
                deployment.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut table = self.table.write().await;
        let removed = table.by_id.remove(id).is_some();
        if removed {
            table.by_token.retain(|_, owner| owner != id);
        }
        Ok(removed)
    }
}

/// In-memory secret store, ordered by (deployment id, name)
#[derive(Default)]
pub struct InMemorySecretStore {
    records: RwLock<BTreeMap<(String, String), SecretRecord>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SecretStore for InMemorySecretStore {
    async fn upsert(&self, mut record: SecretRecord) -> Result<(), StoreError> {
        let key = (record.deployment_id.clone(), record.name.clone());
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&key) {
            record.created_at = existing.created_at;
        }
        records.insert(key, record);
        Ok(())
    }

    async fn get(
        &self,
        deployment_id: &str,
        name: &str,
    ) -> Result<Option<SecretRecord>, StoreError> {
        let key = (deployment_id.to_string(), name.to_string());
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn list(&self, deployment_id: &str) -> Result<Vec<SecretRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn delete(&self, deployment_id: &str, name: &str) -> Result<bool, StoreError> {
        let key = (deployment_id.to_string(), name.to_string());
        Ok(self.records.write().await.remove(&key).is_some())
    }

    async fn delete_all(&self, deployment_id: &str) -> Result<u64, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(owner, _), _| owner != deployment_id);
        Ok((before - records.len()) as u64)
    }
}
