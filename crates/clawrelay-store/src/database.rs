//! SeaORM-backed implementation of both store traits

use crate::entities::{deployment, deployment_secret};
use crate::{
    token_digest, Deployment, DeploymentStatus, DeploymentStore, NewDeployment, SecretRecord,
    SecretStore, StoreError,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use tracing::debug;

/// Deployment and secret persistence over a shared database connection
#[derive(Clone)]
pub struct SeaOrmStore {
    db: DatabaseConnection,
}

impl SeaOrmStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn deployment_from_model(model: deployment::Model) -> Result<Deployment, StoreError> {
    Ok(Deployment {
        status: model.status.parse()?,
        id: model.id,
        webhook_secret: model.webhook_secret,
        created_at: model.created_at,
    })
}

fn secret_from_model(model: deployment_secret::Model) -> Result<SecretRecord, StoreError> {
    let allowed_hosts: Vec<String> = serde_json::from_str(&model.allowed_hosts).map_err(|e| {
        StoreError::Corrupt(format!(
            "allowed hosts of secret '{}' for '{}': {}",
            model.name, model.deployment_id, e
        ))
    })?;

    Ok(SecretRecord {
        deployment_id: model.deployment_id,
        name: model.name,
        encrypted_value: model.encrypted_value,
        allowed_hosts,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

#[async_trait]
impl DeploymentStore for SeaOrmStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Deployment>, StoreError> {
        deployment::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?
            .map(deployment_from_model)
            .transpose()
    }

    async fn find_by_relay_token(&self, token: &str) -> Result<Option<Deployment>, StoreError> {
        deployment::Entity::find()
            .filter(deployment::Column::RelayTokenHash.eq(token_digest(token)))
            .one(&self.db)
            .await?
            .map(deployment_from_model)
            .transpose()
    }

    async fn insert(&self, new: NewDeployment) -> Result<Deployment, StoreError> {
        if self.find_by_id(&new.id).await?.is_some() {
            return Err(StoreError::Conflict(format!(
                "deployment '{}' already exists",
                new.id
            )));
        }

        let model = deployment::ActiveModel {
            id: Set(new.id.clone()),
            relay_token_hash: Set(token_digest(&new.relay_token)),
            webhook_secret: Set(new.webhook_secret),
            status: Set(DeploymentStatus::Provisioning.as_str().to_string()),
            created_at: Set(Utc::now()),
        }
        .insert(&self.db)
        .await?;

        debug!(deployment_id = %model.id, "Deployment inserted");
        deployment_from_model(model)
    }

    async fn set_status(&self, id: &str, status: DeploymentStatus) -> Result<bool, StoreError> {
        let result = deployment::Entity::update_many()
            .col_expr(deployment::Column::Status, Expr::value(status.as_str()))
            .filter(deployment::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let result = deployment::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl SecretStore for SeaOrmStore {
    async fn upsert(&self, record: SecretRecord) -> Result<(), StoreError> {
        let allowed_hosts = serde_json::to_string(&record.allowed_hosts)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let model = deployment_secret::ActiveModel {
            deployment_id: Set(record.deployment_id),
            name: Set(record.name),
            encrypted_value: Set(record.encrypted_value),
            allowed_hosts: Set(allowed_hosts),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
        };

        deployment_secret::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([
                    deployment_secret::Column::DeploymentId,
                    deployment_secret::Column::Name,
                ])
                .update_columns([
                    deployment_secret::Column::EncryptedValue,
                    deployment_secret::Column::AllowedHosts,
                    deployment_secret::Column::UpdatedAt,
                ])
                .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;

        Ok(())
    }

    async fn get(
        &self,
        deployment_id: &str,
        name: &str,
    ) -> Result<Option<SecretRecord>, StoreError> {
        deployment_secret::Entity::find_by_id((deployment_id.to_string(), name.to_string()))
            .one(&self.db)
            .await?
            .map(secret_from_model)
            .transpose()
    }

    async fn list(&self, deployment_id: &str) -> Result<Vec<SecretRecord>, StoreError> {
        deployment_secret::Entity::find()
            .filter(deployment_secret::Column::DeploymentId.eq(deployment_id))
            .order_by_asc(deployment_secret::Column::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .map(secret_from_model)
            .collect()
    }

    async fn delete(&self, deployment_id: &str, name: &str) -> Result<bool, StoreError> {
        let result = deployment_secret::Entity::delete_by_id((
            deployment_id.to_string(),
            name.to_string(),
        ))
        .exec(&self.db)
        .await?;
        Ok(result.rows_affected > 0)
    }

    async fn delete_all(&self, deployment_id: &str) -> Result<u64, StoreError> {
        let result = deployment_secret::Entity::delete_many()
            .filter(deployment_secret::Column::DeploymentId.eq(deployment_id))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }
}
