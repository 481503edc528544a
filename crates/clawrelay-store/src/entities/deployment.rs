//! Deployment entity: one provisioned agent that may hold a tunnel

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deployments")]
pub struct Model {
    /// Deployment identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,

    /// SHA-256 hash of the relay token the agent presents on tunnel upgrade
    #[sea_orm(unique)]
    pub relay_token_hash: String,

    /// Shared secret the chat platform echoes on webhook deliveries
    #[sea_orm(column_type = "Text", nullable)]
    pub webhook_secret: Option<String>,

    /// provisioning | running | stopped | failed
    pub status: String,

    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::deployment_secret::Entity")]
    DeploymentSecret,
}

impl Related<super::deployment_secret::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::DeploymentSecret.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
