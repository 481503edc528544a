//! Initial schema: deployments and their secrets

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Deployment::Table)
                    .if_not_exists()
                    .col(string_len(Deployment::Id, 255).primary_key())
                    .col(
                        string_len(Deployment::RelayTokenHash, 64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(text_null(Deployment::WebhookSecret))
                    .col(
                        string_len(Deployment::Status, 32)
                            .not_null()
                            .default("provisioning"),
                    )
                    .col(
                        timestamp_with_time_zone(Deployment::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // No foreign key to deployments: rows are keyed by deployment id only
        manager
            .create_table(
                Table::create()
                    .table(DeploymentSecret::Table)
                    .if_not_exists()
                    .col(string_len(DeploymentSecret::DeploymentId, 255).not_null())
                    .col(string_len(DeploymentSecret::Name, 255).not_null())
                    .col(text(DeploymentSecret::EncryptedValue).not_null())
                    .col(
                        text(DeploymentSecret::AllowedHosts)
                            .not_null()
                            .default("[]"),
                    )
                    .col(
                        timestamp_with_time_zone(DeploymentSecret::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(DeploymentSecret::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_deployment_secrets")
                            .col(DeploymentSecret::DeploymentId)
                            .col(DeploymentSecret::Name),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_deployment_secrets_deployment_id")
                    .table(DeploymentSecret::Table)
                    .col(DeploymentSecret::DeploymentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(DeploymentSecret::Table).to_owned())
            .await?;

        manager
            .drop_table(Table::drop().table(Deployment::Table).to_owned())
            .await?;

        Ok(())
    }
}

#[derive(DeriveIden)]
enum Deployment {
    #[sea_orm(iden = "deployments")]
    Table,
    Id,
    RelayTokenHash,
    WebhookSecret,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
enum DeploymentSecret {
    #[sea_orm(iden = "deployment_secrets")]
    Table,
    DeploymentId,
    Name,
    EncryptedValue,
    AllowedHosts,
    CreatedAt,
    UpdatedAt,
}
