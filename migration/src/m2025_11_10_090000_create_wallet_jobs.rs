//! Migration to create the wallet_jobs table.
//!
//! wallet_jobs is the durable queue of wallet reconciliation work. Rows are
//! picked up by status and due time, so the main index covers exactly that.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WalletJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(WalletJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(WalletJobs::JobType).text().not_null())
                    .col(ColumnDef::new(WalletJobs::Payload).json_binary().not_null())
                    .col(
                        ColumnDef::new(WalletJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(WalletJobs::Outcome).text().null())
                    .col(
                        ColumnDef::new(WalletJobs::Attempts)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WalletJobs::MaxAttempts)
                            .integer()
                            .not_null()
                            .default(5),
                    )
                    .col(
                        ColumnDef::new(WalletJobs::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WalletJobs::LeaseExpiresAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WalletJobs::LastError).json_binary().null())
                    .col(
                        ColumnDef::new(WalletJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WalletJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_wallet_jobs_status_next_attempt")
                    .table(WalletJobs::Table)
                    .col(WalletJobs::Status)
                    .col(WalletJobs::NextAttemptAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_wallet_jobs_status_next_attempt")
                    .to_owned(),
            )
            .await?;

        manager
            .drop_table(Table::drop().table(WalletJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WalletJobs {
    Table,
    Id,
    JobType,
    Payload,
    Status,
    Outcome,
    Attempts,
    MaxAttempts,
    NextAttemptAt,
    LeaseExpiresAt,
    LastError,
    CreatedAt,
    UpdatedAt,
}
