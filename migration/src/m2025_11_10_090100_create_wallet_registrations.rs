//! Creates wallet_registrations, the ledger of wallets a membership was added to.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WalletRegistrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WalletRegistrations::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WalletRegistrations::CustomerProgramId)
                            .uuid()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WalletRegistrations::Platform).text().not_null())
                    .col(ColumnDef::new(WalletRegistrations::GoogleObjectId).text().null())
                    .col(
                        ColumnDef::new(WalletRegistrations::AppleSerialNumber)
                            .text()
                            .null(),
                    )
                    .col(ColumnDef::new(WalletRegistrations::ApplePushToken).text().null())
                    .col(
                        ColumnDef::new(WalletRegistrations::AppleDeviceLibraryId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WalletRegistrations::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(WalletRegistrations::UpdatedAt)
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
                    .name("idx_wallet_registrations_customer_program")
                    .table(WalletRegistrations::Table)
                    .col(WalletRegistrations::CustomerProgramId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_wallet_registrations_apple_serial")
                    .table(WalletRegistrations::Table)
                    .col(WalletRegistrations::AppleSerialNumber)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WalletRegistrations::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WalletRegistrations {
    Table,
    Id,
    CustomerProgramId,
    Platform,
    GoogleObjectId,
    AppleSerialNumber,
    ApplePushToken,
    AppleDeviceLibraryId,
    CreatedAt,
    UpdatedAt,
}
