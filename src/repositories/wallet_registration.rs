//! Wallet registration ledger
//!
//! Records which wallets a loyalty membership has been added to. The registration
//! subsystem writes rows; the sync pipeline reads them for fan-out and stamps push
//! tokens when the Apple device handshake arrives later.

use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::models::wallet_registration::{ActiveModel, Column, Entity, Model, WalletPlatform};

/// A registration about to be recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewRegistration {
    Google {
        customer_program_id: Uuid,
        object_id: String,
    },
    Apple {
        customer_program_id: Uuid,
        serial_number: String,
        device_library_id: Option<String>,
        push_token: Option<String>,
    },
}

/// Repository for wallet_registrations
#[derive(Debug, Clone)]
pub struct WalletRegistrationLedger {
    db: DatabaseConnection,
}

impl WalletRegistrationLedger {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Record a new wallet registration for a membership.
    pub async fn register(&self, registration: NewRegistration) -> Result<Model> {
        let now = Utc::now().fixed_offset();

        let mut row = ActiveModel {
            id: Set(Uuid::new_v4()),
            google_object_id: Set(None),
            apple_serial_number: Set(None),
            apple_push_token: Set(None),
            apple_device_library_id: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };

        match registration {
            NewRegistration::Google {
                customer_program_id,
                object_id,
            } => {
                row.customer_program_id = Set(customer_program_id);
                row.platform = Set(WalletPlatform::Google.as_str().to_string());
                row.google_object_id = Set(Some(object_id));
            }
            NewRegistration::Apple {
                customer_program_id,
                serial_number,
                device_library_id,
                push_token,
            } => {
                row.customer_program_id = Set(customer_program_id);
                row.platform = Set(WalletPlatform::Apple.as_str().to_string());
                row.apple_serial_number = Set(Some(serial_number));
                row.apple_device_library_id = Set(device_library_id);
                row.apple_push_token = Set(push_token);
            }
        }

        let model = row
            .insert(&self.db)
            .await
            .context("failed to insert wallet registration")?;

        tracing::info!(
            registration_id = %model.id,
            customer_program_id = %model.customer_program_id,
            platform = %model.platform,
            "Wallet registration recorded"
        );

        Ok(model)
    }

    /// Attach the APNs push token reported by a device to every Apple
    /// registration of `serial_number`. Returns the number of rows updated.
    pub async fn stamp_push_token(
        &self,
        serial_number: &str,
        device_library_id: &str,
        push_token: &str,
    ) -> Result<u64> {
        let result = Entity::update_many()
            .col_expr(Column::ApplePushToken, Expr::value(Some(push_token.to_string())))
            .col_expr(
                Column::AppleDeviceLibraryId,
                Expr::value(Some(device_library_id.to_string())),
            )
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Platform.eq(WalletPlatform::Apple.as_str()))
            .filter(Column::AppleSerialNumber.eq(serial_number))
            .exec(&self.db)
            .await
            .context("failed to stamp apple push token")?;

        if result.rows_affected == 0 {
            tracing::warn!(
                serial_number,
                "Push token arrived for a pass with no registration"
            );
        }

        Ok(result.rows_affected)
    }

    /// Remove a registration. Returns whether a row was deleted.
    pub async fn unregister(&self, registration_id: Uuid) -> Result<bool> {
        let result = Entity::delete_by_id(registration_id)
            .exec(&self.db)
            .await
            .context("failed to delete wallet registration")?;
        Ok(result.rows_affected > 0)
    }

    /// Every registration of a membership, oldest first.
    pub async fn list_for_membership(&self, customer_program_id: Uuid) -> Result<Vec<Model>> {
        Entity::find()
            .filter(Column::CustomerProgramId.eq(customer_program_id))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
            .context("failed to list wallet registrations")
    }
}
