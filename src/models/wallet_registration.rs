//! WalletRegistration entity model
//!
//! Rows in wallet_registrations associate a loyalty membership with one wallet
//! instance on a device or vendor account.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use uuid::Uuid;

/// Registration of a loyalty membership on a wallet platform
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "wallet_registrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Loyalty program membership this wallet belongs to
    pub customer_program_id: Uuid,

    /// Wallet platform (apple|google)
    pub platform: String,

    /// Google Wallet loyalty object identifier
    pub google_object_id: Option<String>,

    /// Apple pass serial number
    pub apple_serial_number: Option<String>,

    /// APNs push token, arrives asynchronously after the pass is added
    pub apple_push_token: Option<String>,

    /// Device library identifier reported by the Apple web service handshake
    pub apple_device_library_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Wallet platform a registration lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletPlatform {
    Apple,
    Google,
}

impl WalletPlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletPlatform::Apple => "apple",
            WalletPlatform::Google => "google",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "apple" => Some(WalletPlatform::Apple),
            "google" => Some(WalletPlatform::Google),
            _ => None,
        }
    }
}

impl Model {
    pub fn wallet_platform(&self) -> Option<WalletPlatform> {
        WalletPlatform::parse(&self.platform)
    }
}
