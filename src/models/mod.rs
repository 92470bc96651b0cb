//! # Data Models
//!
//! SeaORM entities for the wallet sync tables plus small API response types.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod wallet_job;
pub mod wallet_registration;

pub use wallet_job::Entity as WalletJob;
pub use wallet_registration::Entity as WalletRegistration;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "wallet-sync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Liveness report for `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    /// "ok" when the database answers
    pub status: String,
    pub database: String,
}
