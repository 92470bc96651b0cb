//! Wallet vendor drivers
//!
//! This module provides:
//! - The narrow driver traits the worker dispatches through
//! - The Google Wallet loyalty object patcher
//! - The Apple pass regenerate-then-push driver
//! - [`WalletDrivers`], the set of drivers built from configuration

pub mod apple_wallet;
pub mod google_wallet;
pub mod trait_;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use crate::config::AppConfig;

pub use apple_wallet::{
    AppleApplyOutcome, AppleWalletDriver, ApnsPushNotifier, HttpPassRegenerator, PushStatus,
};
pub use google_wallet::{GoogleWalletDriver, ServiceAccountTokenSource, StaticTokenSource};
pub use trait_::{
    AccessTokenSource, LoyaltyObjectPatcher, PassRegenerator, PushNotifier, RegeneratedPass,
    Vendor, VendorErrorKind, WalletError,
};

/// Failures while building drivers from configuration
#[derive(Debug, Error)]
pub enum DriverInitError {
    #[error("invalid {name}: {source}")]
    InvalidUrl {
        name: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid credential: {0}")]
    InvalidKey(String),

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Stand-in for a vendor whose credentials are not configured.
///
/// Every call fails with a retryable `Unauthorized` vendor error. Jobs keep
/// retrying with backoff and are given up once `max_attempts` is reached.
#[derive(Debug, Clone, Copy)]
pub struct UnconfiguredDriver {
    vendor: Vendor,
}

impl UnconfiguredDriver {
    pub fn new(vendor: Vendor) -> Self {
        Self { vendor }
    }

    fn error(&self) -> WalletError {
        WalletError::vendor(
            self.vendor,
            VendorErrorKind::Unauthorized,
            format!("{} credentials are not configured", self.vendor),
        )
    }
}

#[async_trait]
impl LoyaltyObjectPatcher for UnconfiguredDriver {
    async fn apply(&self, _object_id: &str, _balance: i64) -> Result<(), WalletError> {
        Err(self.error())
    }
}

#[async_trait]
impl PassRegenerator for UnconfiguredDriver {
    async fn regenerate(&self, _serial_number: &str) -> Result<RegeneratedPass, WalletError> {
        Err(self.error())
    }
}

#[async_trait]
impl PushNotifier for UnconfiguredDriver {
    async fn notify(&self, _device_token: &str) -> Result<(), WalletError> {
        Err(self.error())
    }
}

/// Drivers the worker dispatches to
#[derive(Clone)]
pub struct WalletDrivers {
    pub google: Arc<dyn LoyaltyObjectPatcher>,
    pub apple: AppleWalletDriver,
}

impl WalletDrivers {
    pub fn new(google: Arc<dyn LoyaltyObjectPatcher>, apple: AppleWalletDriver) -> Self {
        Self { google, apple }
    }

    /// Build the production drivers from configuration.
    ///
    /// Vendors without credentials get an [`UnconfiguredDriver`]; configuration
    /// validation refuses that outside local and test profiles.
    pub fn from_config(config: &AppConfig) -> Result<Self, DriverInitError> {
        let timeout = Duration::from_secs(config.worker.vendor_timeout_seconds);
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(DriverInitError::HttpClient)?;

        let google_cfg = &config.google_wallet;
        let google: Arc<dyn LoyaltyObjectPatcher> = match (
            google_cfg.service_account_email.as_deref(),
            google_cfg.private_key_pem.as_deref(),
        ) {
            (Some(email), Some(key)) => {
                let tokens =
                    ServiceAccountTokenSource::new(http.clone(), &google_cfg.token_uri, email, key)?;
                Arc::new(GoogleWalletDriver::new(
                    http.clone(),
                    &google_cfg.api_base,
                    Arc::new(tokens),
                )?)
            }
            _ => {
                tracing::warn!("Google Wallet credentials missing; google_patch jobs will retry");
                Arc::new(UnconfiguredDriver::new(Vendor::GoogleWallet))
            }
        };

        let apple_cfg = &config.apple_wallet;
        let regenerator: Arc<dyn PassRegenerator> = match (
            apple_cfg.pass_service_url.as_deref(),
            apple_cfg.pass_service_key.as_deref(),
        ) {
            (Some(url), Some(key)) => Arc::new(HttpPassRegenerator::new(http.clone(), url, key)?),
            _ => {
                tracing::warn!("Apple pass service not configured; regenerate jobs will retry");
                Arc::new(UnconfiguredDriver::new(Vendor::ApplePassService))
            }
        };

        let notifier: Arc<dyn PushNotifier> = match (
            apple_cfg.pass_type_identifier.as_deref(),
            apple_cfg.apns_identity_pem.as_deref(),
        ) {
            (Some(topic), Some(identity)) => Arc::new(ApnsPushNotifier::new(
                &apple_cfg.apns_base,
                topic,
                identity.as_bytes(),
                timeout,
            )?),
            _ => {
                tracing::warn!("APNs identity not configured; pass pushes will retry");
                Arc::new(UnconfiguredDriver::new(Vendor::Apns))
            }
        };

        Ok(Self {
            google,
            apple: AppleWalletDriver::new(regenerator, notifier),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_yield_unconfigured_drivers() {
        let config = AppConfig::default();
        let drivers = WalletDrivers::from_config(&config).expect("drivers build");

        let err = drivers.google.apply("obj-1", 10).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Vendor {
                vendor: Vendor::GoogleWallet,
                kind: VendorErrorKind::Unauthorized,
                ..
            }
        ));
        assert!(err.is_retryable());

        let err = drivers.apple.apply("pass-1", Some("abcd")).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Vendor {
                vendor: Vendor::ApplePassService,
                ..
            }
        ));
    }

    #[test]
    fn bad_google_key_is_rejected_at_startup() {
        let mut config = AppConfig::default();
        config.google_wallet.service_account_email = Some("svc@example.com".into());
        config.google_wallet.private_key_pem = Some("garbage".into());

        assert!(matches!(
            WalletDrivers::from_config(&config),
            Err(DriverInitError::InvalidKey(_))
        ));
    }
}
