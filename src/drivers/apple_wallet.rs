//! Apple Wallet driver
//!
//! Apple passes are immutable bundles, so an update means rebuilding the pass on
//! the pass service and then telling devices to refetch it with a silent APNs push.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use url::Url;
use zeroize::Zeroizing;

use super::DriverInitError;
use super::trait_::{
    PassRegenerator, PushNotifier, RegeneratedPass, Vendor, VendorErrorKind, WalletError,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegenerateResponse {
    serial_number: Option<String>,
}

fn join_segments(base: &Url, segments: &[&str], vendor: Vendor) -> Result<Url, WalletError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| {
            WalletError::vendor(vendor, VendorErrorKind::Transport, "base url cannot carry a path")
        })?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Pass regenerator backed by the pass-service HTTP API
pub struct HttpPassRegenerator {
    http: Client,
    base_url: Url,
    api_key: Zeroizing<String>,
}

impl HttpPassRegenerator {
    pub fn new(http: Client, base_url: &str, api_key: &str) -> Result<Self, DriverInitError> {
        let base_url = Url::parse(base_url).map_err(|source| DriverInitError::InvalidUrl {
            name: "apple pass service url",
            source,
        })?;
        Ok(Self {
            http,
            base_url,
            api_key: Zeroizing::new(api_key.to_string()),
        })
    }
}

#[async_trait]
impl PassRegenerator for HttpPassRegenerator {
    #[tracing::instrument(skip(self), fields(vendor = "apple_pass_service"))]
    async fn regenerate(&self, serial_number: &str) -> Result<RegeneratedPass, WalletError> {
        let url = join_segments(
            &self.base_url,
            &["passes", serial_number, "regenerate"],
            Vendor::ApplePassService,
        )?;

        let response = self
            .http
            .post(url)
            .bearer_auth(self.api_key.as_str())
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| WalletError::transport(Vendor::ApplePassService, &e))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(WalletError::NotFound(format!("apple pass {}", serial_number)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WalletError::from_status(
                Vendor::ApplePassService,
                VendorErrorKind::RegenerateFailed,
                status.as_u16(),
                &body,
            ));
        }

        // Older pass-service builds answer with an empty body.
        let body = response.text().await.unwrap_or_default();
        let serial = serde_json::from_str::<RegenerateResponse>(&body)
            .ok()
            .and_then(|r| r.serial_number)
            .unwrap_or_else(|| serial_number.to_string());

        Ok(RegeneratedPass {
            serial_number: serial,
        })
    }
}

/// Silent "pass updated" push over the APNs HTTP/2 API
pub struct ApnsPushNotifier {
    http: Client,
    base_url: Url,
    topic: String,
}

impl ApnsPushNotifier {
    /// Build a notifier authenticating with the pass type certificate.
    ///
    /// `identity_pem` holds the certificate followed by its private key.
    pub fn new(
        base_url: &str,
        topic: &str,
        identity_pem: &[u8],
        timeout: std::time::Duration,
    ) -> Result<Self, DriverInitError> {
        let pem = Zeroizing::new(identity_pem.to_vec());
        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| DriverInitError::InvalidKey(format!("apns identity: {e}")))?;
        let http = Client::builder()
            .identity(identity)
            .timeout(timeout)
            .build()
            .map_err(DriverInitError::HttpClient)?;
        Self::with_client(http, base_url, topic)
    }

    /// Build a notifier on a preconfigured client.
    pub fn with_client(http: Client, base_url: &str, topic: &str) -> Result<Self, DriverInitError> {
        let base_url = Url::parse(base_url).map_err(|source| DriverInitError::InvalidUrl {
            name: "apns base url",
            source,
        })?;
        Ok(Self {
            http,
            base_url,
            topic: topic.to_string(),
        })
    }
}

#[async_trait]
impl PushNotifier for ApnsPushNotifier {
    #[tracing::instrument(skip(self, device_token), fields(vendor = "apns"))]
    async fn notify(&self, device_token: &str) -> Result<(), WalletError> {
        let url = join_segments(&self.base_url, &["3", "device", device_token], Vendor::Apns)?;

        let response = self
            .http
            .post(url)
            .header("apns-topic", &self.topic)
            .header("apns-push-type", "background")
            .header("apns-priority", "5")
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| WalletError::transport(Vendor::Apns, &e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WalletError::from_status(
            Vendor::Apns,
            VendorErrorKind::PushFailed,
            status.as_u16(),
            &body,
        ))
    }
}

/// Outcome of the push step following a successful regeneration
#[derive(Debug, Clone, PartialEq)]
pub enum PushStatus {
    Sent,
    /// No device token registered yet
    Skipped,
    Failed(WalletError),
}

/// Result of [`AppleWalletDriver::apply`]
#[derive(Debug, Clone, PartialEq)]
pub struct AppleApplyOutcome {
    pub serial_number: String,
    pub push: PushStatus,
}

/// Regenerate-then-push orchestration for Apple passes
#[derive(Clone)]
pub struct AppleWalletDriver {
    regenerator: Arc<dyn PassRegenerator>,
    notifier: Arc<dyn PushNotifier>,
}

impl AppleWalletDriver {
    pub fn new(regenerator: Arc<dyn PassRegenerator>, notifier: Arc<dyn PushNotifier>) -> Self {
        Self {
            regenerator,
            notifier,
        }
    }

    /// Rebuild the pass and, when a device token is known, push the update.
    ///
    /// A regeneration failure is returned as the error and no push is sent. A
    /// push failure after a successful regeneration is reported in the outcome so
    /// the caller can retry the push on its own.
    pub async fn apply(
        &self,
        pass_id: &str,
        device_token: Option<&str>,
    ) -> Result<AppleApplyOutcome, WalletError> {
        let regenerated = self.regenerator.regenerate(pass_id).await?;

        let push = match device_token.filter(|t| !t.trim().is_empty()) {
            None => {
                tracing::debug!(pass_id, "No device token registered, skipping push");
                PushStatus::Skipped
            }
            Some(token) => match self.notifier.notify(token).await {
                Ok(()) => PushStatus::Sent,
                Err(err) => {
                    tracing::warn!(pass_id, error = %err, "Pass regenerated but push failed");
                    PushStatus::Failed(err)
                }
            },
        };

        Ok(AppleApplyOutcome {
            serial_number: regenerated.serial_number,
            push,
        })
    }

    /// Send only the push for an already regenerated pass.
    pub async fn push(&self, pass_id: &str, device_token: &str) -> Result<(), WalletError> {
        tracing::debug!(pass_id, "Sending pass update push");
        self.notifier.notify(device_token).await
    }
}
