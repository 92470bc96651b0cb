//! Driver trait definitions
//!
//! Defines the narrow interfaces the worker uses to reach wallet vendors, and the
//! error type every driver reports through.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

/// Maximum number of characters of a vendor response body kept for diagnostics.
const BODY_SNIPPET_CHARS: usize = 200;

/// Wallet vendor a driver talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Vendor {
    GoogleWallet,
    ApplePassService,
    Apns,
}

impl Vendor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vendor::GoogleWallet => "google_wallet",
            Vendor::ApplePassService => "apple_pass_service",
            Vendor::Apns => "apns",
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a vendor-side failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VendorErrorKind {
    /// Google loyalty object patch rejected
    PatchFailed,
    /// Apple pass bundle could not be rebuilt or published
    RegenerateFailed,
    /// Silent push could not be delivered
    PushFailed,
    /// Credentials rejected (401/403) or token acquisition failed
    Unauthorized,
    /// Vendor asked us to slow down (429)
    RateLimited,
    /// Network-level failure before a response arrived
    Transport,
}

impl VendorErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            VendorErrorKind::PatchFailed => "patch failed",
            VendorErrorKind::RegenerateFailed => "regenerate failed",
            VendorErrorKind::PushFailed => "push failed",
            VendorErrorKind::Unauthorized => "unauthorized",
            VendorErrorKind::RateLimited => "rate limited",
            VendorErrorKind::Transport => "transport error",
        }
    }
}

impl fmt::Display for VendorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error reported by drivers and by payload validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WalletError {
    /// Malformed or missing payload fields; never reaches a vendor
    #[error("invalid job payload: {0}")]
    Validation(String),

    /// The vendor rejected or could not process the request
    #[error("{vendor} {kind}: {message}")]
    Vendor {
        vendor: Vendor,
        kind: VendorErrorKind,
        status: Option<u16>,
        message: String,
    },

    /// The referenced pass or registration does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The vendor call exceeded its deadline
    #[error("vendor call timed out after {0:?}")]
    Timeout(Duration),
}

impl WalletError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        WalletError::Validation(message.into())
    }

    pub fn vendor<S: Into<String>>(vendor: Vendor, kind: VendorErrorKind, message: S) -> Self {
        WalletError::Vendor {
            vendor,
            kind,
            status: None,
            message: message.into(),
        }
    }

    /// Build a vendor error from a non-success HTTP response.
    ///
    /// 401/403 and 429 get their own kinds; everything else is reported as
    /// `fallback_kind` with the status preserved.
    pub fn from_status(
        vendor: Vendor,
        fallback_kind: VendorErrorKind,
        status: u16,
        body: &str,
    ) -> Self {
        let kind = match status {
            401 | 403 => VendorErrorKind::Unauthorized,
            429 => VendorErrorKind::RateLimited,
            _ => fallback_kind,
        };
        let snippet = body_snippet(body);
        let message = if snippet.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, snippet)
        };

        WalletError::Vendor {
            vendor,
            kind,
            status: Some(status),
            message,
        }
    }

    /// Wrap a transport failure from the HTTP client.
    pub fn transport(vendor: Vendor, err: &reqwest::Error) -> Self {
        WalletError::Vendor {
            vendor,
            kind: VendorErrorKind::Transport,
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }

    /// Whether retrying later can plausibly succeed.
    ///
    /// Validation and missing-row failures are terminal: a retry would see the
    /// same payload and the same missing row.
    pub fn is_retryable(&self) -> bool {
        match self {
            WalletError::Validation(_) | WalletError::NotFound(_) => false,
            WalletError::Vendor { .. } | WalletError::Timeout(_) => true,
        }
    }

    /// Short machine-readable label used in logs and persisted error details.
    pub fn kind_label(&self) -> &'static str {
        match self {
            WalletError::Validation(_) => "validation",
            WalletError::Vendor { .. } => "vendor",
            WalletError::NotFound(_) => "not_found",
            WalletError::Timeout(_) => "timeout",
        }
    }

    /// Structured representation stored in `wallet_jobs.last_error`.
    pub fn to_details(&self) -> serde_json::Value {
        let mut details = json!({
            "type": self.kind_label(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        });
        if let WalletError::Vendor {
            vendor,
            kind,
            status,
            ..
        } = self
        {
            details["vendor"] = json!(vendor);
            details["vendor_kind"] = json!(kind);
            if let Some(status) = status {
                details["status"] = json!(status);
            }
        }
        details
    }
}

fn body_snippet(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > BODY_SNIPPET_CHARS {
        let truncated: String = trimmed.chars().take(BODY_SNIPPET_CHARS).collect();
        format!("{}...", truncated)
    } else {
        trimmed.to_string()
    }
}

/// Result of rebuilding an Apple pass bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegeneratedPass {
    pub serial_number: String,
}

/// Partial update of a live Google Wallet loyalty object
#[async_trait]
pub trait LoyaltyObjectPatcher: Send + Sync {
    /// Set the loyalty points balance of `object_id` to `balance`.
    ///
    /// Idempotent by value: applying the same balance twice converges.
    async fn apply(&self, object_id: &str, balance: i64) -> Result<(), WalletError>;
}

/// Rebuilds and publishes an Apple pass bundle from source-of-truth data
#[async_trait]
pub trait PassRegenerator: Send + Sync {
    async fn regenerate(&self, serial_number: &str) -> Result<RegeneratedPass, WalletError>;
}

/// Sends a silent "pass changed" push to a device
#[async_trait]
pub trait PushNotifier: Send + Sync {
    async fn notify(&self, device_token: &str) -> Result<(), WalletError>;
}

/// Source of OAuth bearer tokens for vendor APIs
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, WalletError>;
}
