//! Wallet job vocabulary
//!
//! Typed job kinds, payloads, lifecycle states and the retry backoff schedule
//! shared by the queue and the worker.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::drivers::WalletError;

/// Google Wallet object ids end up in a URL path segment.
static GOOGLE_OBJECT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").expect("object id pattern compiles"));

/// APNs device tokens are hex strings.
static DEVICE_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Fa-f]+$").expect("device token pattern compiles"));

/// Kind of reconciliation work a job performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletJobType {
    GooglePatch,
    ApplePkpassRegenerate,
    ApplePushNotify,
}

impl WalletJobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WalletJobType::GooglePatch => "google_patch",
            WalletJobType::ApplePkpassRegenerate => "apple_pkpass_regenerate",
            WalletJobType::ApplePushNotify => "apple_push_notify",
        }
    }
}

impl fmt::Display for WalletJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored `job_type` string names no known kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownJobType(pub String);

impl fmt::Display for UnknownJobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown wallet job type '{}'", self.0)
    }
}

impl std::error::Error for UnknownJobType {}

impl FromStr for WalletJobType {
    type Err = UnknownJobType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "google_patch" => Ok(WalletJobType::GooglePatch),
            "apple_pkpass_regenerate" => Ok(WalletJobType::ApplePkpassRegenerate),
            "apple_push_notify" => Ok(WalletJobType::ApplePushNotify),
            other => Err(UnknownJobType(other.to_string())),
        }
    }
}

/// Lifecycle state of a job row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Retrying,
    InFlight,
    Done,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Retrying => "retrying",
            JobStatus::InFlight => "in_flight",
            JobStatus::Done => "done",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "retrying" => Some(JobStatus::Retrying),
            "in_flight" => Some(JobStatus::InFlight),
            "done" => Some(JobStatus::Done),
            _ => None,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a `done` job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded,
    GivenUp,
    AbandonedUnknownType,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::GivenUp => "given_up",
            JobOutcome::AbandonedUnknownType => "abandoned_unknown_type",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "succeeded" => Some(JobOutcome::Succeeded),
            "given_up" => Some(JobOutcome::GivenUp),
            "abandoned_unknown_type" => Some(JobOutcome::AbandonedUnknownType),
            _ => None,
        }
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePatchPayload {
    pub object_id: String,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppleRegeneratePayload {
    pub pass_id: String,
    #[serde(default)]
    pub device_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplePushPayload {
    pub pass_id: String,
    pub device_token: String,
}

/// Typed job payload; one variant per [`WalletJobType`].
///
/// Serialized without a tag: the discriminant lives in the `job_type` column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletJobPayload {
    GooglePatch(GooglePatchPayload),
    ApplePkpassRegenerate(AppleRegeneratePayload),
    ApplePushNotify(ApplePushPayload),
}

impl WalletJobPayload {
    pub fn google_patch(object_id: impl Into<String>, balance: i64) -> Self {
        WalletJobPayload::GooglePatch(GooglePatchPayload {
            object_id: object_id.into(),
            balance,
        })
    }

    /// Regenerate job; a blank device token means the device has not registered yet.
    pub fn apple_regenerate(pass_id: impl Into<String>, device_token: Option<String>) -> Self {
        WalletJobPayload::ApplePkpassRegenerate(AppleRegeneratePayload {
            pass_id: pass_id.into(),
            device_token: device_token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn apple_push(pass_id: impl Into<String>, device_token: impl Into<String>) -> Self {
        WalletJobPayload::ApplePushNotify(ApplePushPayload {
            pass_id: pass_id.into(),
            device_token: device_token.into(),
        })
    }

    pub fn job_type(&self) -> WalletJobType {
        match self {
            WalletJobPayload::GooglePatch(_) => WalletJobType::GooglePatch,
            WalletJobPayload::ApplePkpassRegenerate(_) => WalletJobType::ApplePkpassRegenerate,
            WalletJobPayload::ApplePushNotify(_) => WalletJobType::ApplePushNotify,
        }
    }

    /// Check the fields the job type requires.
    pub fn validate(&self) -> Result<(), WalletError> {
        match self {
            WalletJobPayload::GooglePatch(p) => {
                if p.object_id.trim().is_empty() {
                    return Err(WalletError::validation("objectId is required"));
                }
                if !GOOGLE_OBJECT_ID.is_match(&p.object_id) {
                    return Err(WalletError::validation(format!(
                        "objectId '{}' may only contain letters, digits, '.', '_' and '-'",
                        p.object_id
                    )));
                }
                Ok(())
            }
            WalletJobPayload::ApplePkpassRegenerate(p) => {
                validate_pass_id(&p.pass_id)?;
                if let Some(token) = &p.device_token {
                    validate_device_token(token)?;
                }
                Ok(())
            }
            WalletJobPayload::ApplePushNotify(p) => {
                validate_pass_id(&p.pass_id)?;
                validate_device_token(&p.device_token)
            }
        }
    }

    /// JSON stored in `wallet_jobs.payload`.
    pub fn to_json(&self) -> JsonValue {
        let value = match self {
            WalletJobPayload::GooglePatch(p) => serde_json::to_value(p),
            WalletJobPayload::ApplePkpassRegenerate(p) => serde_json::to_value(p),
            WalletJobPayload::ApplePushNotify(p) => serde_json::to_value(p),
        };
        // Plain structs of strings and integers always serialize.
        value.unwrap_or(JsonValue::Null)
    }

    /// Decode and validate a stored payload for the given job type.
    pub fn decode(job_type: WalletJobType, payload: &JsonValue) -> Result<Self, WalletError> {
        let decoded = match job_type {
            WalletJobType::GooglePatch => {
                serde_json::from_value::<GooglePatchPayload>(payload.clone())
                    .map(WalletJobPayload::GooglePatch)
            }
            WalletJobType::ApplePkpassRegenerate => {
                serde_json::from_value::<AppleRegeneratePayload>(payload.clone()).map(|p| {
                    WalletJobPayload::apple_regenerate(p.pass_id, p.device_token)
                })
            }
            WalletJobType::ApplePushNotify => {
                serde_json::from_value::<ApplePushPayload>(payload.clone())
                    .map(WalletJobPayload::ApplePushNotify)
            }
        }
        .map_err(|err| WalletError::validation(format!("{} payload: {}", job_type, err)))?;

        decoded.validate()?;
        Ok(decoded)
    }
}

fn validate_pass_id(pass_id: &str) -> Result<(), WalletError> {
    if pass_id.trim().is_empty() {
        return Err(WalletError::validation("passId is required"));
    }
    Ok(())
}

fn validate_device_token(token: &str) -> Result<(), WalletError> {
    if !DEVICE_TOKEN.is_match(token) {
        return Err(WalletError::validation(
            "deviceToken must be a non-empty hex string",
        ));
    }
    Ok(())
}

/// Upper bound on a single retry delay (30 days).
pub const MAX_BACKOFF_SECONDS: u64 = 30 * 24 * 60 * 60;

/// Delay before the next attempt after `attempts` failures: `2^attempts * base`.
///
/// Attempt counts at or below zero are treated as the first failure. The result is
/// capped at [`MAX_BACKOFF_SECONDS`].
pub fn backoff_seconds(attempts: i32, base_seconds: u64) -> u64 {
    let exponent = attempts.max(1) as u32;
    2u64.checked_pow(exponent)
        .and_then(|factor| factor.checked_mul(base_seconds))
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn backoff_doubles_from_two_minutes() {
        let delays: Vec<u64> = (1..=5).map(|attempt| backoff_seconds(attempt, 60)).collect();
        assert_eq!(delays, vec![120, 240, 480, 960, 1920]);
    }

    #[test]
    fn backoff_is_capped_instead_of_overflowing() {
        assert_eq!(backoff_seconds(100, 60), MAX_BACKOFF_SECONDS);
        assert_eq!(backoff_seconds(15, 3600), MAX_BACKOFF_SECONDS);
        assert_eq!(backoff_seconds(0, 60), 120);
    }

    #[test]
    fn job_type_round_trips_through_column_strings() {
        for job_type in [
            WalletJobType::GooglePatch,
            WalletJobType::ApplePkpassRegenerate,
            WalletJobType::ApplePushNotify,
        ] {
            assert_eq!(job_type.as_str().parse::<WalletJobType>(), Ok(job_type));
        }
        assert_eq!(
            "samsung_pay".parse::<WalletJobType>(),
            Err(UnknownJobType("samsung_pay".to_string()))
        );
    }

    #[test]
    fn google_payload_uses_camel_case_keys() {
        let payload = WalletJobPayload::google_patch("3388000000012345.member-1", 50);
        assert_eq!(
            payload.to_json(),
            json!({"objectId": "3388000000012345.member-1", "balance": 50})
        );
    }

    #[test]
    fn google_payload_validation() {
        assert!(
            WalletJobPayload::google_patch("3388000000012345.member-1", 0)
                .validate()
                .is_ok()
        );
        assert!(WalletJobPayload::google_patch("", 10).validate().is_err());
        assert!(WalletJobPayload::google_patch("obj-1", 10).validate().is_ok());
        assert!(
            WalletJobPayload::google_patch("issuer/../obj", 10)
                .validate()
                .is_err()
        );
        // Balances are mirrored as-is, including overdrawn ones.
        assert!(
            WalletJobPayload::google_patch("3388000000012345.member-1", -1)
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn blank_device_token_is_treated_as_absent() {
        let payload = WalletJobPayload::apple_regenerate("serial-1", Some("  ".to_string()));
        assert_eq!(
            payload,
            WalletJobPayload::ApplePkpassRegenerate(AppleRegeneratePayload {
                pass_id: "serial-1".to_string(),
                device_token: None,
            })
        );
        assert!(payload.validate().is_ok());
        assert_eq!(payload.to_json(), json!({"passId": "serial-1", "deviceToken": null}));
    }

    #[test]
    fn decode_rejects_missing_fields() {
        let err = WalletJobPayload::decode(WalletJobType::GooglePatch, &json!({"balance": 5}))
            .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
        assert!(err.to_string().contains("objectId"));

        let err =
            WalletJobPayload::decode(WalletJobType::ApplePushNotify, &json!({"passId": "p1"}))
                .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn decode_accepts_missing_device_token_for_regenerate() {
        let decoded = WalletJobPayload::decode(
            WalletJobType::ApplePkpassRegenerate,
            &json!({"passId": "serial-1"}),
        )
        .unwrap();
        assert_eq!(decoded, WalletJobPayload::apple_regenerate("serial-1", None));
    }

    #[test]
    fn decode_rejects_non_hex_device_token() {
        let err = WalletJobPayload::decode(
            WalletJobType::ApplePushNotify,
            &json!({"passId": "serial-1", "deviceToken": "not-a-token"}),
        )
        .unwrap_err();
        assert!(matches!(err, WalletError::Validation(_)));
    }

    #[test]
    fn status_and_outcome_parse_their_column_values() {
        assert_eq!(JobStatus::parse("in_flight"), Some(JobStatus::InFlight));
        assert_eq!(JobStatus::parse("queued"), None);
        assert_eq!(
            JobOutcome::parse("abandoned_unknown_type"),
            Some(JobOutcome::AbandonedUnknownType)
        );
    }
}
