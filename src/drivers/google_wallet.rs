//! Google Wallet driver
//!
//! Patches the points balance of a live loyalty object through the Google Wallet
//! REST API. Access tokens come from a service-account JWT-bearer grant and are
//! cached until shortly before they expire.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use url::Url;
use zeroize::Zeroizing;

use super::DriverInitError;
use super::trait_::{AccessTokenSource, LoyaltyObjectPatcher, Vendor, VendorErrorKind, WalletError};

/// OAuth scope granting access to wallet objects of the issuer.
pub const WALLET_OBJECT_SCOPE: &str = "https://www.googleapis.com/auth/wallet_object.issuer";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertion lifetime; Google caps it at one hour.
const ASSERTION_TTL_SECONDS: i64 = 3600;

/// Tokens are refreshed this long before their reported expiry.
const TOKEN_REFRESH_SKEW_SECONDS: i64 = 60;

#[derive(Debug, Serialize)]
struct ServiceAccountClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_TTL_SECONDS
}

#[derive(Clone)]
struct CachedToken {
    access_token: Zeroizing<String>,
    refresh_at: DateTime<Utc>,
}

/// Exchanges a signed service-account assertion for an access token
pub struct ServiceAccountTokenSource {
    http: Client,
    token_uri: String,
    client_email: String,
    encoding_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    /// Build a token source from the service account email and its RSA private key (PEM).
    pub fn new(
        http: Client,
        token_uri: impl Into<String>,
        client_email: impl Into<String>,
        private_key_pem: &str,
    ) -> Result<Self, DriverInitError> {
        let pem = Zeroizing::new(private_key_pem.as_bytes().to_vec());
        let encoding_key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| DriverInitError::InvalidKey(format!("google service account key: {e}")))?;

        Ok(Self {
            http,
            token_uri: token_uri.into(),
            client_email: client_email.into(),
            encoding_key,
            cached: Mutex::new(None),
        })
    }

    fn signed_assertion(&self, now: DateTime<Utc>) -> Result<String, WalletError> {
        let iat = now.timestamp();
        let claims = ServiceAccountClaims {
            iss: &self.client_email,
            scope: WALLET_OBJECT_SCOPE,
            aud: &self.token_uri,
            iat,
            exp: iat + ASSERTION_TTL_SECONDS,
        };

        encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key).map_err(|e| {
            WalletError::vendor(
                Vendor::GoogleWallet,
                VendorErrorKind::Unauthorized,
                format!("failed to sign service account assertion: {e}"),
            )
        })
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<CachedToken, WalletError> {
        let assertion = self.signed_assertion(now)?;

        let response = self
            .http
            .post(&self.token_uri)
            .header("Accept", "application/json")
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| WalletError::transport(Vendor::GoogleWallet, &e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let kind = if status.as_u16() == 429 {
                VendorErrorKind::RateLimited
            } else {
                VendorErrorKind::Unauthorized
            };
            return Err(WalletError::from_status(
                Vendor::GoogleWallet,
                kind,
                status.as_u16(),
                &body,
            ));
        }

        let token: TokenResponse = response.json().await.map_err(|e| {
            WalletError::vendor(
                Vendor::GoogleWallet,
                VendorErrorKind::Unauthorized,
                format!("invalid token response: {e}"),
            )
        })?;

        let lifetime = (token.expires_in - TOKEN_REFRESH_SKEW_SECONDS).max(0);
        Ok(CachedToken {
            access_token: Zeroizing::new(token.access_token),
            refresh_at: now + Duration::seconds(lifetime),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, WalletError> {
        let mut cached = self.cached.lock().await;
        let now = Utc::now();

        if let Some(token) = cached.as_ref()
            && now < token.refresh_at
        {
            return Ok(token.access_token.to_string());
        }

        let fresh = self.fetch_token(now).await?;
        let access_token = fresh.access_token.to_string();
        *cached = Some(fresh);
        tracing::debug!("Refreshed Google Wallet access token");

        Ok(access_token)
    }
}

/// Fixed bearer token, for tests and locally minted tokens
pub struct StaticTokenSource(Zeroizing<String>);

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }
}

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, WalletError> {
        Ok(self.0.to_string())
    }
}

/// Google Wallet loyalty object patcher
pub struct GoogleWalletDriver {
    http: Client,
    api_base: Url,
    tokens: Arc<dyn AccessTokenSource>,
}

impl GoogleWalletDriver {
    pub fn new(
        http: Client,
        api_base: &str,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Result<Self, DriverInitError> {
        let api_base = Url::parse(api_base).map_err(|source| DriverInitError::InvalidUrl {
            name: "google wallet api base",
            source,
        })?;
        Ok(Self {
            http,
            api_base,
            tokens,
        })
    }

    fn object_url(&self, object_id: &str) -> Result<Url, WalletError> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                WalletError::vendor(
                    Vendor::GoogleWallet,
                    VendorErrorKind::PatchFailed,
                    "google wallet api base cannot carry a path",
                )
            })?
            .pop_if_empty()
            .extend(["walletobjects", "v1", "loyaltyObject", object_id]);
        Ok(url)
    }
}

#[async_trait]
impl LoyaltyObjectPatcher for GoogleWalletDriver {
    #[tracing::instrument(skip(self), fields(vendor = "google_wallet"))]
    async fn apply(&self, object_id: &str, balance: i64) -> Result<(), WalletError> {
        let url = self.object_url(object_id)?;
        let token = self.tokens.access_token().await?;

        let response = self
            .http
            .patch(url)
            .bearer_auth(token)
            .json(&json!({ "loyaltyPoints": { "balance": { "int": balance } } }))
            .send()
            .await
            .map_err(|e| WalletError::transport(Vendor::GoogleWallet, &e))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(object_id, balance, "Loyalty object patched");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WalletError::from_status(
            Vendor::GoogleWallet,
            VendorErrorKind::PatchFailed,
            status.as_u16(),
            &body,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn driver(server: &MockServer) -> GoogleWalletDriver {
        GoogleWalletDriver::new(
            Client::new(),
            &server.uri(),
            Arc::new(StaticTokenSource::new("test-token")),
        )
        .expect("driver builds")
    }

    #[tokio::test]
    async fn patches_loyalty_balance() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path("/walletobjects/v1/loyaltyObject/3388000000012345.member-1"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({"loyaltyPoints": {"balance": {"int": 50}}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "x"})))
            .expect(2)
            .mount(&server)
            .await;

        let driver = driver(&server);
        driver.apply("3388000000012345.member-1", 50).await.unwrap();
        driver
            .apply("3388000000012345.member-1", 50)
            .await
            .expect("same value twice converges");
    }

    #[tokio::test]
    async fn vendor_errors_keep_status_and_message() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(
                ResponseTemplate::new(404)
                    .set_body_json(json!({"error": {"message": "Object not found"}})),
            )
            .mount(&server)
            .await;

        let err = driver(&server).apply("3388.missing", 10).await.unwrap_err();
        match err {
            WalletError::Vendor {
                vendor,
                kind,
                status,
                message,
            } => {
                assert_eq!(vendor, Vendor::GoogleWallet);
                assert_eq!(kind, VendorErrorKind::PatchFailed);
                assert_eq!(status, Some(404));
                assert!(message.contains("Object not found"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn auth_failures_are_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = driver(&server).apply("3388.m1", 10).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Vendor {
                kind: VendorErrorKind::Unauthorized,
                ..
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_vendor_is_transport_error() {
        let driver = GoogleWalletDriver::new(
            Client::new(),
            "http://127.0.0.1:9",
            Arc::new(StaticTokenSource::new("t")),
        )
        .unwrap();

        let err = driver.apply("3388.m1", 10).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Vendor {
                kind: VendorErrorKind::Transport,
                ..
            }
        ));
    }

    #[test]
    fn rejects_invalid_private_key() {
        let result = ServiceAccountTokenSource::new(
            Client::new(),
            "https://oauth2.googleapis.com/token",
            "svc@example.iam.gserviceaccount.com",
            "not a pem",
        );
        assert!(matches!(result, Err(DriverInitError::InvalidKey(_))));
    }
}
