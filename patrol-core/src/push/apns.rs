//! HTTP/2 APNs provider client. Signs a short-lived ES256 provider token
//! once an hour and attaches it as `Bearer` on every request; sandbox and
//! production are separate `reqwest::Client`s against separate hosts, built
//! from the same signing key (§4.5 "two clients ... from the same signing
//! key").

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tokio::sync::RwLock;

use super::{Notification, PushClient, PushResponse};
use crate::error::{CoreError, Result};

const SANDBOX_HOST: &str = "https://api.sandbox.push.apple.com";
const PRODUCTION_HOST: &str = "https://api.push.apple.com";
const TOKEN_LIFETIME: Duration = Duration::from_secs(55 * 60);

#[derive(Serialize)]
struct ProviderClaims {
    iss: String,
    iat: i64,
}

/// The ES256 private key plus the two identifiers APNs needs in the JWT
/// header/claims to recognize it (`kid`, `iss`/team id).
pub struct ApnsSigningKey {
    key: EncodingKey,
    key_id: String,
    team_id: String,
}

impl ApnsSigningKey {
    /// `pem` is the contents of the `.p8` key file (or an inline PEM string
    /// from `APPLE_KEY_PATH`/env, per §6).
    pub fn from_pem(pem: &[u8], key_id: impl Into<String>, team_id: impl Into<String>) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(pem)
            .map_err(|e| CoreError::Internal(format!("invalid APNs signing key: {e}")))?;
        Ok(Self {
            key,
            key_id: key_id.into(),
            team_id: team_id.into(),
        })
    }

    fn sign(&self, issued_at: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat: issued_at,
        };
        encode(&header, &claims, &self.key).map_err(|e| CoreError::Internal(format!("failed to sign APNs token: {e}")))
    }
}

struct CachedToken {
    token: String,
    issued_at: i64,
}

/// One host (sandbox or production) plus a lazily-refreshed provider token
/// shared across every push to that host — APNs rate-limits token issuance
/// independently of push volume, so re-signing per request is wasteful.
struct HostClient {
    http: Client,
    host: &'static str,
    signing_key: Arc<ApnsSigningKey>,
    cached: RwLock<Option<CachedToken>>,
}

impl HostClient {
    fn new(http: Client, host: &'static str, signing_key: Arc<ApnsSigningKey>) -> Self {
        Self {
            http,
            host,
            signing_key,
            cached: RwLock::new(None),
        }
    }

    async fn provider_token(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();

        {
            let cached = self.cached.read().await;
            if let Some(cached) = cached.as_ref() {
                if now - cached.issued_at < TOKEN_LIFETIME.as_secs() as i64 {
                    return Ok(cached.token.clone());
                }
            }
        }

        let token = self.signing_key.sign(now)?;
        let mut cached = self.cached.write().await;
        *cached = Some(CachedToken { token: token.clone(), issued_at: now });
        Ok(token)
    }

    async fn push(&self, notification: &Notification) -> Result<PushResponse> {
        let token = self.provider_token().await?;
        let url = format!("{}/3/device/{}", self.host, notification.device_token);

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .header("apns-topic", &notification.topic)
            .header("apns-priority", match notification.priority {
                super::Priority::Immediate => "10",
                super::Priority::Conserving => "5",
            })
            .json(&notification.payload);

        if let Some(push_type) = notification.push_type {
            request = request.header("apns-push-type", push_type.header_value());
        }
        if let Some(collapse_id) = &notification.collapse_id {
            request = request.header("apns-collapse-id", collapse_id);
        }
        if let Some(expiration) = notification.expiration {
            request = request.header("apns-expiration", expiration.timestamp().to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CoreError::Internal(format!("APNs request failed: {e}")))?;

        let status = response.status();
        let apns_id = response
            .headers()
            .get("apns-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        if status == StatusCode::OK {
            return Ok(PushResponse { status: status.as_u16(), apns_id, reason: None, sent: true });
        }

        let body: serde_json::Value = response.json().await.unwrap_or_default();
        let reason = body.get("reason").and_then(|v| v.as_str()).map(str::to_string);
        let sent = !matches!(
            reason.as_deref(),
            Some("BadDeviceToken") | Some("Unregistered") | Some("DeviceTokenNotForTopic")
        ) && status != StatusCode::GONE;

        Ok(PushResponse { status: status.as_u16(), apns_id, reason, sent })
    }
}

/// Pairs the sandbox and production hosts; `Device::sandbox` selects which
/// one a given push goes to (§4.5).
pub struct ApnsClient {
    sandbox: HostClient,
    production: HostClient,
}

impl ApnsClient {
    pub fn new(signing_key: ApnsSigningKey) -> reqwest::Result<Self> {
        let http = Client::builder()
            .http2_prior_knowledge()
            .pool_idle_timeout(Duration::from_secs(60))
            .timeout(Duration::from_secs(10))
            .build()?;

        let signing_key = Arc::new(signing_key);

        Ok(Self {
            sandbox: HostClient::new(http.clone(), SANDBOX_HOST, signing_key.clone()),
            production: HostClient::new(http, PRODUCTION_HOST, signing_key),
        })
    }
}

#[async_trait]
impl PushClient for ApnsClient {
    async fn push(&self, notification: Notification) -> Result<PushResponse> {
        let host = if notification.sandbox { &self.sandbox } else { &self.production };
        host.push(&notification).await
    }
}
