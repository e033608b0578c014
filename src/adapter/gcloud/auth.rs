//! Service-account authentication for the Pub/Sub REST API.
//!
//! Implements the OAuth 2.0 JWT bearer grant: a JWT signed with the
//! service account's RSA key is exchanged at `token_uri` for a short-lived
//! access token, which is cached until shortly before it expires.

use std::path::Path;

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::{log_debug, Result};

const PUBSUB_SCOPE: &str = "https://www.googleapis.com/auth/pubsub";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;

/// Refresh this many seconds before the token actually expires.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// The subset of a service account key file this adapter needs.
#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

pub(super) struct TokenSource {
    client_email: String,
    token_uri: String,
    key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    /// Loads and validates a key file.
    ///
    /// Fails with `Io` if the file cannot be read, `Serialization` if it is
    /// not a service account key, and `Jwt` if the private key is not a
    /// valid RSA PEM.
    pub(super) async fn from_key_file(path: &Path) -> Result<Self> {
        // ---
        let raw = tokio::fs::read_to_string(path).await?;
        let key: ServiceAccountKey = serde_json::from_str(&raw)?;

        Ok(Self {
            key: EncodingKey::from_rsa_pem(key.private_key.as_bytes())?,
            client_email: key.client_email,
            token_uri: key.token_uri.unwrap_or_else(|| DEFAULT_TOKEN_URI.into()),
            cached: Mutex::new(None),
        })
    }

    pub(super) fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Returns a valid access token, fetching a new one when needed.
    pub(super) async fn access_token(&self, http: &Client) -> Result<String> {
        // ---
        let mut cached = self.cached.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.expires_at - EXPIRY_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        let claims = Claims {
            iss: &self.client_email,
            scope: PUBSUB_SCOPE,
            aud: &self.token_uri,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)?;

        let resp: TokenResponse = http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        log_debug!("gcloud: refreshed access token for {}", self.client_email);

        let value = resp.access_token;
        *cached = Some(CachedToken {
            value: value.clone(),
            expires_at: now + resp.expires_in.unwrap_or(TOKEN_LIFETIME_SECS),
        });

        Ok(value)
    }
}
