use std::time::Duration;

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::{app_state::AppError, kv::KvCache, user_config::RdOauthConfig};

const TOKEN_URL: &str = "https://api.real-debrid.com/oauth/v2/token";
const DEVICE_GRANT: &str = "http://oauth.net/grant_type/device/1.0";
/// Used when the token response does not say how long the token lives.
const FALLBACK_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// Lazy RealDebrid access-token refresher. Tokens are cached in the KV store
/// keyed by the credential triple, so every worker process shares one token
/// per user instead of hammering the oauth endpoint.
#[derive(Debug)]
pub struct RdTokenManager {
    kv: KvCache,
    oauth: RdOauthConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl RdTokenManager {
    pub fn new(kv: KvCache, oauth: RdOauthConfig) -> Self {
        Self {
            kv,
            oauth,
            http: reqwest::Client::new(),
        }
    }

    fn token_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(format!(
            "{}|{}|{}",
            self.oauth.client_id, self.oauth.client_secret, self.oauth.refresh_token
        ));
        format!("rd_access_token:{}", hex_digest(&hasher.finalize()))
    }

    pub async fn access_token(&self) -> Result<String, AppError> {
        let key = self.token_key();
        if let Some(token) = self.kv.get_string(&key).await {
            return Ok(token);
        }
        tracing::info!("No cached RealDebrid access token, refreshing");
        self.refresh(&key).await
    }

    async fn refresh(&self, key: &str) -> Result<String, AppError> {
        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("client_id", self.oauth.client_id.as_str()),
                ("client_secret", self.oauth.client_secret.as_str()),
                ("code", self.oauth.refresh_token.as_str()),
                ("grant_type", DEVICE_GRANT),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(AppError::unauthorized(format!(
                "RealDebrid token refresh failed with {}",
                response.status()
            )));
        }
        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::internal_error(format!("bad token response: {e}")))?;
        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(FALLBACK_TTL);
        self.kv
            .set_string(key, &token.access_token, Some(ttl))
            .await;
        Ok(token.access_token)
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::new(), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}
