use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use url::Url;

use crate::error::{HubError, HubResult};

/// A bearer token with its expiry, as returned by a token endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: i64,
}

#[derive(Debug)]
struct Tokens {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

/// Authenticated upstream session shared by adapters that speak
/// token-bearing HTTP.
///
/// Every request checks whether the access token expires within the skew
/// window and refreshes it first via the refresh-token grant. A failed
/// refresh surfaces `Unauthenticated`; the owning adapter is expected to
/// drop to error state and fail in-flight requests.
pub struct AuthSession {
    http: reqwest::Client,
    base_url: Url,
    token_path: String,
    tokens: Mutex<Option<Tokens>>,
}

impl AuthSession {
    /// Refresh this long before the nominal expiry.
    pub const EXPIRY_SKEW: Duration = Duration::minutes(5);

    #[must_use]
    pub fn new(base_url: Url, token_path: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            token_path: token_path.into(),
            tokens: Mutex::new(None),
        }
    }

    /// Seed the session with a token obtained out of band (config file,
    /// pairing flow).
    pub async fn install_grant(&self, grant: TokenGrant) {
        let mut tokens = self.tokens.lock().await;
        *tokens = Some(Tokens {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        });
    }

    pub async fn has_token(&self) -> bool {
        self.tokens.lock().await.is_some()
    }

    /// Current access token, refreshed first if it expires within the
    /// skew window.
    pub async fn token(&self) -> HubResult<String> {
        let mut tokens = self.tokens.lock().await;
        let current = tokens.as_ref().ok_or(HubError::Unauthenticated)?;

        if Utc::now() + Self::EXPIRY_SKEW <= current.expires_at {
            return Ok(current.access_token.clone());
        }

        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(HubError::Unauthenticated)?;

        log::debug!("Access token within expiry skew, refreshing..");
        let grant = self.refresh(&refresh_token).await.map_err(|err| {
            log::error!("Token refresh failed: {err}");
            *tokens = None;
            HubError::Unauthenticated
        })?;

        let access_token = grant.access_token.clone();
        *tokens = Some(Tokens {
            access_token: grant.access_token,
            // upstreams may rotate the refresh token; keep the old one if not
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
            expires_at: Utc::now() + Duration::seconds(grant.expires_in),
        });
        Ok(access_token)
    }

    async fn refresh(&self, refresh_token: &str) -> HubResult<TokenGrant> {
        let url = self.base_url.join(&self.token_path)?;
        let response = self
            .http
            .post(url)
            .json(&serde_json::json!({
                "grant_type": "refresh_token",
                "refresh_token": refresh_token,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HubError::Upstream {
                status: response.status().as_u16(),
                message: "token refresh rejected".to_string(),
            });
        }

        Ok(response.json().await?)
    }

    /// GET a JSON resource with the bearer token attached.
    pub async fn get_json(&self, path: &str) -> HubResult<Value> {
        let token = self.token().await?;
        let url = self.base_url.join(path)?;
        let response = self.http.get(url).bearer_auth(token).send().await?;
        Self::check_status(&response)?;
        Ok(response.json().await?)
    }

    /// POST a JSON payload with the bearer token attached.
    pub async fn post_json(&self, path: &str, body: &Value) -> HubResult<Value> {
        let token = self.token().await?;
        let url = self.base_url.join(path)?;
        let response = self.http.post(url).bearer_auth(token).json(body).send().await?;
        Self::check_status(&response)?;
        Ok(response.json().await?)
    }

    fn check_status(response: &reqwest::Response) -> HubResult<()> {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(HubError::Unauthenticated);
        }
        if !status.is_success() {
            return Err(HubError::Upstream {
                status: status.as_u16(),
                message: status.to_string(),
            });
        }
        Ok(())
    }
}
