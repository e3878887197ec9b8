use anyhow::{anyhow, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

const IDENTITY_URL: &str = "https://identitytoolkit.googleapis.com/v1/accounts";
const TOKEN_URL: &str = "https://securetoken.googleapis.com/v1/token";

#[derive(Debug, Deserialize)]
struct RefreshTokenResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
}

#[derive(Debug, Clone)]
struct CachedToken {
    id_token: String,
    expires_at: chrono::DateTime<chrono::Utc>,
}

/// Firebase email/password session with cached ID tokens.
#[derive(Clone)]
pub struct FirebaseAuth {
    client: Client,
    api_key: String,
    refresh_token: Arc<Mutex<String>>,
    cached_token: Arc<Mutex<Option<CachedToken>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInResponse {
    id_token: String,
    refresh_token: String,
    expires_in: String,
    local_id: String,
    #[serde(default)]
    email: Option<String>,
}

/// Identity of a freshly signed-in or signed-up account.
#[derive(Debug, Clone)]
pub struct Account {
    pub uid: String,
    pub email: Option<String>,
}

impl FirebaseAuth {
    /// Resume a session from a stored refresh token.
    pub fn new(api_key: &str, refresh_token: String) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            refresh_token: Arc::new(Mutex::new(refresh_token)),
            cached_token: Arc::new(Mutex::new(None)),
        }
    }

    fn session(client: Client, api_key: &str, resp: SignInResponse) -> (Self, Account) {
        let expires_in: i64 = resp.expires_in.parse().unwrap_or(3600);
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expires_in);
        let auth = Self {
            client,
            api_key: api_key.to_string(),
            refresh_token: Arc::new(Mutex::new(resp.refresh_token)),
            cached_token: Arc::new(Mutex::new(Some(CachedToken {
                id_token: resp.id_token,
                expires_at,
            }))),
        };
        let account = Account {
            uid: resp.local_id,
            email: resp.email,
        };
        (auth, account)
    }

    async fn accounts_call(
        client: &Client,
        api_key: &str,
        action: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = format!("{}:{}?key={}", IDENTITY_URL, action, api_key);
        debug!(action, "identity toolkit request");
        let resp = client.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("{} failed: {} - {}", action, status, body));
        }
        Ok(resp)
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_email(
        api_key: &str,
        email: &str,
        password: &str,
    ) -> Result<(Self, Account)> {
        let client = Client::new();
        let resp = Self::accounts_call(
            &client,
            api_key,
            "signInWithPassword",
            serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true
            }),
        )
        .await?;

        let sign_in: SignInResponse = resp.json().await?;
        info!(uid = %sign_in.local_id, "signed in");
        Ok(Self::session(client, api_key, sign_in))
    }

    /// Create an account, set its display name and send a verification email.
    pub async fn sign_up_with_email(
        api_key: &str,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<(Self, Account)> {
        let client = Client::new();
        let resp = Self::accounts_call(
            &client,
            api_key,
            "signUp",
            serde_json::json!({
                "email": email,
                "password": password,
                "returnSecureToken": true
            }),
        )
        .await?;
        let sign_up: SignInResponse = resp.json().await?;
        let (auth, account) = Self::session(client, api_key, sign_up);

        let id_token = auth.get_id_token().await?;
        Self::accounts_call(
            &auth.client,
            api_key,
            "update",
            serde_json::json!({
                "idToken": id_token,
                "displayName": display_name,
                "returnSecureToken": false
            }),
        )
        .await?;
        Self::accounts_call(
            &auth.client,
            api_key,
            "sendOobCode",
            serde_json::json!({
                "requestType": "VERIFY_EMAIL",
                "idToken": id_token
            }),
        )
        .await?;

        info!(uid = %account.uid, "account created");
        Ok((auth, account))
    }

    /// Email a password reset link. Needs no session.
    pub async fn send_password_reset(api_key: &str, email: &str) -> Result<()> {
        Self::accounts_call(
            &Client::new(),
            api_key,
            "sendOobCode",
            serde_json::json!({
                "requestType": "PASSWORD_RESET",
                "email": email
            }),
        )
        .await?;
        Ok(())
    }

    pub async fn refresh_token(&self) -> String {
        self.refresh_token.lock().await.clone()
    }

    pub async fn get_id_token(&self) -> Result<String> {
        // Check if we have a valid cached token (with 60s margin)
        {
            let cached = self.cached_token.lock().await;
            if let Some(ref token) = *cached {
                if token.expires_at > chrono::Utc::now() + chrono::Duration::seconds(60) {
                    return Ok(token.id_token.clone());
                }
            }
        }

        self.refresh_id_token().await
    }

    async fn refresh_id_token(&self) -> Result<String> {
        let refresh_token = self.refresh_token.lock().await.clone();

        let url = format!("{}?key={}", TOKEN_URL, self.api_key);

        let resp = self
            .client
            .post(&url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", &refresh_token),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Failed to refresh token: {} - {}", status, body));
        }

        let token_resp: RefreshTokenResponse = resp.json().await?;

        let expires_in: i64 = token_resp.expires_in.parse().unwrap_or(3600);
        let expires_at = chrono::Utc::now() + chrono::Duration::seconds(expires_in);

        // Update refresh token if it changed
        *self.refresh_token.lock().await = token_resp.refresh_token;

        // Cache the new ID token
        let id_token = token_resp.id_token.clone();
        *self.cached_token.lock().await = Some(CachedToken {
            id_token: token_resp.id_token,
            expires_at,
        });
        debug!("refreshed id token");

        Ok(id_token)
    }

    pub async fn get_user_id(&self) -> Result<String> {
        let token = self.get_id_token().await?;
        user_id_from_token(&token)
    }
}

/// The `user_id` (or `sub`) claim of a Firebase ID token.
pub fn user_id_from_token(token: &str) -> Result<String> {
    // Decode the JWT payload (middle part) to get the user ID
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(anyhow!("Invalid JWT format"));
    }

    let payload = parts[1].trim_end_matches('=');
    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| anyhow!("Invalid JWT payload: {}", e))?;
    let claims: serde_json::Value = serde_json::from_slice(&decoded)?;
    claims["user_id"]
        .as_str()
        .or_else(|| claims["sub"].as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("No user_id or sub claim in token"))
}
