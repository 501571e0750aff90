use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// OAuth token set returned by the Dropbox token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token used to authenticate API requests
    pub access_token: String,
    /// The refresh token used to obtain new access tokens
    ///
    /// Present when the authorization was requested with
    /// `token_access_type=offline`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds) when the access token expires
    pub expires_at: u64,
    /// Space-separated scopes granted by the provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Team ID when the app is a Dropbox Business (team-scoped) app
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    /// Account ID when the token is user-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl TokenSet {
    /// Check if the token is expired or will expire soon (within 5 minutes)
    ///
    /// This includes a 5-minute buffer to prevent race conditions where a token
    /// expires between checking and using it.
    pub fn is_expired(&self) -> bool {
        self.expires_in() <= Duration::from_secs(300)
    }

    /// Get the duration until the token expires
    ///
    /// Returns `Duration::ZERO` if the token is already expired.
    pub fn expires_in(&self) -> Duration {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        if self.expires_at > now {
            Duration::from_secs(self.expires_at - now)
        } else {
            Duration::ZERO
        }
    }
}

/// OAuth authorization flow information
///
/// Contains the authorization URL the user should visit and the CSRF state
/// token embedded in it.
#[derive(Debug, Clone)]
pub struct OAuthFlow {
    /// The URL the user should visit to authorize the application
    pub authorization_url: String,
    /// The CSRF state token for security validation
    pub state: String,
}

/// Configuration for the Dropbox OAuth client
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    /// Dropbox app key
    pub client_id: String,
    /// Dropbox app secret
    pub client_secret: String,
    /// Authorization endpoint URL
    pub auth_url: String,
    /// Token exchange endpoint URL
    pub token_url: String,
    /// Redirect URI for the OAuth callback
    pub redirect_uri: String,
    /// Space-separated scopes (e.g., "team_info.read members.read events.read")
    pub scopes: String,
}

impl OAuthConfig {
    /// Create a config for the given app credentials with Dropbox defaults
    /// for every other field
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            auth_url: "https://www.dropbox.com/oauth2/authorize".to_string(),
            token_url: "https://api.dropboxapi.com/oauth2/token".to_string(),
            redirect_uri: "http://localhost:45678/callback".to_string(),
            scopes: "team_info.read members.read events.read".to_string(),
        }
    }

    /// Override the redirect URI
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = redirect_uri.into();
        self
    }

    /// Override the requested scopes (space-separated)
    pub fn with_scopes(mut self, scopes: impl Into<String>) -> Self {
        self.scopes = scopes.into();
        self
    }

    /// Override the authorization endpoint URL
    pub fn with_auth_url(mut self, auth_url: impl Into<String>) -> Self {
        self.auth_url = auth_url.into();
        self
    }

    /// Override the token exchange endpoint URL
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }
}

/// Token response from the OAuth server
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub scope: Option<String>,
    pub team_id: Option<String>,
    pub account_id: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        let expires_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + response.expires_in.unwrap_or(14400);

        TokenSet {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            scope: response.scope,
            team_id: response.team_id,
            account_id: response.account_id,
        }
    }
}

/// Generate a random state string for CSRF protection
pub(crate) fn generate_random_state() -> String {
    use base64::{Engine as _, engine::general_purpose};
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}
