use url::Url;

use crate::types::TokenResponse;
use crate::{DropboxAuthError, OAuthConfig, OAuthFlow, Result, TokenSet};

/// Dropbox OAuth 2.0 client for the authorization-code flow
///
/// Builds the authorization URL, exchanges the authorization code for
/// tokens, and refreshes expired access tokens. Dropbox app credentials are
/// sent via HTTP basic auth on the token endpoint.
///
/// # Example
///
/// ```no_run
/// use dropbox_team_cli::{OAuthClient, OAuthConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = OAuthClient::new(OAuthConfig::new("app-key", "app-secret"))?;
/// let flow = client.start_flow()?;
///
/// println!("Visit: {}", flow.authorization_url);
/// // User authorizes and you get the code...
///
/// let tokens = client.exchange_code("code").await?;
/// println!("Got tokens!");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct OAuthClient {
    config: OAuthConfig,
    http: reqwest::Client,
}

impl OAuthClient {
    /// Create a new OAuth client with the given configuration
    pub fn new(config: OAuthConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
            return Err(DropboxAuthError::InvalidConfig(
                "client_id and client_secret must be set".to_string(),
            ));
        }
        Ok(Self {
            config,
            http: reqwest::Client::new(),
        })
    }

    /// The redirect URI this client was configured with.
    pub fn redirect_uri(&self) -> &str {
        &self.config.redirect_uri
    }

    /// Start the OAuth authorization flow
    ///
    /// Generates a random CSRF state and builds the authorization URL the
    /// user should visit to grant consent. `token_access_type=offline`
    /// requests a refresh token alongside the access token.
    pub fn start_flow(&self) -> Result<OAuthFlow> {
        let state = crate::types::generate_random_state();

        let mut url = Url::parse(&self.config.auth_url)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("token_access_type", "offline");
            if !self.config.scopes.trim().is_empty() {
                query.append_pair("scope", &self.config.scopes);
            }
            query.append_pair("state", &state);
        }

        Ok(OAuthFlow {
            authorization_url: url.to_string(),
            state,
        })
    }

    /// Exchange an authorization code for access and refresh tokens
    ///
    /// # Errors
    ///
    /// Returns an error if the code is empty, the request fails, or the
    /// token endpoint responds with a non-success status.
    pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
        if code.trim().is_empty() {
            return Err(DropboxAuthError::InvalidAuthorizationCode);
        }

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", &self.config.redirect_uri),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DropboxAuthError::Http { status, body });
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(TokenSet::from(token_response))
    }

    /// Refresh an expired access token
    ///
    /// Uses the refresh token from a previous exchange to obtain a new
    /// access token without sending the user back through consent.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DropboxAuthError::Http { status, body });
        }

        let token_response: TokenResponse = response.json().await?;
        Ok(TokenSet::from(token_response))
    }
}
