use std::path::Path;

use serde::Deserialize;

use crate::{DropboxAuthError, OAuthConfig, Result};

fn default_redirect_uri() -> String {
    "http://localhost:45678/callback".to_string()
}

fn default_scopes() -> String {
    "team_info.read members.read events.read".to_string()
}

fn default_callback_wait_secs() -> u64 {
    120
}

/// Application configuration loaded from a TOML file
///
/// ```toml
/// client_id = "your-app-key"
/// client_secret = "your-app-secret"
/// # redirect_uri = "http://localhost:45678/callback"
/// # scopes = "team_info.read members.read events.read"
/// # callback_wait_secs = 120
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Dropbox app key
    pub client_id: String,
    /// Dropbox app secret
    pub client_secret: String,
    /// Redirect URI registered with the app; automatic callback capture is
    /// used only when this targets a loopback address
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    /// Space-separated scopes to request
    #[serde(default = "default_scopes")]
    pub scopes: String,
    /// How long to wait for the browser redirect before falling back to
    /// manual code entry
    #[serde(default = "default_callback_wait_secs")]
    pub callback_wait_secs: u64,
}

impl AppConfig {
    /// Load and validate configuration from `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            DropboxAuthError::InvalidConfig(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: AppConfig = toml::from_str(&raw)
            .map_err(|e| DropboxAuthError::InvalidConfig(format!("{}: {e}", path.display())))?;

        if config.client_id.trim().is_empty() || config.client_secret.trim().is_empty() {
            return Err(DropboxAuthError::InvalidConfig(
                "client_id and client_secret must be set".to_string(),
            ));
        }
        Ok(config)
    }

    /// Build the OAuth client configuration from this file config.
    pub fn oauth_config(&self) -> OAuthConfig {
        OAuthConfig::new(self.client_id.trim(), self.client_secret.trim())
            .with_redirect_uri(self.redirect_uri.trim())
            .with_scopes(self.scopes.trim())
    }
}
