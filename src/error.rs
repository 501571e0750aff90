use thiserror::Error;

/// Error types for Dropbox OAuth authentication and API calls
#[derive(Error, Debug)]
pub enum DropboxAuthError {
    #[error("Failed to bind callback listener: {0}")]
    Bind(String),

    #[error("Callback listener error: {0}")]
    Listener(String),

    #[error("Timed out waiting for the authorization callback")]
    Timeout,

    #[error("Authorization denied by provider: {0}")]
    AuthorizationDenied(String),

    #[error("Internal callback failure: {0}")]
    Internal(String),

    #[error("Invalid authorization code")]
    InvalidAuthorizationCode,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: {status}: {body}")]
    Http { status: u16, body: String },

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Failed to open browser: {0}")]
    BrowserLaunch(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for Dropbox authentication operations
pub type Result<T> = std::result::Result<T, DropboxAuthError>;
