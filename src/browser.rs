use crate::{DropboxAuthError, Result};

/// Open a URL in the user's default web browser
///
/// This is a convenience function for opening the OAuth authorization URL.
/// Failure here is not fatal: the caller is expected to print the URL so
/// the user can open it manually.
///
/// # Errors
///
/// Returns an error if the browser cannot be launched
pub fn open_browser(url: &str) -> Result<()> {
    webbrowser::open(url)
        .map_err(|e| DropboxAuthError::BrowserLaunch(format!("Failed to open browser: {e}")))
}
