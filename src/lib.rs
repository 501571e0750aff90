//! # dropbox-team-cli
//!
//! A Dropbox Business OAuth 2.0 demo client with automatic local callback
//! capture.
//!
//! The crate performs the authorization-code flow against Dropbox, captures
//! the browser redirect on an embedded loopback HTTP listener, exchanges the
//! code for tokens, and calls a handful of team endpoints (team info, member
//! list, recent audit events).
//!
//! ## Features
//!
//! - **Redirect capture**: Short-lived loopback listener with
//!   first-write-wins rendezvous and a bounded wait
//! - **Timeout/fallback policy**: Automatic capture falls back to manual
//!   code entry on bind failure, timeout, or denial
//! - **Offline access**: `token_access_type=offline` requests a refresh token
//! - **Browser integration**: Auto-open browser for authorization
//! - **Typed API layer**: serde models for the three team endpoints
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use dropbox_team_cli::{
//!     ListenerConfig, OAuthClient, OAuthConfig, RedirectListener, open_browser,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = OAuthClient::new(OAuthConfig::new("app-key", "app-secret"))?;
//!     let flow = client.start_flow()?;
//!
//!     let mut listener =
//!         RedirectListener::bind(ListenerConfig::new(45678, "/callback")).await?;
//!     listener.start()?;
//!     open_browser(&flow.authorization_url)?;
//!
//!     let code = listener.wait_for_outcome(Duration::from_secs(120)).await?;
//!     listener.stop().await;
//!
//!     let tokens = client.exchange_code(&code).await?;
//!     println!("Got tokens for team {:?}", tokens.team_id);
//!     Ok(())
//! }
//! ```

mod api;
mod browser;
mod client;
mod config;
mod error;
mod server;
mod types;

// Public API exports
pub use api::{
    EventList, MemberList, MemberName, MemberProfile, Tagged, TeamClient, TeamEvent, TeamInfo,
    TeamMember,
};
pub use browser::open_browser;
pub use client::OAuthClient;
pub use config::AppConfig;
pub use error::{DropboxAuthError, Result};
pub use server::{CallbackOutcome, ListenerConfig, RedirectListener};
pub use types::{OAuthConfig, OAuthFlow, TokenSet};
