use std::io::{self, Write};
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use url::Url;

use dropbox_team_cli::{
    AppConfig, DropboxAuthError, ListenerConfig, OAuthClient, RedirectListener, TeamClient,
    open_browser,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Dropbox Business API demo");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());
    let config = AppConfig::load(&config_path).with_context(|| {
        format!(
            "failed to load {config_path}; create it with client_id, client_secret, \
             and optionally redirect_uri and scopes"
        )
    })?;

    let client = OAuthClient::new(config.oauth_config())?;
    let flow = client.start_flow()?;
    let wait = Duration::from_secs(config.callback_wait_secs);

    let redirect_uri = Url::parse(client.redirect_uri())?;
    let mut code = match ListenerConfig::from_redirect_uri(&redirect_uri) {
        Some(listener_config) => {
            capture_via_listener(listener_config, &flow.authorization_url, wait).await
        }
        None => {
            info!(
                "redirect URI is not a local address the listener can serve; \
                 automatic callback capture disabled"
            );
            None
        }
    };

    if code.is_none() {
        code = Some(prompt_for_code(&flow.authorization_url)?);
    }

    let code = code.unwrap_or_default();
    if code.is_empty() {
        anyhow::bail!("no authorization code provided");
    }

    let tokens = client.exchange_code(&code).await?;
    info!("token exchange successful");
    if let Some(scope) = &tokens.scope {
        info!("scopes returned: {scope}");
    }
    if let Some(refresh) = &tokens.refresh_token {
        info!("refresh token received ({} chars)", refresh.len());
    }

    let api = TeamClient::new(tokens.access_token.clone())?;
    print_team_info(&api).await;
    print_members(&api).await;
    print_events(&api).await;

    Ok(())
}

/// Attempt automatic capture of the authorization code on a loopback
/// listener. Every failure path logs a one-line diagnostic and returns
/// `None` so the caller falls back to manual entry; the listener is stopped
/// on every exit.
async fn capture_via_listener(
    listener_config: ListenerConfig,
    authorization_url: &str,
    wait: Duration,
) -> Option<String> {
    info!(
        "starting local callback listener on port {} path {}",
        listener_config.port, listener_config.path
    );

    let mut listener = match RedirectListener::bind(listener_config).await {
        Ok(listener) => listener,
        Err(err) => {
            warn!("{err}; falling back to manual code entry");
            return None;
        }
    };
    if let Err(err) = listener.start() {
        warn!("{err}; falling back to manual code entry");
        listener.stop().await;
        return None;
    }

    println!("\nOpening browser for authorization. If it does not open, visit:");
    println!("{authorization_url}");
    if let Err(err) = open_browser(authorization_url) {
        warn!("{err}; please open the URL above manually");
    }

    let outcome = listener.wait_for_outcome(wait).await;
    listener.stop().await;

    match outcome {
        Ok(code) => {
            info!("authorization code received from the browser redirect");
            Some(code)
        }
        Err(DropboxAuthError::Timeout) => {
            warn!(
                "timed out waiting for the authorization callback ({}s)",
                wait.as_secs()
            );
            None
        }
        Err(DropboxAuthError::AuthorizationDenied(reason)) => {
            warn!("authorization denied: {reason}");
            None
        }
        Err(err) => {
            warn!("error while waiting for the authorization code: {err}");
            None
        }
    }
}

/// Manual fallback: print the authorization URL and read the pasted code.
fn prompt_for_code(authorization_url: &str) -> anyhow::Result<String> {
    println!("\nIf the browser flow didn't complete, open this URL in your browser:");
    println!("{authorization_url}");
    println!("\nAfter allowing the app you will be redirected with ?code=<AUTH_CODE>");
    print!("\nPaste the authorization code here: ");
    io::stdout().flush()?;

    let mut code = String::new();
    io::stdin().read_line(&mut code)?;
    Ok(code.trim().to_string())
}

async fn print_team_info(api: &TeamClient) {
    match api.team_info().await {
        Ok(info) => {
            println!("\n===== TEAM / ORGANIZATION INFO =====");
            println!("Team ID: {}", info.team_id);
            println!("Team Name: {}", info.name);
            if let Some(licensed) = info.num_licensed_users {
                println!("Licensed users: {licensed}");
            }
            if let Some(provisioned) = info.num_provisioned_users {
                println!("Provisioned users: {provisioned}");
            }
            if let Some(policies) = &info.policies {
                println!("Policies: {policies}");
            }
            println!("====================================");
        }
        Err(err) => error!("Error fetching team info: {err}"),
    }
}

async fn print_members(api: &TeamClient) {
    match api.list_members(100).await {
        Ok(list) => {
            println!("\n===== TEAM MEMBERS LIST =====");
            for (i, member) in list.members.iter().enumerate() {
                let profile = &member.profile;
                println!("{}. {} ({})", i + 1, profile.email, profile.status.tag);
            }
            println!("Total members returned: {}", list.members.len());
            println!("====================================");
        }
        Err(err) => error!("Error fetching team members: {err}"),
    }
}

async fn print_events(api: &TeamClient) {
    match api.recent_events(20).await {
        Ok(list) => {
            println!("\n===== TEAM EVENTS (Recent 20) =====");
            if list.events.is_empty() {
                println!("No events found.");
            }
            for (i, event) in list.events.iter().enumerate() {
                println!(
                    "{}. [{}] {} - {}",
                    i + 1,
                    event.timestamp,
                    event.event_category.tag,
                    event.event_type.tag
                );
            }
            println!("====================================");
        }
        Err(err) => error!("Error fetching team events: {err}"),
    }
}
