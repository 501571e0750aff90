use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{RawQuery, State},
    http::{Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::any,
};
use percent_encoding::percent_decode_str;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use url::Url;

use crate::{DropboxAuthError, Result};

const SUCCESS_HTML: &str = "<html><body><h3>Authorization complete</h3>\
<p>You can close this window and return to the application.</p></body></html>";

/// Where the redirect listener binds: a loopback port and the callback path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    pub port: u16,
    pub path: String,
}

impl ListenerConfig {
    /// Create a config, prepending a leading `/` to the path if missing.
    pub fn new(port: u16, path: impl Into<String>) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{path}")
        };
        Self { port, path }
    }

    /// Derive a listener config from a redirect URI.
    ///
    /// Returns `Some` only when the URI targets `localhost` or `127.0.0.1` —
    /// the listener binds `127.0.0.1`, so any other host (including other
    /// loopback addresses like `::1`) would pass consent and then have the
    /// redirect refused. The port defaults to 80 when the URI carries none.
    pub fn from_redirect_uri(redirect_uri: &Url) -> Option<Self> {
        let reachable = match redirect_uri.host() {
            Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
            Some(url::Host::Ipv4(ip)) => ip == std::net::Ipv4Addr::LOCALHOST,
            _ => false,
        };
        if !reachable {
            return None;
        }
        let port = redirect_uri.port().unwrap_or(80);
        Some(Self::new(port, redirect_uri.path()))
    }
}

/// The outcome carried by the browser redirect.
///
/// At most one outcome is ever produced per listener instance; whichever
/// request resolves it first wins and later deliveries are discarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// Authorization succeeded; carries the opaque authorization code.
    Code(String),
    /// The provider reported an error (e.g., `access_denied`).
    Error(String),
    /// The handler failed unexpectedly while processing the request.
    Failure(String),
}

/// Single-assignment slot shared between the request handlers and the waiter.
///
/// Written at most once (first write wins); read idempotently any number of
/// times after resolution.
#[derive(Debug)]
struct RendezvousCell {
    slot: Mutex<Option<CallbackOutcome>>,
    notify: Notify,
}

impl RendezvousCell {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Attempt to resolve the cell. Returns whether this call won the write;
    /// a `false` return means the cell was already resolved and the outcome
    /// was discarded.
    async fn resolve(&self, outcome: CallbackOutcome) -> bool {
        let mut slot = self.slot.lock().await;
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.notify.notify_waiters();
        true
    }

    /// Wait until the cell is resolved. Returns immediately once resolved,
    /// on this call and every later one.
    async fn resolved(&self) -> CallbackOutcome {
        loop {
            // Created before the slot check so a resolution landing between
            // the check and the await still wakes us.
            let notified = self.notify.notified();
            if let Some(outcome) = self.slot.lock().await.clone() {
                return outcome;
            }
            notified.await;
        }
    }
}

/// Short-lived embedded HTTP listener that captures the OAuth redirect.
///
/// Lifecycle: [`RedirectListener::bind`] reserves the port, [`start`] begins
/// accepting requests in the background, [`wait_for_outcome`] blocks the
/// caller until the browser delivers a code (or the timeout elapses), and
/// [`stop`] releases the port. One instance serves exactly one authorization
/// attempt.
///
/// [`start`]: RedirectListener::start
/// [`wait_for_outcome`]: RedirectListener::wait_for_outcome
/// [`stop`]: RedirectListener::stop
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use dropbox_team_cli::{ListenerConfig, RedirectListener};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut listener = RedirectListener::bind(ListenerConfig::new(45678, "/callback")).await?;
/// listener.start()?;
/// // open the authorization URL in a browser...
/// let code = listener.wait_for_outcome(Duration::from_secs(120)).await?;
/// listener.stop().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RedirectListener {
    cell: Arc<RendezvousCell>,
    path: String,
    local_addr: SocketAddr,
    listener: Option<tokio::net::TcpListener>,
    server: Option<JoinHandle<()>>,
}

impl RedirectListener {
    /// Bind the loopback endpoint described by `config`.
    ///
    /// The port is reserved immediately but no requests are accepted until
    /// [`start`](RedirectListener::start) is called. Fails if the port is
    /// already in use.
    pub async fn bind(config: ListenerConfig) -> Result<Self> {
        if config.port == 0 {
            return Err(DropboxAuthError::Bind(
                "callback port must be in 1-65535".to_string(),
            ));
        }
        let addr = format!("127.0.0.1:{}", config.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| DropboxAuthError::Bind(format!("{addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| DropboxAuthError::Bind(e.to_string()))?;
        Ok(Self {
            cell: Arc::new(RendezvousCell::new()),
            path: config.path,
            local_addr,
            listener: Some(listener),
            server: None,
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Begin accepting connections in a background task. Does not block.
    ///
    /// Calling this a second time is an error; a listener serves a single
    /// authorization attempt.
    pub fn start(&mut self) -> Result<()> {
        let listener = self.listener.take().ok_or_else(|| {
            DropboxAuthError::Listener("listener already started".to_string())
        })?;
        // All methods land in the handler, which answers 405 itself for
        // anything but GET (a plain get() route would serve HEAD too).
        let app = Router::new()
            .route(&self.path, any(handle_redirect))
            .with_state(self.cell.clone());

        let server = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!("callback listener terminated: {err}");
            }
        });
        self.server = Some(server);
        Ok(())
    }

    /// Block until the redirect delivers an outcome or `timeout` elapses.
    ///
    /// Returns the authorization code on success. Fails with
    /// [`DropboxAuthError::Timeout`] when nothing arrives in time (the
    /// listener keeps serving, but the caller is expected to fall back),
    /// [`DropboxAuthError::AuthorizationDenied`] when the provider reported
    /// an error, and [`DropboxAuthError::Internal`] when the handler failed.
    /// Calling again after a resolution returns the same value immediately.
    pub async fn wait_for_outcome(&self, timeout: Duration) -> Result<String> {
        match tokio::time::timeout(timeout, self.cell.resolved()).await {
            Ok(CallbackOutcome::Code(code)) => Ok(code),
            Ok(CallbackOutcome::Error(error)) => Err(DropboxAuthError::AuthorizationDenied(error)),
            Ok(CallbackOutcome::Failure(message)) => Err(DropboxAuthError::Internal(message)),
            Err(_) => Err(DropboxAuthError::Timeout),
        }
    }

    /// Stop accepting requests and release the port.
    ///
    /// Waits for the serve task to terminate so the port is free again when
    /// this returns. Safe to call multiple times, and regardless of whether
    /// [`wait_for_outcome`](RedirectListener::wait_for_outcome) ever returned.
    pub async fn stop(&mut self) {
        self.listener = None;
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
    }
}

impl Drop for RedirectListener {
    // Backstop only; the orchestrator calls stop() on every exit path.
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn handle_redirect(
    method: Method,
    State(cell): State<Arc<RendezvousCell>>,
    RawQuery(query): RawQuery,
) -> Response {
    if method != Method::GET {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
    }

    let pairs = match parse_query(query.as_deref().unwrap_or("")) {
        Ok(pairs) => pairs,
        Err(err) => {
            let message = format!("malformed query encoding: {err}");
            cell.resolve(CallbackOutcome::Failure(message)).await;
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response();
        }
    };

    // "code" is checked before "error" when both are present.
    if let Some(code) = first_value(&pairs, "code") {
        cell.resolve(CallbackOutcome::Code(code.to_string())).await;
        return (StatusCode::OK, Html(SUCCESS_HTML)).into_response();
    }

    if let Some(error) = first_value(&pairs, "error") {
        cell.resolve(CallbackOutcome::Error(error.to_string())).await;
        return (
            StatusCode::BAD_REQUEST,
            format!("Authorization error: {error}"),
        )
            .into_response();
    }

    (StatusCode::BAD_REQUEST, "Missing code").into_response()
}

/// Parse a raw query string into ordered key/value pairs.
///
/// Duplicate keys are preserved in arrival order. Keys and values are
/// percent-decoded (with `+` treated as space); a pair without `=` yields an
/// empty value. Fails when a component decodes to invalid UTF-8.
fn parse_query(raw: &str) -> std::result::Result<Vec<(String, String)>, std::str::Utf8Error> {
    let mut pairs = Vec::new();
    for pair in raw.split('&') {
        if pair.is_empty() {
            continue;
        }
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, value),
            None => (pair, ""),
        };
        pairs.push((decode_component(key)?, decode_component(value)?));
    }
    Ok(pairs)
}

fn decode_component(raw: &str) -> std::result::Result<String, std::str::Utf8Error> {
    let unplussed = raw.replace('+', " ");
    Ok(percent_decode_str(&unplussed).decode_utf8()?.into_owned())
}

fn first_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    async fn started(port: u16) -> RedirectListener {
        let mut listener = RedirectListener::bind(ListenerConfig::new(port, "/callback"))
            .await
            .expect("bind");
        listener.start().expect("start");
        listener
    }

    fn callback_url(port: u16, query: &str) -> String {
        format!("http://127.0.0.1:{port}/callback?{query}")
    }

    #[test]
    fn parse_query_percent_decodes_keys_and_values() {
        let pairs = parse_query("code=abc%2Fdef&sta%74e=x%20y").unwrap();
        assert_eq!(
            pairs,
            vec![
                ("code".to_string(), "abc/def".to_string()),
                ("state".to_string(), "x y".to_string()),
            ]
        );
    }

    #[test]
    fn parse_query_preserves_duplicate_keys_in_order() {
        let pairs = parse_query("code=a&other=1&code=b").unwrap();
        assert_eq!(first_value(&pairs, "code"), Some("a"));
        assert_eq!(
            pairs.iter().filter(|(k, _)| k == "code").count(),
            2,
            "later duplicates must be appended, not overwritten"
        );
    }

    #[test]
    fn parse_query_handles_bare_keys_and_plus() {
        let pairs = parse_query("flag&code=a+b").unwrap();
        assert_eq!(pairs[0], ("flag".to_string(), String::new()));
        assert_eq!(pairs[1], ("code".to_string(), "a b".to_string()));
        assert!(parse_query("").unwrap().is_empty());
    }

    #[test]
    fn parse_query_rejects_invalid_utf8() {
        assert!(parse_query("code=%FF%FE").is_err());
    }

    #[tokio::test]
    async fn cell_first_write_wins() {
        let cell = RendezvousCell::new();
        assert!(cell.resolve(CallbackOutcome::Code("first".into())).await);
        assert!(!cell.resolve(CallbackOutcome::Code("second".into())).await);
        assert!(!cell.resolve(CallbackOutcome::Error("late".into())).await);
        assert_eq!(cell.resolved().await, CallbackOutcome::Code("first".into()));
        // Reading again returns the same outcome without re-blocking.
        assert_eq!(cell.resolved().await, CallbackOutcome::Code("first".into()));
    }

    #[tokio::test]
    async fn code_request_resolves_wait() {
        let listener = started(45678).await;

        let response = reqwest::get(callback_url(45678, "code=AUTH123"))
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
        assert!(response.text().await.unwrap().contains("Authorization complete"));

        let code = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code");
        assert_eq!(code, "AUTH123");
    }

    #[tokio::test]
    async fn error_request_resolves_as_denied() {
        let listener = started(45679).await;

        let response = reqwest::get(callback_url(45679, "error=access_denied"))
            .await
            .expect("request");
        assert_eq!(response.status(), 400);

        let err = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            DropboxAuthError::AuthorizationDenied(text) => assert_eq!(text, "access_denied"),
            other => panic!("expected AuthorizationDenied, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn code_takes_precedence_over_error() {
        let listener = started(45680).await;

        let response = reqwest::get(callback_url(45680, "error=access_denied&code=WINNER"))
            .await
            .expect("request");
        assert_eq!(response.status(), 200);

        let code = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code wins the tie-break");
        assert_eq!(code, "WINNER");
    }

    #[tokio::test]
    async fn duplicate_code_uses_first_value() {
        let listener = started(45681).await;

        reqwest::get(callback_url(45681, "code=a&code=b"))
            .await
            .expect("request");

        let code = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code");
        assert_eq!(code, "a");
    }

    #[tokio::test]
    async fn percent_encoded_code_round_trips() {
        let listener = started(45682).await;

        reqwest::get(callback_url(45682, "code=abc%2Fdef"))
            .await
            .expect("request");

        let code = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code");
        assert_eq!(code, "abc/def");
    }

    #[tokio::test]
    async fn wrong_method_gets_405_without_resolving() {
        let listener = started(45683).await;

        let response = reqwest::Client::new()
            .post(callback_url(45683, "code=X"))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 405);

        let err = listener
            .wait_for_outcome(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Timeout));
    }

    #[tokio::test]
    async fn head_request_gets_405_without_resolving() {
        let listener = started(45693).await;

        let response = reqwest::Client::new()
            .head(callback_url(45693, "code=X"))
            .send()
            .await
            .expect("request");
        assert_eq!(response.status(), 405);

        let err = listener
            .wait_for_outcome(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Timeout));
    }

    #[tokio::test]
    async fn missing_code_gets_400_without_resolving() {
        let listener = started(45684).await;

        let response = reqwest::get(callback_url(45684, "state=only"))
            .await
            .expect("request");
        assert_eq!(response.status(), 400);
        assert_eq!(response.text().await.unwrap(), "Missing code");

        let err = listener
            .wait_for_outcome(Duration::from_millis(300))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Timeout));
    }

    #[tokio::test]
    async fn malformed_query_resolves_as_internal_failure() {
        let listener = started(45685).await;

        let response = reqwest::get(callback_url(45685, "code=%FF%FE"))
            .await
            .expect("request");
        assert_eq!(response.status(), 500);

        let err = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Internal(_)));
    }

    #[tokio::test]
    async fn wait_times_out_in_window() {
        let listener = started(45686).await;

        let begin = Instant::now();
        let err = listener
            .wait_for_outcome(Duration::from_secs(2))
            .await
            .unwrap_err();
        let elapsed = begin.elapsed();

        assert!(matches!(err, DropboxAuthError::Timeout));
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_millis(2500), "elapsed: {elapsed:?}");
    }

    #[tokio::test]
    async fn listener_stays_functional_after_timeout() {
        let listener = started(45687).await;

        let err = listener
            .wait_for_outcome(Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Timeout));

        // A late redirect still receives a normal response.
        let response = reqwest::get(callback_url(45687, "code=LATE"))
            .await
            .expect("request");
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn sequenced_deliveries_keep_first_code() {
        let listener = started(45688).await;

        // Arrival order decides the winner, so the first response is awaited
        // fully before the duplicate is sent.
        let first = reqwest::get(callback_url(45688, "code=first"))
            .await
            .expect("request");
        assert_eq!(first.status(), 200);

        let second = reqwest::get(callback_url(45688, "code=second"))
            .await
            .expect("request");
        assert_eq!(second.status(), 200, "losing delivery still gets a success page");

        let code = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code");
        assert_eq!(code, "first");
    }

    #[tokio::test]
    async fn wait_is_idempotent_after_resolution() {
        let listener = started(45689).await;

        reqwest::get(callback_url(45689, "code=ONCE"))
            .await
            .expect("request");

        let first = listener
            .wait_for_outcome(Duration::from_secs(1))
            .await
            .expect("code");
        let begin = Instant::now();
        let second = listener
            .wait_for_outcome(Duration::from_secs(30))
            .await
            .expect("code");
        assert_eq!(first, second);
        assert!(begin.elapsed() < Duration::from_millis(100), "no re-blocking");
    }

    #[tokio::test]
    async fn second_bind_on_same_port_fails() {
        let _listener = RedirectListener::bind(ListenerConfig::new(45690, "/callback"))
            .await
            .expect("first bind");
        let err = RedirectListener::bind(ListenerConfig::new(45690, "/callback"))
            .await
            .unwrap_err();
        assert!(matches!(err, DropboxAuthError::Bind(_)));
    }

    #[tokio::test]
    async fn start_twice_fails_fast() {
        let mut listener = RedirectListener::bind(ListenerConfig::new(45691, "/callback"))
            .await
            .expect("bind");
        listener.start().expect("start");
        assert!(listener.start().is_err());
    }

    #[tokio::test]
    async fn stop_releases_port_and_is_idempotent() {
        let mut listener = started(45692).await;
        listener.stop().await;
        listener.stop().await;

        // Port is free again for a fresh attempt.
        let rebound = RedirectListener::bind(ListenerConfig::new(45692, "/callback")).await;
        assert!(rebound.is_ok());
    }

    #[test]
    fn listener_config_normalizes_path() {
        assert_eq!(ListenerConfig::new(80, "callback").path, "/callback");
        assert_eq!(ListenerConfig::new(80, "/callback").path, "/callback");
    }

    #[test]
    fn from_redirect_uri_accepts_only_loopback() {
        let local = Url::parse("http://localhost:45678/callback").unwrap();
        assert_eq!(
            ListenerConfig::from_redirect_uri(&local),
            Some(ListenerConfig::new(45678, "/callback"))
        );

        let ip = Url::parse("http://127.0.0.1/cb").unwrap();
        assert_eq!(
            ListenerConfig::from_redirect_uri(&ip),
            Some(ListenerConfig::new(80, "/cb"))
        );

        let remote = Url::parse("https://oauth.pstmn.io/v1/callback").unwrap();
        assert_eq!(ListenerConfig::from_redirect_uri(&remote), None);
    }

    #[test]
    fn from_redirect_uri_rejects_hosts_the_listener_cannot_serve() {
        // The listener binds 127.0.0.1 only; these would bind fine and then
        // leave the browser redirect connection-refused.
        let ipv6 = Url::parse("http://[::1]:45699/callback").unwrap();
        assert_eq!(ListenerConfig::from_redirect_uri(&ipv6), None);

        let other_loopback = Url::parse("http://127.0.0.2:45699/callback").unwrap();
        assert_eq!(ListenerConfig::from_redirect_uri(&other_loopback), None);
    }
}
