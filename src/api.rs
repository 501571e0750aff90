use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use url::Url;

use crate::{DropboxAuthError, Result};

const DEFAULT_BASE_URL: &str = "https://api.dropboxapi.com/";

/// A Dropbox union value, e.g. `{".tag": "active"}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Tagged {
    #[serde(rename = ".tag")]
    pub tag: String,
}

/// Response of `POST /2/team/get_info`.
#[derive(Debug, Deserialize)]
pub struct TeamInfo {
    pub team_id: String,
    pub name: String,
    #[serde(default)]
    pub num_licensed_users: Option<u64>,
    #[serde(default)]
    pub num_provisioned_users: Option<u64>,
    /// Team policies (sharing, EMM state, ...) as returned by the API.
    #[serde(default)]
    pub policies: Option<serde_json::Value>,
}

/// Response of `POST /2/team/members/list`.
#[derive(Debug, Deserialize)]
pub struct MemberList {
    pub members: Vec<TeamMember>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TeamMember {
    pub profile: MemberProfile,
}

#[derive(Debug, Deserialize)]
pub struct MemberProfile {
    pub team_member_id: String,
    pub email: String,
    pub status: Tagged,
    #[serde(default)]
    pub name: Option<MemberName>,
}

#[derive(Debug, Deserialize)]
pub struct MemberName {
    pub display_name: String,
}

/// Response of `POST /2/team_log/get_events`.
#[derive(Debug, Deserialize)]
pub struct EventList {
    pub events: Vec<TeamEvent>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TeamEvent {
    pub timestamp: String,
    pub event_category: Tagged,
    pub event_type: Tagged,
}

/// Bearer-authenticated client for the Dropbox Business endpoints
///
/// Wraps the three team endpoints this demo prints: team info, member list,
/// and the recent audit events.
#[derive(Debug)]
pub struct TeamClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
}

impl TeamClient {
    /// Create a client against the production Dropbox API.
    pub fn new(access_token: impl Into<String>) -> Result<Self> {
        let base_url = Url::parse(DEFAULT_BASE_URL)?;
        Self::with_base_url(access_token, base_url)
    }

    /// Create a client against a custom base URL (used by tests).
    pub fn with_base_url(access_token: impl Into<String>, base_url: Url) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            access_token: access_token.into(),
        })
    }

    /// Fetch team/organization info (`/2/team/get_info`).
    pub async fn team_info(&self) -> Result<TeamInfo> {
        self.post_json("2/team/get_info", None).await
    }

    /// List team members (`/2/team/members/list`).
    pub async fn list_members(&self, limit: u32) -> Result<MemberList> {
        self.post_json("2/team/members/list", Some(json!({ "limit": limit })))
            .await
    }

    /// Fetch recent team audit events (`/2/team_log/get_events`).
    pub async fn recent_events(&self, limit: u32) -> Result<EventList> {
        self.post_json("2/team_log/get_events", Some(json!({ "limit": limit })))
            .await
    }

    /// POST an optional JSON body with the bearer token and decode the
    /// JSON response. Non-2xx statuses become [`DropboxAuthError::Http`].
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<T> {
        let url = self.base_url.join(path)?;
        let mut request = self.http.post(url).bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(DropboxAuthError::Http { status, body });
        }

        Ok(response.json().await?)
    }
}
