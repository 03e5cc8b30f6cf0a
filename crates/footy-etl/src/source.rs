//! Remote resource access
//!
//! [`ResourceFetcher`] is the seam between the pipeline and the open-data
//! API. A non-success HTTP status is logged and reported as an empty payload
//! so a single missing resource never aborts a batch; transport failures are
//! returned as errors and handled per key by the caller.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::ApiConfig;
use crate::error::{EtlError, Result};
use crate::models::{CompetitionSeason, MatchId};
use crate::snapshot::Entity;

/// Fetches one JSON resource and returns its records.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// An empty `Vec` means "no data for this key".
    async fn fetch(&self, url: &str) -> Result<Vec<Value>>;
}

/// HTTP basic-auth credentials for the non-public feed.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl Credentials {
    pub fn from_config(config: &ApiConfig) -> Option<Self> {
        match (&config.username, &config.password) {
            (Some(username), Some(password)) => Some(Self {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }
}

/// URL templates of the open-data API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base_url: String,
}

impl Endpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn competitions(&self) -> String {
        format!("{}/competitions.json", self.base_url)
    }

    pub fn matches(&self, season: CompetitionSeason) -> String {
        format!(
            "{}/matches/{}/{}.json",
            self.base_url, season.competition_id, season.season_id
        )
    }

    /// URL of a per-match resource; `None` for entities not keyed by match.
    pub fn match_resource(&self, entity: Entity, match_id: MatchId) -> Option<String> {
        let folder = match entity {
            Entity::Lineups => "lineups",
            Entity::Events => "events",
            Entity::Frames => "three-sixty",
            Entity::Competitions | Entity::Matches => return None,
        };
        Some(format!("{}/{folder}/{match_id}.json", self.base_url))
    }
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: Client,
    credentials: Option<Credentials>,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, credentials: Option<Credentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("footy-etl/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            credentials,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(config.timeout_secs, Credentials::from_config(config))
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<Value>> {
        let mut request = self.client.get(url);
        if let Some(creds) = &self.credentials {
            request = request.basic_auth(&creds.username, Some(&creds.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            warn!(url, status = status.as_u16(), "Resource unavailable");
            return Ok(Vec::new());
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| EtlError::fetch(url, format!("invalid JSON body: {e}")))?;
        let records = into_records(body);
        debug!(url, records = records.len(), "Fetched resource");
        Ok(records)
    }
}

/// Payloads are arrays of records; a bare object counts as one record.
pub fn into_records(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}
