//! HTTP klient pro football-data.org v4.
//!
//! Jeden `request` = právě jeden outbound call. Retry politika patří volajícímu.

use async_trait::async_trait;
use logger::{now_iso, ApiStatusEvent, EventLogger};
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::UpstreamError;

// ── Dotaz ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Matches,
    Standings,
}

impl Resource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resource::Matches => "matches",
            Resource::Standings => "standings",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match status values understood by the `status` filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchStatus {
    Scheduled,
    Timed,
    InPlay,
    Paused,
    Finished,
    Postponed,
    Suspended,
    Cancelled,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Scheduled => "SCHEDULED",
            MatchStatus::Timed => "TIMED",
            MatchStatus::InPlay => "IN_PLAY",
            MatchStatus::Paused => "PAUSED",
            MatchStatus::Finished => "FINISHED",
            MatchStatus::Postponed => "POSTPONED",
            MatchStatus::Suspended => "SUSPENDED",
            MatchStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let status = match raw.trim().to_ascii_uppercase().as_str() {
            "SCHEDULED" => MatchStatus::Scheduled,
            "TIMED" => MatchStatus::Timed,
            "IN_PLAY" | "LIVE" => MatchStatus::InPlay,
            "PAUSED" => MatchStatus::Paused,
            "FINISHED" => MatchStatus::Finished,
            "POSTPONED" => MatchStatus::Postponed,
            "SUSPENDED" => MatchStatus::Suspended,
            "CANCELLED" => MatchStatus::Cancelled,
            _ => return None,
        };
        Some(status)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct QueryParams {
    pub season:   Option<i32>,
    pub matchday: Option<u32>,
    pub status:   Option<MatchStatus>,
}

impl QueryParams {
    pub fn season(year: i32) -> Self {
        Self { season: Some(year), ..Self::default() }
    }

    pub fn in_play() -> Self {
        Self { status: Some(MatchStatus::InPlay), ..Self::default() }
    }

    pub fn with_matchday(mut self, matchday: u32) -> Self {
        self.matchday = Some(matchday);
        self
    }

    pub fn is_in_play(&self) -> bool {
        self.status == Some(MatchStatus::InPlay)
    }

    /// Set parameters only, sorted by name.
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(3);
        if let Some(md) = self.matchday {
            pairs.push(("matchday", md.to_string()));
        }
        if let Some(season) = self.season {
            pairs.push(("season", season.to_string()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.as_str().to_string()));
        }
        pairs
    }
}

// ── Upstream seam ────────────────────────────────────────────────────────────

#[async_trait]
pub trait Upstream: Send + Sync {
    async fn request(&self, resource: Resource, params: &QueryParams) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url:    String,
    pub token:       String,
    pub competition: String,
    pub timeout:     Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url:    "https://api.football-data.org/v4".to_string(),
            token:       String::new(),
            competition: "BSA".to_string(), // Brasileirão Série A
            timeout:     Duration::from_secs(15),
        }
    }
}

pub struct FootballDataClient {
    client: reqwest::Client,
    config: ClientConfig,
    logger: Option<Arc<EventLogger>>,
}

impl FootballDataClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("PlacarLive/0.1")
                .timeout(config.timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            config,
            logger: None,
        }
    }

    pub fn with_event_log(mut self, logger: Arc<EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    fn url(&self, resource: Resource) -> String {
        format!(
            "{}/competitions/{}/{}",
            self.config.base_url.trim_end_matches('/'),
            self.config.competition,
            resource
        )
    }

    fn log_status(&self, resource: Resource, ok: bool, status_code: Option<u16>, message: &str) {
        if let Some(logger) = &self.logger {
            let _ = logger.log(&ApiStatusEvent {
                ts: now_iso(),
                event: "API_STATUS",
                source: "football-data".to_string(),
                scope: resource.to_string(),
                ok,
                status_code,
                message: message.to_string(),
            });
        }
    }
}

#[async_trait]
impl Upstream for FootballDataClient {
    async fn request(&self, resource: Resource, params: &QueryParams) -> Result<Value, UpstreamError> {
        let url = self.url(resource);
        debug!("GET {} {:?}", url, params.pairs());

        let resp = match self
            .client
            .get(&url)
            .header("X-Auth-Token", &self.config.token)
            .query(&params.pairs())
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("football-data {} request failed: {}", resource, e);
                self.log_status(resource, false, None, &e.to_string());
                return Err(UpstreamError::Unavailable(format!("{resource} request failed: {e}")));
            }
        };

        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            warn!("football-data {} rate limited", resource);
            self.log_status(resource, false, Some(status.as_u16()), "rate_limited");
            return Err(UpstreamError::RateLimited);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            warn!("football-data {} HTTP {}: {}", resource, status, snippet);
            self.log_status(resource, false, Some(status.as_u16()), &snippet);
            return Err(UpstreamError::Unavailable(format!("HTTP {status}: {snippet}")));
        }

        let raw = resp
            .text()
            .await
            .map_err(|e| UpstreamError::Unavailable(format!("{resource} body read failed: {e}")))?;

        let value: Value = match serde_json::from_str(&raw) {
            Ok(v) => v,
            Err(e) => {
                self.log_status(resource, false, Some(status.as_u16()), "invalid_json");
                return Err(UpstreamError::Malformed(format!("{resource}: {e}")));
            }
        };
        if !value.is_object() {
            self.log_status(resource, false, Some(status.as_u16()), "not_an_object");
            return Err(UpstreamError::Malformed(format!("{resource}: expected a JSON object")));
        }

        self.log_status(resource, true, Some(status.as_u16()), "ok");
        Ok(value)
    }
}
