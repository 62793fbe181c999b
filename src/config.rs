use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub api_token:        String,
    pub base_url:         String,
    pub competition:      String,
    pub timeout:          Duration,
    pub http_bind:        SocketAddr,
    pub ws_bind:          SocketAddr,
    pub start_year:       i32,
    pub snapshot_path:    PathBuf,
    pub historical_path:  PathBuf,
    pub poll_interval:    Duration,
    pub log_dir:          PathBuf,
}

impl HubConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, but reads variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_token = lookup("FD_API_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("FD_API_TOKEN is not set")?;

        let text = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());

        let timeout_secs: u64 = parse(&lookup, "FD_TIMEOUT_SECS", 15)?;
        let poll_secs: u64 = parse(&lookup, "LIVE_POLL_INTERVAL_SECS", 20)?;
        if poll_secs == 0 {
            bail!("LIVE_POLL_INTERVAL_SECS must be at least 1");
        }

        Ok(Self {
            api_token,
            base_url:        text("FD_BASE_URL", "https://api.football-data.org/v4"),
            competition:     text("FD_COMPETITION", "BSA"),
            timeout:         Duration::from_secs(timeout_secs),
            http_bind:       parse(&lookup, "HUB_HTTP_BIND", SocketAddr::from(([0, 0, 0, 0], 4000)))?,
            ws_bind:         parse(&lookup, "HUB_WS_BIND", SocketAddr::from(([0, 0, 0, 0], 4001)))?,
            start_year:      parse(&lookup, "RANKING_START_YEAR", 2015)?,
            snapshot_path:   text("RANKING_SNAPSHOT_PATH", "data/ranking_cache.json").into(),
            historical_path: text("HISTORICAL_STANDINGS_PATH", "data/ranking_historico.json").into(),
            poll_interval:   Duration::from_secs(poll_secs),
            log_dir:         text("LOG_DIR", "logs").into(),
        })
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(name) {
        Some(raw) => raw.trim().parse().with_context(|| format!("Invalid {name}: {raw:?}")),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<HubConfig> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        HubConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_only_token_is_set() {
        let cfg = config(&[("FD_API_TOKEN", "abc")]).unwrap();
        assert_eq!(cfg.competition, "BSA");
        assert_eq!(cfg.http_bind.port(), 4000);
        assert_eq!(cfg.ws_bind.port(), 4001);
        assert_eq!(cfg.start_year, 2015);
        assert_eq!(cfg.poll_interval, Duration::from_secs(20));
        assert_eq!(cfg.snapshot_path, PathBuf::from("data/ranking_cache.json"));
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(config(&[]).is_err());
        assert!(config(&[("FD_API_TOKEN", "  ")]).is_err());
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = config(&[("FD_API_TOKEN", "abc"), ("RANKING_START_YEAR", "soon")]).unwrap_err();
        assert!(err.to_string().contains("RANKING_START_YEAR"));
        assert!(config(&[("FD_API_TOKEN", "abc"), ("LIVE_POLL_INTERVAL_SECS", "0")]).is_err());
    }
}
