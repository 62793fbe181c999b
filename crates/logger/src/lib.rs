/// PlacarLive: Logger
/// JSONL event stream (jeden soubor na den)

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!("event log dir {:?} not created: {}", dir, e);
        }
        Self { log_dir: dir }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event typy ────────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct ApiStatusEvent {
    pub ts:          String,
    pub event:       &'static str,   // "API_STATUS"
    pub source:      String,         // "football-data"
    pub scope:       String,         // "standings" | "matches" | "season_table"
    pub ok:          bool,
    pub status_code: Option<u16>,
    pub message:     String,
}

#[derive(Serialize, Debug)]
pub struct SeasonFetchEvent {
    pub ts:         String,
    pub event:      &'static str,    // "SEASON_FETCH"
    pub season:     i32,
    pub attempt:    u32,
    pub ok:         bool,
    pub error:      Option<String>,
    pub backoff_ms: u64,             // 0 = bez čekání
}

#[derive(Serialize, Debug)]
pub struct RankingRefreshEvent {
    pub ts:             String,
    pub event:          &'static str, // "RANKING_REFRESH"
    pub forced:         bool,
    pub seasons_ok:     Vec<i32>,
    pub seasons_failed: Vec<i32>,
    pub clubs:          usize,
    pub duration_ms:    u64,
}

#[derive(Serialize, Debug)]
pub struct LivePollEvent {
    pub ts:          String,
    pub event:       &'static str,   // "LIVE_POLL"
    pub ok:          bool,
    pub subscribers: usize,
    pub matches:     usize,
    pub delivered:   usize,
    pub message:     String,
}

#[derive(Serialize, Debug)]
pub struct HubHeartbeatEvent {
    pub ts:            String,
    pub event:         &'static str, // "HUB_HEARTBEAT"
    pub subscribers:   usize,
    pub polling:       bool,
    pub cache_entries: usize,
}
