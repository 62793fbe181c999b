//! Lokální historické tabulky (`data/ranking_historico.json`).
//!
//! Formát: `{ "2003": [ {row}, ... ], "2004": [...] }`. Lokální hit úplně obchází upstream.

use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Default)]
pub struct HistoricalStandings {
    seasons: HashMap<String, Value>,
}

impl HistoricalStandings {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Missing file is an empty lookup; an unreadable or unparseable one is an error.
    pub async fn load(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("historical standings {:?} not found, local lookup disabled", path);
                return Ok(Self::empty());
            }
            Err(e) => return Err(e),
        };

        let value: Value = serde_json::from_str(&raw)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let lookup = Self::from_value(value)?;
        info!("historical standings loaded: {} seasons from {:?}", lookup.len(), path);
        Ok(lookup)
    }

    pub fn from_value(value: Value) -> io::Result<Self> {
        let Value::Object(map) = value else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "historical standings must be a JSON object keyed by season",
            ));
        };

        let mut seasons = HashMap::with_capacity(map.len());
        for (season, table) in map {
            if table.is_array() {
                seasons.insert(season, table);
            } else {
                warn!("historical season {} is not a table array, skipped", season);
            }
        }
        Ok(Self { seasons })
    }

    pub fn table(&self, season: &str) -> Option<&Value> {
        self.seasons.get(season.trim())
    }

    pub fn len(&self) -> usize {
        self.seasons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seasons.is_empty()
    }
}
