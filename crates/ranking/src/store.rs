//! Snapshot soubor: jediný trvalý artefakt.
//!
//! Zápis: temp soubor vedle cíle + rename, takže čtenář vidí vždy celý snapshot.

use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::RankingError;
use crate::model::RankingSnapshot;

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "ranking_snapshot".to_string());
        self.path.with_file_name(format!("{name}.tmp"))
    }

    /// `None` when the file is missing or does not parse.
    pub async fn load(&self) -> Result<Option<RankingSnapshot>, RankingError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(RankingError::Persistence(format!(
                    "read {}: {e}",
                    self.path.display()
                )))
            }
        };

        match serde_json::from_str::<RankingSnapshot>(&raw) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(e) => {
                warn!("ranking snapshot {} unparseable, treating as absent: {}", self.path.display(), e);
                Ok(None)
            }
        }
    }

    pub async fn save(&self, snapshot: &RankingSnapshot) -> Result<(), RankingError> {
        let persistence = |what: &str, e: io::Error| {
            RankingError::Persistence(format!("{what} {}: {e}", self.path.display()))
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| persistence("create dir for", e))?;
        }

        let json = serde_json::to_string_pretty(snapshot)
            .map_err(|e| RankingError::Persistence(format!("serialize snapshot: {e}")))?;
        let tmp = self.temp_path();
        tokio::fs::write(&tmp, json).await.map_err(|e| persistence("write temp for", e))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| persistence("replace", e))?;

        debug!("ranking snapshot written: {} clubs → {}", snapshot.ranking.len(), self.path.display());
        Ok(())
    }
}
