use chrono::{DateTime, Utc};
use football_api::query::select_table;
use football_api::UpstreamError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::warn;

// ── Upstream řádek tabulky ───────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct TeamRef {
    pub name:  String,
    #[serde(default)]
    pub crest: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StandingRow {
    pub position:      u32,
    pub team:          TeamRef,
    #[serde(default)]
    pub played_games:  i64,
    #[serde(default)]
    pub won:           i64,
    #[serde(default)]
    pub draw:          i64,
    #[serde(default)]
    pub lost:          i64,
    #[serde(default)]
    pub points:        i64,
    #[serde(default)]
    pub goals_for:     i64,
    #[serde(default)]
    pub goals_against: i64,
}

/// Rows of the `TOTAL` table; a payload without one is an empty season.
pub fn parse_total_table(payload: &Value) -> Result<Vec<StandingRow>, UpstreamError> {
    let table = select_table(payload, "TOTAL")?;
    serde_json::from_value(table).map_err(|e| UpstreamError::Malformed(format!("TOTAL table row: {e}")))
}

// ── Agregát ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonResult {
    pub points:   i64,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClubAggregate {
    pub name:            String,
    pub crest_url:       String,
    pub points:          i64,
    pub played:          i64,
    pub won:             i64,
    pub drawn:           i64,
    pub lost:            i64,
    pub goals_for:       i64,
    pub goals_against:   i64,
    pub goal_difference: i64,
    pub win_rate:        f64,
    pub per_season:      BTreeMap<i32, SeasonResult>,
}

impl ClubAggregate {
    fn new(name: &str) -> Self {
        Self {
            name:            name.to_string(),
            crest_url:       String::new(),
            points:          0,
            played:          0,
            won:             0,
            drawn:           0,
            lost:            0,
            goals_for:       0,
            goals_against:   0,
            goal_difference: 0,
            win_rate:        0.0,
            per_season:      BTreeMap::new(),
        }
    }

    fn absorb(&mut self, season: i32, row: &StandingRow) {
        if self.crest_url.is_empty() {
            if let Some(crest) = &row.team.crest {
                self.crest_url = crest.clone();
            }
        }
        self.points        += row.points;
        self.played        += row.played_games;
        self.won           += row.won;
        self.drawn         += row.draw;
        self.lost          += row.lost;
        self.goals_for     += row.goals_for;
        self.goals_against += row.goals_against;
        self.per_season.insert(season, SeasonResult { points: row.points, position: row.position });
    }

    fn finalize(&mut self) {
        self.goal_difference = self.goals_for - self.goals_against;
        self.win_rate = if self.played > 0 {
            self.points as f64 / (self.played * 3) as f64 * 100.0
        } else {
            0.0
        };
    }
}

/// Folds season tables by club display name, first-seen order preserved.
#[derive(Debug, Default)]
pub struct RankingBuilder {
    clubs: Vec<ClubAggregate>,
    index: HashMap<String, usize>,
}

impl RankingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold_season(&mut self, season: i32, rows: &[StandingRow]) {
        for row in rows {
            let idx = match self.index.get(&row.team.name) {
                Some(&idx) => idx,
                None => {
                    self.clubs.push(ClubAggregate::new(&row.team.name));
                    self.index.insert(row.team.name.clone(), self.clubs.len() - 1);
                    self.clubs.len() - 1
                }
            };
            self.clubs[idx].absorb(season, row);
        }
    }

    pub fn club_count(&self) -> usize {
        self.clubs.len()
    }

    /// Derived fields computed once, then sorted by total points (stable).
    pub fn finish(self) -> Vec<ClubAggregate> {
        let mut ranking = self.clubs;
        for club in &mut ranking {
            club.finalize();
        }
        ranking.sort_by(|a, b| b.points.cmp(&a.points));
        ranking
    }
}

// ── Snapshot ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSnapshot {
    pub generated_at: DateTime<Utc>,
    pub ranking:      Vec<ClubAggregate>,
}

impl RankingSnapshot {
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        match (now - self.generated_at).to_std() {
            Ok(age) => age >= max_age,
            // generated_at v budoucnosti (skew / ručně upravený soubor) → přepočítat
            Err(_) => {
                warn!("ranking snapshot generated_at {} is in the future, treating as stale", self.generated_at);
                true
            }
        }
    }
}
