use async_trait::async_trait;
use chrono::{Datelike, DateTime, Utc};
use football_api::{QueryParams, Resource, Upstream};
use logger::{now_iso, EventLogger, RankingRefreshEvent, SeasonFetchEvent};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::RankingError;
use crate::model::{parse_total_table, RankingBuilder, RankingSnapshot, StandingRow};
use crate::store::SnapshotStore;

// ── Konfigurace ──────────────────────────────────────────────────────────────

/// Čekání mezi pokusy, injektované kvůli testům.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Linear backoff: after failed attempt `n` wait `base_delay * n`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay:   Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay:   Duration::from_millis(5000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub start_year: i32,
    /// `None` = aktuální rok (UTC)
    pub end_year:   Option<i32>,
    pub max_age:    Duration,
    pub retry:      RetryPolicy,
}

impl AggregatorConfig {
    pub fn seasons(&self) -> RangeInclusive<i32> {
        let end = self.end_year.unwrap_or_else(|| Utc::now().year());
        self.start_year..=end
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            start_year: 2015,
            end_year:   None,
            max_age:    Duration::from_secs(24 * 3600),
            retry:      RetryPolicy::default(),
        }
    }
}

// ── Výsledek běhu ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct RebuildSummary {
    pub generated_at:   DateTime<Utc>,
    pub seasons_ok:     Vec<i32>,
    pub seasons_failed: Vec<i32>,
    pub clubs:          usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Jiný běh právě probíhá; tento nic neudělal.
    InFlight,
    UpToDate,
    Rebuilt(RebuildSummary),
}

// ── Aggregator ───────────────────────────────────────────────────────────────

pub struct RankingAggregator {
    upstream: Arc<dyn Upstream>,
    store:    SnapshotStore,
    config:   AggregatorConfig,
    sleeper:  Arc<dyn Sleeper>,
    logger:   Arc<EventLogger>,
    in_flight: Mutex<()>,
}

impl RankingAggregator {
    pub fn new(
        upstream: Arc<dyn Upstream>,
        store:    SnapshotStore,
        config:   AggregatorConfig,
        logger:   Arc<EventLogger>,
    ) -> Self {
        Self {
            upstream,
            store,
            config,
            sleeper: Arc::new(TokioSleeper),
            logger,
            in_flight: Mutex::new(()),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn is_stale(&self, snapshot: &RankingSnapshot) -> bool {
        snapshot.is_stale(Utc::now(), self.config.max_age)
    }

    /// A second call while one runs is a silent no-op (`InFlight`).
    pub async fn refresh(&self, force: bool) -> Result<RefreshOutcome, RankingError> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            debug!("ranking refresh already in flight, skipping");
            return Ok(RefreshOutcome::InFlight);
        };

        if !force {
            if let Some(snapshot) = self.store.load().await? {
                if !self.is_stale(&snapshot) {
                    debug!("ranking snapshot from {} still fresh", snapshot.generated_at);
                    return Ok(RefreshOutcome::UpToDate);
                }
            }
        }

        let (_, summary) = self.rebuild(force).await?;
        Ok(RefreshOutcome::Rebuilt(summary))
    }

    /// Waits for any running job, then always rebuilds.
    pub async fn force_refresh(&self) -> Result<RankingSnapshot, RankingError> {
        let _guard = self.in_flight.lock().await;
        let (snapshot, _) = self.rebuild(true).await?;
        Ok(snapshot)
    }

    /// Persisted snapshot and whether it is stale. Absent/unparseable → synchronous rebuild.
    pub async fn current(&self) -> Result<(RankingSnapshot, bool), RankingError> {
        if let Some(snapshot) = self.store.load().await? {
            let stale = self.is_stale(&snapshot);
            return Ok((snapshot, stale));
        }

        let _guard = self.in_flight.lock().await;
        // běh, na který jsme čekali, mohl snapshot právě zapsat
        if let Some(snapshot) = self.store.load().await? {
            let stale = self.is_stale(&snapshot);
            return Ok((snapshot, stale));
        }

        info!("no usable ranking snapshot, rebuilding synchronously");
        let (snapshot, _) = self.rebuild(false).await?;
        Ok((snapshot, false))
    }

    // Caller holds `in_flight`.
    async fn rebuild(&self, forced: bool) -> Result<(RankingSnapshot, RebuildSummary), RankingError> {
        let started = Instant::now();
        let seasons = self.config.seasons();
        info!("ranking rebuild {}..={} (forced={})", seasons.start(), seasons.end(), forced);

        let mut builder = RankingBuilder::new();
        let mut seasons_ok = Vec::new();
        let mut seasons_failed = Vec::new();

        for season in seasons {
            match self.fetch_season(season).await {
                Some(rows) => {
                    builder.fold_season(season, &rows);
                    seasons_ok.push(season);
                }
                None => seasons_failed.push(season),
            }
        }

        let clubs = builder.club_count();
        let snapshot = RankingSnapshot {
            generated_at: Utc::now(),
            ranking:      builder.finish(),
        };
        self.store.save(&snapshot).await?;

        let duration_ms = started.elapsed().as_millis() as u64;
        let _ = self.logger.log(&RankingRefreshEvent {
            ts: now_iso(),
            event: "RANKING_REFRESH",
            forced,
            seasons_ok: seasons_ok.clone(),
            seasons_failed: seasons_failed.clone(),
            clubs,
            duration_ms,
        });
        info!(
            "ranking rebuilt: {} clubs, {} seasons ok, failed={:?} ({} ms)",
            clubs,
            seasons_ok.len(),
            seasons_failed,
            duration_ms
        );

        let summary = RebuildSummary {
            generated_at: snapshot.generated_at,
            seasons_ok,
            seasons_failed,
            clubs,
        };
        Ok((snapshot, summary))
    }

    /// `None` = sezóna vynechána (partial data je OK).
    async fn fetch_season(&self, season: i32) -> Option<Vec<StandingRow>> {
        let params = QueryParams::season(season);
        let max_attempts = self.config.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            info!("collecting season {} (attempt {}/{})", season, attempt, max_attempts);

            let result = self
                .upstream
                .request(Resource::Standings, &params)
                .await
                .and_then(|payload| parse_total_table(&payload));

            match result {
                Ok(rows) => {
                    self.log_attempt(season, attempt, None, Duration::ZERO);
                    return Some(rows);
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.config.retry.delay_after(attempt);
                    warn!("season {} attempt {} failed: {}, waiting {:?}", season, attempt, e, delay);
                    self.log_attempt(season, attempt, Some(e.to_string()), delay);
                    self.sleeper.sleep(delay).await;
                }
                Err(e) => {
                    warn!("season {} skipped, response unusable: {}", season, e);
                    self.log_attempt(season, attempt, Some(e.to_string()), Duration::ZERO);
                    return None;
                }
            }
        }

        warn!("season {} skipped after {} attempts", season, max_attempts);
        None
    }

    fn log_attempt(&self, season: i32, attempt: u32, error: Option<String>, backoff: Duration) {
        let _ = self.logger.log(&SeasonFetchEvent {
            ts: now_iso(),
            event: "SEASON_FETCH",
            season,
            attempt,
            ok: error.is_none(),
            error,
            backoff_ms: backoff.as_millis() as u64,
        });
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use football_api::UpstreamError;
    use serde_json::{json, Value};
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Semaphore;

    /// Standings per season; `failing` seasons answer Unavailable, `malformed` break the shape.
    #[derive(Default)]
    pub(crate) struct SeasonUpstream {
        pub failing:   HashSet<i32>,
        pub malformed: HashSet<i32>,
        pub calls:     StdMutex<Vec<i32>>,
        pub gate:      Option<Semaphore>,
    }

    impl SeasonUpstream {
        pub fn calls_for(&self, season: i32) -> usize {
            self.calls.lock().unwrap().iter().filter(|s| **s == season).count()
        }

        pub fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    pub(crate) fn season_payload(season: i32) -> Value {
        // Flamengo hraje každou sezónu, druhý klub se mění
        let guest = format!("Clube {season}");
        json!({
            "standings": [{ "type": "TOTAL", "table": [
                { "position": 1, "team": { "name": "Flamengo", "crest": "fla.png" },
                  "playedGames": 38, "won": 20, "draw": 10, "lost": 8,
                  "points": 70, "goalsFor": 60, "goalsAgainst": 35 },
                { "position": 2, "team": { "name": guest, "crest": null },
                  "playedGames": 38, "won": 18, "draw": 10, "lost": 10,
                  "points": 64, "goalsFor": 50, "goalsAgainst": 40 }
            ]}]
        })
    }

    #[async_trait]
    impl Upstream for SeasonUpstream {
        async fn request(&self, _resource: Resource, params: &QueryParams) -> Result<Value, UpstreamError> {
            let season = params.season.unwrap_or_default();
            self.calls.lock().unwrap().push(season);
            if let Some(gate) = &self.gate {
                let _permit = gate.acquire().await.unwrap();
            }
            if self.failing.contains(&season) {
                return Err(UpstreamError::Unavailable("HTTP 503".into()));
            }
            if self.malformed.contains(&season) {
                return Ok(json!({ "standings": "nope" }));
            }
            Ok(season_payload(season))
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub delays: StdMutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, delay: Duration) {
            self.delays.lock().unwrap().push(delay);
        }
    }

    pub(crate) fn config(start: i32, end: i32) -> AggregatorConfig {
        AggregatorConfig { start_year: start, end_year: Some(end), ..AggregatorConfig::default() }
    }

    pub(crate) fn aggregator(
        dir: &tempfile::TempDir,
        upstream: Arc<SeasonUpstream>,
        sleeper: Arc<RecordingSleeper>,
        cfg: AggregatorConfig,
    ) -> RankingAggregator {
        RankingAggregator::new(
            upstream,
            SnapshotStore::new(dir.path().join("ranking_cache.json")),
            cfg,
            Arc::new(EventLogger::new(dir.path().join("logs"))),
        )
        .with_sleeper(sleeper)
    }

    #[test]
    fn default_policy_is_three_attempts_of_five_seconds() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(
            (1..=3).map(|a| policy.delay_after(a)).collect::<Vec<_>>(),
            [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(15)]
        );
    }

    #[test]
    fn season_range_is_inclusive() {
        assert_eq!(config(2015, 2017).seasons().collect::<Vec<_>>(), [2015, 2016, 2017]);
        let open = AggregatorConfig::default();
        assert_eq!(*open.seasons().end(), Utc::now().year());
    }

    #[tokio::test]
    async fn failing_season_backs_off_then_run_continues() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(SeasonUpstream { failing: HashSet::from([2016]), ..Default::default() });
        let sleeper = Arc::new(RecordingSleeper::default());
        let agg = aggregator(&dir, Arc::clone(&upstream), Arc::clone(&sleeper), config(2015, 2017));

        let outcome = agg.refresh(true).await.unwrap();

        let RefreshOutcome::Rebuilt(summary) = outcome else {
            panic!("expected a rebuild, got {outcome:?}");
        };
        assert_eq!(summary.seasons_ok, [2015, 2017]);
        assert_eq!(summary.seasons_failed, [2016]);
        assert_eq!(upstream.calls_for(2016), 3);
        assert_eq!(upstream.calls_for(2017), 1);
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            [Duration::from_secs(5), Duration::from_secs(10), Duration::from_secs(15)]
        );

        let snapshot = agg.store().load().await.unwrap().unwrap();
        assert_eq!(snapshot.generated_at, summary.generated_at);
        let fla = snapshot.ranking.iter().find(|c| c.name == "Flamengo").unwrap();
        assert_eq!(fla.per_season.keys().copied().collect::<Vec<_>>(), [2015, 2017]);
        assert_eq!(fla.points, 140);
        assert!(snapshot.ranking.iter().all(|c| c.name != "Clube 2016"));
    }

    #[tokio::test]
    async fn malformed_season_is_skipped_without_waiting() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(SeasonUpstream { malformed: HashSet::from([2020]), ..Default::default() });
        let sleeper = Arc::new(RecordingSleeper::default());
        let agg = aggregator(&dir, Arc::clone(&upstream), Arc::clone(&sleeper), config(2020, 2021));

        agg.refresh(true).await.unwrap();
        assert_eq!(upstream.calls_for(2020), 1);
        assert!(sleeper.delays.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn fresh_snapshot_means_no_network() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(SeasonUpstream::default());
        let agg = aggregator(&dir, Arc::clone(&upstream), Arc::default(), config(2018, 2020));

        agg.refresh(false).await.unwrap();
        assert_eq!(upstream.total_calls(), 3);

        assert_eq!(agg.refresh(false).await.unwrap(), RefreshOutcome::UpToDate);
        let (_, stale) = agg.current().await.unwrap();
        assert!(!stale);
        assert_eq!(upstream.total_calls(), 3);
    }

    #[tokio::test]
    async fn forced_refresh_hits_full_range_every_time() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(SeasonUpstream::default());
        let agg = aggregator(&dir, Arc::clone(&upstream), Arc::default(), config(2018, 2020));

        let first = agg.force_refresh().await.unwrap();
        let second = agg.force_refresh().await.unwrap();
        assert_eq!(upstream.total_calls(), 6);
        assert!(second.generated_at >= first.generated_at);
    }

    #[tokio::test]
    async fn concurrent_refresh_is_silent_noop() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(SeasonUpstream { gate: Some(Semaphore::new(0)), ..Default::default() });
        let agg = Arc::new(aggregator(&dir, Arc::clone(&upstream), Arc::default(), config(2019, 2019)));

        let running = {
            let agg = Arc::clone(&agg);
            tokio::spawn(async move { agg.refresh(true).await })
        };
        while upstream.total_calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(agg.refresh(true).await.unwrap(), RefreshOutcome::InFlight);

        upstream.gate.as_ref().unwrap().add_permits(10);
        let outcome = running.await.unwrap().unwrap();
        assert!(matches!(outcome, RefreshOutcome::Rebuilt(_)));
        assert_eq!(upstream.total_calls(), 1);
    }

    #[tokio::test]
    async fn unparseable_snapshot_forces_synchronous_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("ranking_cache.json"), "{ broken").unwrap();
        let upstream = Arc::new(SeasonUpstream::default());
        let agg = aggregator(&dir, Arc::clone(&upstream), Arc::default(), config(2021, 2022));

        let (snapshot, stale) = agg.current().await.unwrap();
        assert!(!stale);
        assert_eq!(snapshot.ranking[0].name, "Flamengo");
        assert_eq!(upstream.total_calls(), 2);
    }

    #[tokio::test]
    async fn persistence_failure_surfaces_from_forced_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        let agg = RankingAggregator::new(
            Arc::new(SeasonUpstream::default()),
            SnapshotStore::new(blocker.join("ranking_cache.json")),
            config(2023, 2023),
            Arc::new(EventLogger::new(dir.path().join("logs"))),
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()));

        assert!(matches!(agg.force_refresh().await, Err(RankingError::Persistence(_))));
    }
}
