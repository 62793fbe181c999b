//! Query layer: cache klíč z tvaru dotazu → TTL cache → (miss) upstream.
//!
//! Chyby upstreamu jdou ven beze změny a nic se necachuje.

use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::client::{QueryParams, Resource, Upstream};
use crate::error::UpstreamError;
use crate::historical::HistoricalStandings;

pub type Payload = Arc<Value>;

/// TTL per operation.
#[derive(Debug, Clone)]
pub struct QueryTtls {
    pub standings:    Duration,
    pub matches:      Duration,
    pub in_play:      Duration,
    pub historical:   Duration,
    pub season_table: Duration,
}

impl Default for QueryTtls {
    fn default() -> Self {
        Self {
            standings:    Duration::from_secs(120),
            matches:      Duration::from_secs(120),
            in_play:      Duration::from_secs(30),
            historical:   Duration::from_secs(3600),
            season_table: Duration::from_secs(300),
        }
    }
}

/// Canonical `operation?k=v&k=v` with keys sorted and unset parameters omitted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn new(operation: &str, params: &QueryParams) -> Self {
        Self::from_pairs(operation, params.pairs())
    }

    pub fn from_pairs(operation: &str, mut pairs: Vec<(&str, String)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp(b.0));
        let mut key = operation.to_string();
        for (i, (name, value)) in pairs.iter().enumerate() {
            key.push(if i == 0 { '?' } else { '&' });
            key.push_str(name);
            key.push('=');
            key.push_str(value);
        }
        Self(key)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct MatchQuery {
    upstream:   Arc<dyn Upstream>,
    cache:      TtlCache<Payload>,
    ttls:       QueryTtls,
    historical: HistoricalStandings,
}

impl MatchQuery {
    pub fn new(upstream: Arc<dyn Upstream>, ttls: QueryTtls, historical: HistoricalStandings) -> Self {
        Self {
            upstream,
            cache: TtlCache::new(),
            ttls,
            historical,
        }
    }

    /// Uncached client path (bulk jobs).
    pub fn upstream(&self) -> Arc<dyn Upstream> {
        Arc::clone(&self.upstream)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn shutdown(&self) {
        let dropped = self.cache.len();
        self.cache.clear();
        info!("query cache cleared ({} entries)", dropped);
    }

    async fn cached(
        &self,
        key: CacheKey,
        resource: Resource,
        params: &QueryParams,
        ttl: Duration,
    ) -> Result<Payload, UpstreamError> {
        if let Some(hit) = self.cache.get(key.as_str()) {
            debug!("cache hit {}", key);
            return Ok(hit);
        }

        debug!("cache miss {}", key);
        let payload = Arc::new(self.upstream.request(resource, params).await?);
        self.cache.set(key.as_str(), Arc::clone(&payload), ttl);
        Ok(payload)
    }

    /// Season-specific requests are answered from local historical data when it has the season.
    pub async fn fetch_standings(&self, params: &QueryParams) -> Result<Payload, UpstreamError> {
        let key = CacheKey::new("standings", params);

        if let Some(season) = params.season {
            if let Some(table) = self.historical.table(&season.to_string()) {
                if let Some(hit) = self.cache.get(key.as_str()) {
                    return Ok(hit);
                }
                info!("standings {} served from local historical data", season);
                // tvar jako upstream, aby TOTAL tabulka šla číst stejně
                let payload = Arc::new(json!({
                    "filters":   { "season": season },
                    "standings": [{ "type": "TOTAL", "table": table }],
                }));
                self.cache.set(key.as_str(), Arc::clone(&payload), self.ttls.historical);
                return Ok(payload);
            }
        }

        self.cached(key, Resource::Standings, params, self.ttls.standings).await
    }

    pub async fn fetch_matches(&self, params: &QueryParams) -> Result<Payload, UpstreamError> {
        let ttl = if params.is_in_play() { self.ttls.in_play } else { self.ttls.matches };
        let key = CacheKey::new("matches", params);
        self.cached(key, Resource::Matches, params, ttl).await
    }

    /// Matches currently in play.
    pub async fn fetch_live(&self) -> Result<Payload, UpstreamError> {
        self.fetch_matches(&QueryParams::in_play()).await
    }

    /// One season's table of `table_type` (TOTAL / HOME / AWAY), local data first.
    pub async fn fetch_season_table(&self, season: i32, table_type: &str) -> Result<Payload, UpstreamError> {
        let table_type = table_type.trim().to_ascii_uppercase();
        let key = CacheKey::from_pairs(
            "season_table",
            vec![("season", season.to_string()), ("type", table_type.clone())],
        );
        if let Some(hit) = self.cache.get(key.as_str()) {
            return Ok(hit);
        }

        if let Some(table) = self.historical.table(&season.to_string()) {
            info!("season {} served from local historical data", season);
            let payload = Arc::new(json!({ "season": season, "type": table_type, "table": table }));
            self.cache.set(key.as_str(), Arc::clone(&payload), self.ttls.historical);
            return Ok(payload);
        }

        info!("season {} ({}) fetched from football-data", season, table_type);
        let raw = self
            .upstream
            .request(Resource::Standings, &QueryParams::season(season))
            .await?;
        let table = select_table(&raw, &table_type)?;
        let empty = table.as_array().map_or(true, |rows| rows.is_empty());
        let payload = Arc::new(json!({ "season": season, "type": table_type, "table": table }));

        if empty {
            warn!("no {} table available for season {}", table_type, season);
        } else {
            self.cache.set(key.as_str(), Arc::clone(&payload), self.ttls.season_table);
        }
        Ok(payload)
    }
}

/// `standings[]` entry whose `type` matches, or an empty table.
pub fn select_table(raw: &Value, table_type: &str) -> Result<Value, UpstreamError> {
    let Some(obj) = raw.as_object() else {
        return Err(UpstreamError::Malformed("standings payload is not an object".into()));
    };
    let Some(standings) = obj.get("standings") else {
        return Ok(json!([]));
    };
    let Some(groups) = standings.as_array() else {
        return Err(UpstreamError::Malformed("`standings` is not an array".into()));
    };

    let table = groups
        .iter()
        .find(|g| g.get("type").and_then(Value::as_str) == Some(table_type))
        .and_then(|g| g.get("table"))
        .cloned()
        .unwrap_or_else(|| json!([]));
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedUpstream {
        calls:     Mutex<Vec<(Resource, QueryParams)>>,
        responses: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    }

    impl ScriptedUpstream {
        fn push(&self, r: Result<Value, UpstreamError>) {
            self.responses.lock().unwrap().push_back(r);
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Upstream for ScriptedUpstream {
        async fn request(&self, resource: Resource, params: &QueryParams) -> Result<Value, UpstreamError> {
            self.calls.lock().unwrap().push((resource, params.clone()));
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(json!({ "resource": resource.as_str() })))
        }
    }

    fn query_with(upstream: Arc<ScriptedUpstream>, historical: HistoricalStandings) -> MatchQuery {
        MatchQuery::new(upstream, QueryTtls::default(), historical)
    }

    #[test]
    fn cache_key_is_deterministic() {
        let a = CacheKey::new("matches", &QueryParams::in_play().with_matchday(3));
        let b = CacheKey::new("matches", &QueryParams::in_play().with_matchday(3));
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "matches?matchday=3&status=IN_PLAY");
    }

    #[test]
    fn cache_key_distinct_params_never_collide() {
        let keys = [
            CacheKey::new("matches", &QueryParams::default()),
            CacheKey::new("matches", &QueryParams::default().with_matchday(5)),
            CacheKey::new("matches", &QueryParams::season(5)),
            CacheKey::new("matches", &QueryParams::in_play()),
            CacheKey::new("standings", &QueryParams::default()),
            CacheKey::new("standings", &QueryParams::season(2020)),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in keys.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn from_pairs_sorts_names() {
        let key = CacheKey::from_pairs("t", vec![("type", "HOME".into()), ("season", "2019".into())]);
        assert_eq!(key.as_str(), "t?season=2019&type=HOME");
    }

    #[tokio::test(start_paused = true)]
    async fn standings_hit_within_ttl_skips_upstream() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        query.fetch_standings(&QueryParams::default()).await.unwrap();
        tokio::time::advance(Duration::from_secs(119)).await;
        query.fetch_standings(&QueryParams::default()).await.unwrap();
        assert_eq!(upstream.calls(), 1);

        tokio::time::advance(Duration::from_secs(2)).await;
        query.fetch_standings(&QueryParams::default()).await.unwrap();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn in_play_matches_use_short_ttl() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        query.fetch_live().await.unwrap();
        query.fetch_matches(&QueryParams::default()).await.unwrap();
        assert_eq!(upstream.calls(), 2, "live and full listings are distinct keys");

        tokio::time::advance(Duration::from_secs(31)).await;
        query.fetch_live().await.unwrap();
        query.fetch_matches(&QueryParams::default()).await.unwrap();
        assert_eq!(upstream.calls(), 3, "only the in-play entry expired");

        let (resource, params) = upstream.calls.lock().unwrap()[2].clone();
        assert_eq!(resource, Resource::Matches);
        assert!(params.is_in_play());
    }

    #[tokio::test]
    async fn distinct_matchdays_are_cached_separately() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        let md = |n| QueryParams::default().with_matchday(n);
        query.fetch_matches(&md(1)).await.unwrap();
        query.fetch_matches(&md(2)).await.unwrap();
        query.fetch_matches(&md(1)).await.unwrap();
        assert_eq!(upstream.calls(), 2);
        assert_eq!(query.cache_len(), 2);
    }

    #[tokio::test]
    async fn failures_propagate_and_are_not_cached() {
        let upstream = Arc::new(ScriptedUpstream::default());
        upstream.push(Err(UpstreamError::RateLimited));
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        let err = query.fetch_standings(&QueryParams::default()).await.unwrap_err();
        assert_eq!(err, UpstreamError::RateLimited);
        assert_eq!(query.cache_len(), 0);

        query.fetch_standings(&QueryParams::default()).await.unwrap();
        assert_eq!(upstream.calls(), 2);
    }

    #[tokio::test]
    async fn local_historical_season_bypasses_upstream() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let historical =
            HistoricalStandings::from_value(json!({ "2008": [{ "position": 1, "team": "São Paulo" }] }))
                .unwrap();
        let query = query_with(Arc::clone(&upstream), historical);

        let payload = query.fetch_season_table(2008, "total").await.unwrap();
        assert_eq!(payload["type"], "TOTAL");
        assert_eq!(payload["table"][0]["team"], "São Paulo");
        assert_eq!(upstream.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn local_season_standings_never_reach_upstream() {
        let upstream = Arc::new(ScriptedUpstream::default());
        let historical =
            HistoricalStandings::from_value(json!({ "2008": [{ "position": 1, "team": "São Paulo" }] }))
                .unwrap();
        let query = query_with(Arc::clone(&upstream), historical);

        let payload = query.fetch_standings(&QueryParams::season(2008)).await.unwrap();
        assert_eq!(payload["standings"][0]["type"], "TOTAL");
        assert_eq!(payload["standings"][0]["table"][0]["team"], "São Paulo");
        assert_eq!(select_table(&payload, "TOTAL").unwrap()[0]["position"], 1);

        // i po vypršení TTL zůstává lokální
        tokio::time::advance(Duration::from_secs(3601)).await;
        query.fetch_standings(&QueryParams::season(2008)).await.unwrap();
        assert_eq!(upstream.calls(), 0);

        query.fetch_standings(&QueryParams::season(2019)).await.unwrap();
        assert_eq!(upstream.calls(), 1);
    }

    #[tokio::test]
    async fn season_table_selects_requested_type() {
        let upstream = Arc::new(ScriptedUpstream::default());
        upstream.push(Ok(json!({
            "standings": [
                { "type": "TOTAL", "table": [{ "position": 1 }] },
                { "type": "HOME",  "table": [{ "position": 2 }] }
            ]
        })));
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        let payload = query.fetch_season_table(2021, "home").await.unwrap();
        assert_eq!(payload["table"], json!([{ "position": 2 }]));

        query.fetch_season_table(2021, "HOME").await.unwrap();
        assert_eq!(upstream.calls(), 1, "non-empty table is cached");
    }

    #[tokio::test]
    async fn empty_season_table_is_not_cached() {
        let upstream = Arc::new(ScriptedUpstream::default());
        upstream.push(Ok(json!({ "standings": [] })));
        let query = query_with(Arc::clone(&upstream), HistoricalStandings::empty());

        let payload = query.fetch_season_table(2030, "TOTAL").await.unwrap();
        assert_eq!(payload["table"], json!([]));
        assert_eq!(query.cache_len(), 0);
    }

    #[test]
    fn select_table_rejects_non_array_standings() {
        let err = select_table(&json!({ "standings": {} }), "TOTAL").unwrap_err();
        assert!(matches!(err, UpstreamError::Malformed(_)));
    }
}
