use anyhow::{Context, Result};
use football_api::{MatchQuery, MatchStatus, QueryParams, UpstreamError};
use live_broadcaster::LiveBroadcaster;
use ranking::{RankingError, RankingService, RankingSnapshot};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct HubState {
    pub query:    Arc<MatchQuery>,
    pub ranking:  RankingService,
    pub live:     Arc<LiveBroadcaster>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Health,
    Standings,
    Matches(QueryParams),
    Live,
    Ranking,
    RankingRefresh,
    SeasonTable { season: i32, table_type: String },
    BadRequest(String),
    NotFound,
}

/// Request line target → route. `target` is the raw path with query.
pub fn route(method: &str, target: &str) -> Route {
    let Ok(url) = reqwest::Url::parse(&format!("http://hub{target}")) else {
        return Route::BadRequest("invalid request target".into());
    };
    let segments: Vec<&str> = url.path().trim_matches('/').split('/').collect();

    match (method, segments.as_slice()) {
        ("GET", ["health"]) => Route::Health,
        ("GET", ["api", "standings"]) => Route::Standings,
        ("GET", ["api", "live"]) => Route::Live,
        ("GET", ["api", "ranking"]) => Route::Ranking,
        ("POST", ["api", "ranking", "refresh"]) => Route::RankingRefresh,
        ("GET", ["api", "matches"]) => {
            let mut params = QueryParams::default();
            for (k, v) in url.query_pairs() {
                match k.as_ref() {
                    "matchday" => match v.parse() {
                        Ok(md) => params = params.with_matchday(md),
                        Err(_) => return Route::BadRequest(format!("invalid matchday {v:?}")),
                    },
                    "live" if v == "true" => params.status = Some(MatchStatus::InPlay),
                    _ => {}
                }
            }
            Route::Matches(params)
        }
        ("GET", ["api", "standings", season, table_type]) => match season.parse() {
            Ok(season) => Route::SeasonTable { season, table_type: table_type.to_string() },
            Err(_) => Route::BadRequest(format!("invalid season {season:?}")),
        },
        _ => Route::NotFound,
    }
}

struct Reply {
    status: u16,
    body:   Value,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self { status, body: json!({ "error": message.into() }) }
    }

    fn upstream(e: UpstreamError) -> Self {
        let message = match &e {
            UpstreamError::RateLimited => "football-data rate limit reached, retry later".to_string(),
            other => other.to_string(),
        };
        Self::error(e.status_hint(), message)
    }

    fn ranking(result: Result<RankingSnapshot, RankingError>) -> Self {
        match result.map(|s| serde_json::to_value(&s)) {
            Ok(Ok(body)) => Self::ok(body),
            Ok(Err(e)) => Self::error(500, format!("ranking serialization failed: {e}")),
            Err(e) => Self::error(500, e.to_string()),
        }
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

async fn dispatch(state: &HubState, route: Route) -> Reply {
    match route {
        Route::Health => Reply::ok(json!({
            "ok": true,
            "subscribers": state.live.subscriber_count().await,
            "cache_entries": state.query.cache_len(),
        })),
        Route::Standings => match state.query.fetch_standings(&QueryParams::default()).await {
            Ok(p) => Reply::ok(p.as_ref().clone()),
            Err(e) => Reply::upstream(e),
        },
        Route::Matches(params) => match state.query.fetch_matches(&params).await {
            Ok(p) => Reply::ok(p.as_ref().clone()),
            Err(e) => Reply::upstream(e),
        },
        Route::Live => match state.query.fetch_live().await {
            Ok(p) => Reply::ok(p.as_ref().clone()),
            Err(e) => Reply::upstream(e),
        },
        Route::SeasonTable { season, table_type } => {
            match state.query.fetch_season_table(season, &table_type).await {
                Ok(p) => Reply::ok(p.as_ref().clone()),
                Err(e) => Reply::upstream(e),
            }
        }
        Route::Ranking => Reply::ranking(state.ranking.snapshot().await),
        Route::RankingRefresh => Reply::ranking(state.ranking.force_refresh().await),
        Route::BadRequest(msg) => Reply::error(400, msg),
        Route::NotFound => Reply::error(404, "not found"),
    }
}

async fn handle_http_connection(mut stream: TcpStream, state: HubState) -> Result<()> {
    let mut buf = vec![0u8; 8192];
    let n = stream.read(&mut buf).await.context("http read")?;
    if n == 0 {
        return Ok(());
    }

    let req = String::from_utf8_lossy(&buf[..n]);
    let first_line = req.lines().next().unwrap_or_default();
    let mut parts = first_line.split_whitespace();
    let method = parts.next().unwrap_or("");
    let target = parts.next().unwrap_or("");

    let route = route(method, target);
    debug!("http {} {} → {:?}", method, target, route);
    let reply = dispatch(&state, route).await;
    if reply.status >= 500 {
        warn!("http {} {} failed with {}: {}", method, target, reply.status, reply.body);
    }

    let body = reply.body.to_string();
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json; charset=utf-8\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        reply.status,
        reason(reply.status),
        body.len(),
        body
    );
    stream.write_all(resp.as_bytes()).await.context("http write")?;
    Ok(())
}

pub async fn start_http_server(state: HubState, bind: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(bind).await.context("http bind")?;
    info!("placar-hub http listening on http://{} (GET /health, /api/*)", bind);

    loop {
        let (stream, peer) = listener.accept().await.context("http accept")?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_http_connection(stream, state).await {
                debug!("http handler err {}: {}", peer, e);
            }
        });
    }
}
