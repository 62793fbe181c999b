/// PlacarLive: Live broadcaster
///
/// Co dělá:
///   1. První subscriber spustí JEDEN poll loop (hned + každých 20s) nad IN_PLAY dotazem
///   2. Každý úspěšný tick → `latest` + push všem subscriberům v pořadí registrace
///   3. Poslední unsubscribe → timer zrušen, `latest` zůstává (last known good)
///   4. Chyba ticku → log, `latest` beze změny, nikdo se neodhlašuje
///
/// Registry, timer i `latest` drží jeden mutex. Fetch běží mimo zámek, broadcast pod ním.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use football_api::query::Payload;
use football_api::{MatchQuery, UpstreamError};
use logger::{now_iso, EventLogger, LivePollEvent};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

// ── Typy ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait LiveSource: Send + Sync {
    async fn fetch_live(&self) -> Result<Payload, UpstreamError>;
}

#[async_trait]
impl LiveSource for MatchQuery {
    async fn fetch_live(&self) -> Result<Payload, UpstreamError> {
        MatchQuery::fetch_live(self).await
    }
}

#[derive(Debug, Clone)]
pub struct LiveUpdate {
    pub ts:      DateTime<Utc>,
    pub payload: Payload,
}

impl LiveUpdate {
    /// WS frame: `{"event":"live-update","ts":..,"data":..}`
    pub fn to_frame(&self) -> Value {
        json!({
            "event": "live-update",
            "ts":    self.ts.to_rfc3339(),
            "data":  self.payload.as_ref(),
        })
    }

    fn match_count(&self) -> usize {
        self.payload
            .get("matches")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }
}

pub type LiveSink = mpsc::UnboundedSender<LiveUpdate>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub poll_interval: Duration,
}

impl Default for BroadcasterConfig {
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(20) }
    }
}

#[derive(Default)]
struct PollState {
    subscribers: Vec<(SubscriptionId, LiveSink)>,
    next_id:     u64,
    timer:       Option<JoinHandle<()>>,
    /// Zvýší se při každém startu/stopu timeru; starý loop se podle něj ukončí.
    generation:  u64,
    latest:      Option<LiveUpdate>,
}

impl PollState {
    fn stop_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
        self.generation += 1;
    }
}

// ── Broadcaster ──────────────────────────────────────────────────────────────

pub struct LiveBroadcaster {
    source: Arc<dyn LiveSource>,
    config: BroadcasterConfig,
    logger: Arc<EventLogger>,
    state:  Arc<Mutex<PollState>>,
}

impl LiveBroadcaster {
    pub fn new(source: Arc<dyn LiveSource>, config: BroadcasterConfig, logger: Arc<EventLogger>) -> Self {
        Self {
            source,
            config,
            logger,
            state: Arc::new(Mutex::new(PollState::default())),
        }
    }

    /// Registers `sink`. Gets the latest payload right away when one exists.
    pub async fn subscribe(&self, sink: LiveSink) -> SubscriptionId {
        let mut state = self.state.lock().await;
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;

        if let Some(latest) = &state.latest {
            let _ = sink.send(latest.clone());
        }
        state.subscribers.push((id, sink));

        if state.timer.is_none() {
            state.generation += 1;
            let generation = state.generation;
            info!("live: first subscriber, polling every {:?}", self.config.poll_interval);
            state.timer = Some(tokio::spawn(poll_loop(
                Arc::clone(&self.state),
                Arc::clone(&self.source),
                Arc::clone(&self.logger),
                self.config.poll_interval,
                generation,
            )));
        }

        debug!("live: subscriber {:?} registered ({} total)", id, state.subscribers.len());
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(pos) = state.subscribers.iter().position(|(sid, _)| *sid == id) else {
            return false;
        };
        state.subscribers.remove(pos);
        debug!("live: subscriber {:?} removed ({} left)", id, state.subscribers.len());

        if state.subscribers.is_empty() {
            state.stop_timer();
            info!("live: no subscribers, polling stopped");
        }
        true
    }

    pub async fn subscriber_count(&self) -> usize {
        self.state.lock().await.subscribers.len()
    }

    pub async fn is_polling(&self) -> bool {
        self.state.lock().await.timer.is_some()
    }

    pub async fn latest(&self) -> Option<LiveUpdate> {
        self.state.lock().await.latest.clone()
    }

    /// Drops every subscriber and stops the timer.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        let dropped = state.subscribers.len();
        state.subscribers.clear();
        state.stop_timer();
        info!("live: shutdown, {} subscribers dropped", dropped);
    }
}

async fn poll_loop(
    state:      Arc<Mutex<PollState>>,
    source:     Arc<dyn LiveSource>,
    logger:     Arc<EventLogger>,
    period:     Duration,
    generation: u64,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let result = source.fetch_live().await;

        let mut state = state.lock().await;
        if state.generation != generation {
            break;
        }
        let subscribers = state.subscribers.len();

        match result {
            Ok(payload) => {
                let update = LiveUpdate { ts: Utc::now(), payload };
                let mut delivered = 0;
                for (id, sink) in &state.subscribers {
                    match sink.send(update.clone()) {
                        Ok(()) => delivered += 1,
                        Err(_) => debug!("live: push to {:?} failed, transport gone", id),
                    }
                }
                let matches = update.match_count();
                state.latest = Some(update);

                debug!("live tick: {} matches → {}/{} subscribers", matches, delivered, subscribers);
                let _ = logger.log(&LivePollEvent {
                    ts: now_iso(),
                    event: "LIVE_POLL",
                    ok: true,
                    subscribers,
                    matches,
                    delivered,
                    message: "ok".to_string(),
                });
            }
            Err(e) => {
                warn!("live tick failed, keeping last payload: {}", e);
                let _ = logger.log(&LivePollEvent {
                    ts: now_iso(),
                    event: "LIVE_POLL",
                    ok: false,
                    subscribers,
                    matches: 0,
                    delivered: 0,
                    message: e.to_string(),
                });
            }
        }
    }
}
