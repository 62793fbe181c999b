//! PlacarLive: Ranking geral
//!
//! Co dělá:
//!   1. Projde sezóny start_year..=aktuální rok, každou max. 3× s lineárním backoffem
//!   2. Sečte tabulky TOTAL po klubech (klíč = jméno klubu z upstreamu)
//!   3. Spočítá saldo + aproveitamento, seřadí podle bodů, uloží snapshot (JSON)
//!   4. Snapshot starší než 24h → refresh na pozadí; chybějící → synchronní rebuild
//!
//! Přejmenovaný klub mezi sezónami = dva řádky. Známé omezení, neopravujeme.

pub mod aggregator;
pub mod error;
pub mod model;
pub mod store;
pub mod worker;

pub use aggregator::{
    AggregatorConfig, RankingAggregator, RebuildSummary, RefreshOutcome, RetryPolicy, Sleeper,
    TokioSleeper,
};
pub use error::RankingError;
pub use model::{ClubAggregate, RankingBuilder, RankingSnapshot, SeasonResult, StandingRow};
pub use store::SnapshotStore;
pub use worker::{spawn_refresh_worker, RankingService};
