//! PlacarLive: football-data.org klient
//!
//! Co dělá:
//!   1. `FootballDataClient`: jeden autentizovaný HTTP call na upstream, bez retry
//!   2. `TtlCache`: in-memory cache s TTL per klíč, líná expirace při čtení
//!   3. `MatchQuery`: cache klíče z tvaru dotazu, TTL podle operace
//!   4. `HistoricalStandings`: lokální JSON s předpečenými tabulkami

pub mod cache;
pub mod client;
pub mod error;
pub mod historical;
pub mod query;

pub use cache::TtlCache;
pub use client::{ClientConfig, FootballDataClient, MatchStatus, QueryParams, Resource, Upstream};
pub use error::UpstreamError;
pub use historical::HistoricalStandings;
pub use query::{CacheKey, MatchQuery, QueryTtls};
