use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalized internal types used by the engine (provider-agnostic).

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsUpdate {
    pub event_id: String,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub bookmakers: Vec<BookmakerOdds>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookmakerOdds {
    pub name: String,
    pub home_odds: f64, // decimal odds
    pub away_odds: f64, // decimal odds
    pub draw_odds: Option<f64>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Price format requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OddsFormat {
    #[default]
    Decimal,
    American,
}

impl OddsFormat {
    pub fn as_query(&self) -> &'static str {
        match self {
            OddsFormat::Decimal => "decimal",
            OddsFormat::American => "american",
        }
    }
}

/// the-odds-api.com v4 response: top-level array of events
#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct TheOddsApiEvent {
    pub id: String,
    pub sport_key: String,
    #[serde(default)]
    pub sport_title: Option<String>,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: String,
    #[serde(default)]
    pub bookmakers: Vec<TheOddsApiBookmaker>,
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct TheOddsApiBookmaker {
    pub key: String,
    pub title: String,
    pub last_update: String,
    pub markets: Vec<TheOddsApiMarket>,
}

#[derive(Debug, Deserialize)]
pub struct TheOddsApiMarket {
    pub key: String,
    pub outcomes: Vec<TheOddsApiOutcome>,
}

#[derive(Debug, Deserialize)]
pub struct TheOddsApiOutcome {
    pub name: String,
    pub price: f64,
}

/// API usage quota info extracted from response headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApiQuota {
    pub requests_used: u64,
    pub requests_remaining: u64,
}
