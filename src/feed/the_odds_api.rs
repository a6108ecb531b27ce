use super::types::*;
use super::OddsFeed;
use crate::engine::odds::american_to_decimal;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

pub struct TheOddsApi {
    client: Client,
    api_key: String,
    base_url: String,
    regions: String,
    bookmakers: String,
    odds_format: OddsFormat,
    last_quota: Option<ApiQuota>,
}

/// Map our internal sport key to the-odds-api.com sport key.
/// Unknown keys are assumed to already be provider keys.
pub fn api_sport_key(sport: &str) -> &str {
    match sport {
        "basketball" => "basketball_nba",
        "american-football" => "americanfootball_nfl",
        "baseball" => "baseball_mlb",
        "ice-hockey" => "icehockey_nhl",
        "tennis-atp" => "tennis_atp_french_open",
        "soccer-epl" => "soccer_epl",
        "soccer-laliga" => "soccer_spain_la_liga",
        "soccer-bundesliga" => "soccer_germany_bundesliga",
        "soccer-serie-a" => "soccer_italy_serie_a",
        "soccer-ucl" => "soccer_uefa_champs_league",
        "mma" => "mma_mixed_martial_arts",
        _ => sport,
    }
}

/// Parse a quota header that may be an integer or float (e.g. "14527.0").
fn parse_quota_header(headers: &reqwest::header::HeaderMap, name: &str) -> u64 {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
        .map(|v| v as u64)
        .unwrap_or(0)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Convert a provider price to decimal odds.
fn to_decimal(price: f64, format: OddsFormat) -> Option<f64> {
    match format {
        OddsFormat::Decimal => Some(price),
        OddsFormat::American => american_to_decimal(price),
    }
}

/// Normalize the-odds-api events into provider-agnostic updates.
///
/// Bookmakers without an h2h market, or missing either team's price, are
/// dropped. Events with an unparseable commence time or no usable bookmaker
/// are dropped.
pub fn normalize_events(
    events: Vec<TheOddsApiEvent>,
    sport: &str,
    format: OddsFormat,
) -> Vec<OddsUpdate> {
    let mut updates: Vec<OddsUpdate> = Vec::new();

    for event in events {
        let Some(commence_time) = parse_timestamp(&event.commence_time) else {
            tracing::debug!(event_id = %event.id, raw = %event.commence_time, "skipping event: bad commence_time");
            continue;
        };

        let mut bookmaker_odds: Vec<BookmakerOdds> = Vec::new();

        for bm in &event.bookmakers {
            // Find h2h (moneyline) market
            let Some(market) = bm.markets.iter().find(|m| m.key == "h2h") else {
                continue;
            };

            let price_of = |name: &str| {
                market
                    .outcomes
                    .iter()
                    .find(|o| o.name == name)
                    .and_then(|o| to_decimal(o.price, format))
            };

            let home_price = price_of(&event.home_team);
            let away_price = price_of(&event.away_team);
            let draw_price = price_of("Draw");

            if let (Some(h), Some(a)) = (home_price, away_price) {
                bookmaker_odds.push(BookmakerOdds {
                    name: bm.title.clone(),
                    home_odds: h,
                    away_odds: a,
                    draw_odds: draw_price,
                    last_update: parse_timestamp(&bm.last_update),
                });
            }
        }

        if !bookmaker_odds.is_empty() {
            updates.push(OddsUpdate {
                event_id: event.id,
                sport: sport.to_string(),
                home_team: event.home_team,
                away_team: event.away_team,
                commence_time,
                bookmakers: bookmaker_odds,
            });
        }
    }

    updates
}

impl TheOddsApi {
    pub fn new(
        api_key: String,
        base_url: &str,
        regions: &str,
        bookmakers: &str,
        odds_format: OddsFormat,
    ) -> Self {
        Self {
            client: Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            regions: regions.to_string(),
            bookmakers: bookmakers.to_string(),
            odds_format,
            last_quota: None,
        }
    }

    fn odds_url(&self, api_sport: &str) -> String {
        let mut url = format!(
            "{}/v4/sports/{}/odds?apiKey={}&regions={}&markets=h2h&oddsFormat={}&dateFormat=iso",
            self.base_url,
            api_sport,
            self.api_key,
            self.regions,
            self.odds_format.as_query(),
        );
        // An explicit bookmaker list overrides regions on the provider side.
        if !self.bookmakers.is_empty() {
            url.push_str("&bookmakers=");
            url.push_str(&self.bookmakers);
        }
        url
    }

    /// Call the free `/v4/sports` endpoint to check quota without consuming usage credits.
    /// Returns an error if the key is invalid or quota is exhausted.
    pub async fn check_quota(&mut self) -> Result<ApiQuota> {
        let url = format!("{}/v4/sports?apiKey={}", self.base_url, self.api_key);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to reach the-odds-api for quota check")?;

        let status = resp.status();
        let used = parse_quota_header(resp.headers(), "x-requests-used");
        let remaining = parse_quota_header(resp.headers(), "x-requests-remaining");

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("the-odds-api key validation failed ({}): {}", status, body);
        }

        let quota = ApiQuota {
            requests_used: used,
            requests_remaining: remaining,
        };
        self.last_quota = Some(quota.clone());

        if remaining == 0 {
            anyhow::bail!("API quota exhausted ({} used, 0 remaining)", used);
        }

        Ok(quota)
    }
}

#[async_trait]
impl OddsFeed for TheOddsApi {
    async fn fetch_odds(&mut self, sport: &str) -> Result<Vec<OddsUpdate>> {
        let api_sport = api_sport_key(sport);
        let url = self.odds_url(api_sport);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("the-odds-api request failed")?;

        // Extract quota from response headers
        let used = parse_quota_header(resp.headers(), "x-requests-used");
        let remaining = parse_quota_header(resp.headers(), "x-requests-remaining");
        self.last_quota = Some(ApiQuota {
            requests_used: used,
            requests_remaining: remaining,
        });

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("the-odds-api {} ({}): {}", api_sport, status, body);
        }

        let events: Vec<TheOddsApiEvent> = resp
            .json()
            .await
            .context("failed to parse the-odds-api response")?;

        let updates = normalize_events(events, sport, self.odds_format);
        tracing::debug!(sport, api_sport, events = updates.len(), "fetched odds");
        Ok(updates)
    }

    fn last_quota(&self) -> Option<ApiQuota> {
        self.last_quota.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"[
      {
        "id": "e912304de2b2ce35b473ce2ecd3d1502",
        "sport_key": "soccer_epl",
        "sport_title": "EPL",
        "commence_time": "2026-10-17T14:00:00Z",
        "home_team": "Arsenal",
        "away_team": "Chelsea",
        "bookmakers": [
          {
            "key": "pinnacle",
            "title": "Pinnacle",
            "last_update": "2026-10-16T09:12:44Z",
            "markets": [
              { "key": "h2h", "outcomes": [
                { "name": "Arsenal", "price": 2.10 },
                { "name": "Chelsea", "price": 3.60 },
                { "name": "Draw", "price": 3.40 }
              ] }
            ]
          },
          {
            "key": "betfair_ex_eu",
            "title": "Betfair",
            "last_update": "2026-10-16T09:11:02Z",
            "markets": [
              { "key": "spreads", "outcomes": [
                { "name": "Arsenal", "price": 1.95 },
                { "name": "Chelsea", "price": 1.95 }
              ] }
            ]
          },
          {
            "key": "unibet_eu",
            "title": "Unibet",
            "last_update": "not-a-date",
            "markets": [
              { "key": "h2h", "outcomes": [
                { "name": "Arsenal", "price": 2.05 },
                { "name": "Draw", "price": 3.50 }
              ] }
            ]
          }
        ]
      },
      {
        "id": "no-books",
        "sport_key": "soccer_epl",
        "commence_time": "2026-10-17T16:30:00Z",
        "home_team": "Everton",
        "away_team": "Fulham",
        "bookmakers": []
      },
      {
        "id": "bad-time",
        "sport_key": "soccer_epl",
        "commence_time": "tomorrow",
        "home_team": "Leeds",
        "away_team": "Wolves",
        "bookmakers": [
          {
            "key": "pinnacle",
            "title": "Pinnacle",
            "last_update": "2026-10-16T09:12:44Z",
            "markets": [
              { "key": "h2h", "outcomes": [
                { "name": "Leeds", "price": 2.5 },
                { "name": "Wolves", "price": 2.9 }
              ] }
            ]
          }
        ]
      }
    ]"#;

    #[test]
    fn test_api_sport_key_mapping() {
        assert_eq!(api_sport_key("basketball"), "basketball_nba");
        assert_eq!(api_sport_key("soccer-epl"), "soccer_epl");
        assert_eq!(api_sport_key("tennis_wta"), "tennis_wta");
    }

    #[test]
    fn test_normalize_keeps_only_complete_h2h_bookmakers() {
        let events: Vec<TheOddsApiEvent> = serde_json::from_str(SAMPLE).unwrap();
        let updates = normalize_events(events, "soccer-epl", OddsFormat::Decimal);

        assert_eq!(updates.len(), 1);
        let update = &updates[0];
        assert_eq!(update.event_id, "e912304de2b2ce35b473ce2ecd3d1502");
        assert_eq!(update.sport, "soccer-epl");
        assert_eq!(update.home_team, "Arsenal");
        assert_eq!(update.commence_time.to_rfc3339(), "2026-10-17T14:00:00+00:00");

        // Betfair has no h2h market, Unibet is missing the away price
        assert_eq!(update.bookmakers.len(), 1);
        let bm = &update.bookmakers[0];
        assert_eq!(bm.name, "Pinnacle");
        assert_eq!(bm.home_odds, 2.10);
        assert_eq!(bm.away_odds, 3.60);
        assert_eq!(bm.draw_odds, Some(3.40));
        assert!(bm.last_update.is_some());
    }

    #[test]
    fn test_normalize_converts_american_prices() {
        let raw = r#"[{
            "id": "nba-1",
            "sport_key": "basketball_nba",
            "commence_time": "2026-10-20T23:30:00Z",
            "home_team": "Boston Celtics",
            "away_team": "New York Knicks",
            "bookmakers": [{
                "key": "draftkings",
                "title": "DraftKings",
                "last_update": "2026-10-16T09:12:44Z",
                "markets": [{ "key": "h2h", "outcomes": [
                    { "name": "Boston Celtics", "price": -150 },
                    { "name": "New York Knicks", "price": 130 }
                ] }]
            }]
        }]"#;
        let events: Vec<TheOddsApiEvent> = serde_json::from_str(raw).unwrap();
        let updates = normalize_events(events, "basketball", OddsFormat::American);

        let bm = &updates[0].bookmakers[0];
        assert!((bm.home_odds - 1.6667).abs() < 0.0001);
        assert!((bm.away_odds - 2.30).abs() < 1e-9);
        assert_eq!(bm.draw_odds, None);
    }

    #[test]
    fn test_odds_url_includes_bookmakers_when_set() {
        let api = TheOddsApi::new(
            "KEY".to_string(),
            "https://api.the-odds-api.com/",
            "eu",
            "pinnacle,unibet_eu",
            OddsFormat::Decimal,
        );
        let url = api.odds_url("soccer_epl");
        assert!(url.starts_with("https://api.the-odds-api.com/v4/sports/soccer_epl/odds?apiKey=KEY"));
        assert!(url.contains("regions=eu"));
        assert!(url.contains("oddsFormat=decimal"));
        assert!(url.ends_with("&bookmakers=pinnacle,unibet_eu"));

        let api = TheOddsApi::new("KEY".into(), "https://x", "uk", "", OddsFormat::American);
        let url = api.odds_url("mma_mixed_martial_arts");
        assert!(!url.contains("bookmakers="));
        assert!(url.contains("oddsFormat=american"));
    }
}
