//! Cross-bookmaker arbitrage detection.
//!
//! For each event the best decimal price per outcome is taken across all
//! bookmakers. If the implied probabilities of those best prices sum to less
//! than one, backing every outcome at its best price pays out the same amount
//! whichever outcome wins, and that amount exceeds the total staked.

use super::odds::{implied_probability, is_priced, round_cents};
use crate::config::{DetectorConfig, MarketPrecedence};
use crate::feed::types::{BookmakerOdds, OddsUpdate};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Away,
    Draw,
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Home => "HOME",
            Outcome::Away => "AWAY",
            Outcome::Draw => "DRAW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarketKind {
    TwoWay,
    ThreeWay,
}

/// Best available price for one outcome and the bookmaker offering it.
#[derive(Debug, Clone, PartialEq)]
pub struct BestQuote {
    pub outcome: Outcome,
    pub bookmaker: String,
    pub price: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BestPrices {
    pub home: Option<BestQuote>,
    pub away: Option<BestQuote>,
    pub draw: Option<BestQuote>,
}

impl BestPrices {
    pub fn priced_count(&self) -> usize {
        [&self.home, &self.away, &self.draw]
            .iter()
            .filter(|q| q.is_some())
            .count()
    }
}

/// One side of an opportunity: where to bet, at what price, and how much.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub outcome: Outcome,
    pub bookmaker: String,
    pub price: f64,
    pub stake: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub event_id: String,
    pub sport: String,
    pub sport_label: String,
    pub home_team: String,
    pub away_team: String,
    pub commence_time: DateTime<Utc>,
    pub kind: MarketKind,
    pub implied_sum: f64,
    /// Fraction, e.g. 0.036 for 3.6%.
    pub profit_margin: f64,
    pub total_stake: f64,
    pub legs: Vec<Leg>,
    /// stake x margin
    pub expected_profit: f64,
    /// Largest single leg stake.
    pub min_deposit: f64,
    pub detected_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ArbitrageOpportunity {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    pub fn leg(&self, outcome: Outcome) -> Option<&Leg> {
        self.legs.iter().find(|l| l.outcome == outcome)
    }

    pub fn matchup(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }
}

/// Pick the highest price per outcome. Ties keep the first bookmaker seen.
pub fn best_prices(bookmakers: &[BookmakerOdds]) -> BestPrices {
    fn consider(slot: &mut Option<BestQuote>, outcome: Outcome, bookmaker: &str, price: f64) {
        if !is_priced(price) {
            return;
        }
        let better = slot.as_ref().map_or(true, |best| price > best.price);
        if better {
            *slot = Some(BestQuote {
                outcome,
                bookmaker: bookmaker.to_string(),
                price,
            });
        }
    }

    let mut best = BestPrices::default();
    for bm in bookmakers {
        consider(&mut best.home, Outcome::Home, &bm.name, bm.home_odds);
        consider(&mut best.away, Outcome::Away, &bm.name, bm.away_odds);
        if let Some(draw) = bm.draw_odds {
            consider(&mut best.draw, Outcome::Draw, &bm.name, draw);
        }
    }
    best
}

/// Result of sizing a set of quotes against a nominal stake.
#[derive(Debug, Clone, PartialEq)]
pub struct StakeSplit {
    pub implied_sum: f64,
    pub profit_margin: f64,
    pub legs: Vec<Leg>,
}

/// Size stakes across `quotes` so every outcome pays the same.
///
/// Returns `None` unless there are at least two priced quotes whose implied
/// probabilities sum to strictly less than one.
pub fn split_stakes(quotes: &[&BestQuote], total_stake: f64) -> Option<StakeSplit> {
    if quotes.len() < 2 || quotes.iter().any(|q| !is_priced(q.price)) {
        return None;
    }

    let implied_sum: f64 = quotes.iter().map(|q| implied_probability(q.price)).sum();
    if implied_sum >= 1.0 {
        return None;
    }

    let legs = quotes
        .iter()
        .map(|q| Leg {
            outcome: q.outcome,
            bookmaker: q.bookmaker.clone(),
            price: q.price,
            stake: round_cents(implied_probability(q.price) / implied_sum * total_stake),
        })
        .collect();

    Some(StakeSplit {
        implied_sum,
        profit_margin: 1.0 - implied_sum,
        legs,
    })
}

/// Expiry is the earlier of "window from now" and "cutoff before start".
pub fn expiry_time(
    now: DateTime<Utc>,
    commence_time: DateTime<Utc>,
    config: &DetectorConfig,
) -> DateTime<Utc> {
    let by_window = now + Duration::minutes(config.expiry_window_min);
    let by_start = commence_time - Duration::minutes(config.pre_start_cutoff_min);
    by_window.min(by_start)
}

fn two_way(best: &BestPrices, stake: f64) -> Option<(MarketKind, StakeSplit)> {
    let (home, away) = (best.home.as_ref()?, best.away.as_ref()?);
    split_stakes(&[home, away], stake).map(|s| (MarketKind::TwoWay, s))
}

fn three_way(best: &BestPrices, stake: f64) -> Option<(MarketKind, StakeSplit)> {
    let (home, away, draw) = (best.home.as_ref()?, best.away.as_ref()?, best.draw.as_ref()?);
    split_stakes(&[home, away, draw], stake).map(|s| (MarketKind::ThreeWay, s))
}

/// Evaluate one event. Pure: the same quotes, config and `now` always give
/// the same result.
pub fn detect(
    update: &OddsUpdate,
    sport_label: &str,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> Option<ArbitrageOpportunity> {
    let best = best_prices(&update.bookmakers);
    if best.priced_count() < 2 {
        return None;
    }

    let stake = config.default_stake;
    let found = match config.precedence {
        MarketPrecedence::TwoWayFirst => two_way(&best, stake).or_else(|| three_way(&best, stake)),
        MarketPrecedence::ThreeWayFirst => three_way(&best, stake).or_else(|| two_way(&best, stake)),
    };
    let (kind, split) = found?;

    let min_deposit = split
        .legs
        .iter()
        .map(|l| l.stake)
        .fold(0.0_f64, f64::max);

    Some(ArbitrageOpportunity {
        event_id: update.event_id.clone(),
        sport: update.sport.clone(),
        sport_label: sport_label.to_string(),
        home_team: update.home_team.clone(),
        away_team: update.away_team.clone(),
        commence_time: update.commence_time,
        kind,
        implied_sum: split.implied_sum,
        profit_margin: split.profit_margin,
        total_stake: stake,
        legs: split.legs,
        expected_profit: round_cents(stake * split.profit_margin),
        min_deposit,
        detected_at: now,
        expires_at: expiry_time(now, update.commence_time, config),
    })
}

/// Evaluate every event of one sport.
pub fn detect_all(
    updates: &[OddsUpdate],
    sport_label: &str,
    config: &DetectorConfig,
    now: DateTime<Utc>,
) -> Vec<ArbitrageOpportunity> {
    updates
        .iter()
        .filter_map(|u| detect(u, sport_label, config, now))
        .collect()
}
