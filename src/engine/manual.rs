//! Operator tool for entering a two-way opportunity by hand.

use super::detector::{split_stakes, ArbitrageOpportunity, BestQuote, MarketKind, Outcome};
use super::error::EngineError;
use super::odds::{implied_sum, round_cents};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ManualEntry {
    pub sport_label: String,
    pub home_team: String,
    pub away_team: String,
    pub bookmaker_a: String,
    pub odds_a: f64,
    pub bookmaker_b: String,
    pub odds_b: f64,
    pub pool: f64,
    pub countdown_min: u32,
}

fn require(value: &str, field: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        Err(EngineError::EmptyField { field })
    } else {
        Ok(())
    }
}

impl ManualEntry {
    pub fn validate(&self) -> Result<(), EngineError> {
        require(&self.home_team, "home_team")?;
        require(&self.away_team, "away_team")?;
        require(&self.bookmaker_a, "bookmaker_a")?;
        require(&self.bookmaker_b, "bookmaker_b")?;

        for odds in [self.odds_a, self.odds_b] {
            if !(odds.is_finite() && odds > 1.0) {
                return Err(EngineError::OddsNotAboveOne { odds });
            }
        }
        if !(self.pool.is_finite() && self.pool > 0.0) {
            return Err(EngineError::NonPositivePool { pool: self.pool });
        }
        if self.countdown_min == 0 {
            return Err(EngineError::ZeroCountdown);
        }

        let sum = implied_sum(&[self.odds_a, self.odds_b]);
        if sum >= 1.0 {
            return Err(EngineError::NoArbitrage { implied_sum: sum });
        }
        Ok(())
    }

    /// Build the opportunity. Side A is the home outcome, side B the away
    /// outcome; both expiry and start are set to the end of the countdown.
    pub fn into_opportunity(self, now: DateTime<Utc>) -> Result<ArbitrageOpportunity, EngineError> {
        self.validate()?;

        let quotes = [
            BestQuote {
                outcome: Outcome::Home,
                bookmaker: self.bookmaker_a.clone(),
                price: self.odds_a,
            },
            BestQuote {
                outcome: Outcome::Away,
                bookmaker: self.bookmaker_b.clone(),
                price: self.odds_b,
            },
        ];
        let split = split_stakes(&[&quotes[0], &quotes[1]], self.pool).ok_or_else(|| {
            EngineError::NoArbitrage {
                implied_sum: implied_sum(&[self.odds_a, self.odds_b]),
            }
        })?;

        let expires_at = now + Duration::minutes(i64::from(self.countdown_min));
        let min_deposit = split.legs.iter().map(|l| l.stake).fold(0.0_f64, f64::max);

        tracing::info!(
            home = %self.home_team,
            away = %self.away_team,
            margin = format!("{:.4}", split.profit_margin),
            pool = self.pool,
            "manual opportunity created"
        );

        Ok(ArbitrageOpportunity {
            event_id: format!("manual-{}", now.timestamp_millis()),
            sport: "manual".to_string(),
            sport_label: self.sport_label,
            home_team: self.home_team,
            away_team: self.away_team,
            commence_time: expires_at,
            kind: MarketKind::TwoWay,
            implied_sum: split.implied_sum,
            profit_margin: split.profit_margin,
            total_stake: self.pool,
            legs: split.legs,
            expected_profit: round_cents(self.pool * split.profit_margin),
            min_deposit,
            detected_at: now,
            expires_at,
        })
    }
}
