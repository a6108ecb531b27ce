//! Two-sided deposit and settlement arithmetic.
//!
//! Two matched participants back opposite outcomes of one event. Each funds the
//! opponent's stake plus the whole edge, so the pool can pay out whichever
//! outcome wins. After the result the edge is split between the platform and
//! both participants in proportion to their stakes.

use super::error::EngineError;
use super::odds::{implied_sum, round_cents};
use crate::config::SettlementConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl Side {
    pub fn opponent(self) -> Side {
        match self {
            Side::A => Side::B,
            Side::B => Side::A,
        }
    }
}

fn validate_odds(odds: f64) -> Result<(), EngineError> {
    if odds.is_finite() && odds > 1.0 {
        Ok(())
    } else {
        Err(EngineError::OddsNotAboveOne { odds })
    }
}

fn validate_pool(pool: f64) -> Result<(), EngineError> {
    if pool.is_finite() && pool > 0.0 {
        Ok(())
    } else {
        Err(EngineError::NonPositivePool { pool })
    }
}

/// Margin for a two-outcome pair: `1 - (1/odds_a + 1/odds_b)`.
pub fn two_way_margin(odds_a: f64, odds_b: f64) -> f64 {
    1.0 - implied_sum(&[odds_a, odds_b])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub odds_a: f64,
    pub odds_b: f64,
    pub pool: f64,
    pub implied_sum: f64,
    pub profit_margin: f64,
    pub stake_a: f64,
    pub stake_b: f64,
    /// pool x margin
    pub total_edge: f64,
    /// stake_b + total_edge
    pub deposit_a: f64,
    /// stake_a + total_edge
    pub deposit_b: f64,
}

impl Allocation {
    /// Size stakes, edge and deposits for a matched pair.
    pub fn new(odds_a: f64, odds_b: f64, pool: f64) -> Result<Self, EngineError> {
        validate_odds(odds_a)?;
        validate_odds(odds_b)?;
        validate_pool(pool)?;

        let sum = implied_sum(&[odds_a, odds_b]);
        if sum >= 1.0 {
            return Err(EngineError::NoArbitrage { implied_sum: sum });
        }
        let profit_margin = 1.0 - sum;

        let stake_a = round_cents((pool / odds_a) / sum);
        let stake_b = round_cents((pool / odds_b) / sum);
        let total_edge = round_cents(pool * profit_margin);

        Ok(Self {
            odds_a,
            odds_b,
            pool,
            implied_sum: sum,
            profit_margin,
            stake_a,
            stake_b,
            total_edge,
            deposit_a: round_cents(stake_b + total_edge),
            deposit_b: round_cents(stake_a + total_edge),
        })
    }

    /// Same stakes and edge, with the deposits replaced by the amounts
    /// actually held for each side.
    pub fn with_deposits(self, deposit_a: f64, deposit_b: f64) -> Self {
        Self {
            deposit_a,
            deposit_b,
            ..self
        }
    }

    pub fn stake(&self, side: Side) -> f64 {
        match side {
            Side::A => self.stake_a,
            Side::B => self.stake_b,
        }
    }

    pub fn odds(&self, side: Side) -> f64 {
        match side {
            Side::A => self.odds_a,
            Side::B => self.odds_b,
        }
    }

    pub fn deposit(&self, side: Side) -> f64 {
        match side {
            Side::A => self.deposit_a,
            Side::B => self.deposit_b,
        }
    }

    pub fn total_deposits(&self) -> f64 {
        self.deposit_a + self.deposit_b
    }

    /// Distribute the result once `winner`'s outcome has come in.
    pub fn settle(&self, winner: Side, platform_cut: f64) -> Settlement {
        let loser = winner.opponent();
        let participant_share = 1.0 - platform_cut;
        let winner_ratio = self.stake(winner) / self.pool;
        let loser_ratio = self.stake(loser) / self.pool;

        Settlement {
            winner,
            bookmaker_payout: round_cents(self.stake(winner) * self.odds(winner)),
            loser_recovery: self.deposit(loser),
            platform_share: round_cents(self.total_edge * platform_cut),
            winner_profit: round_cents(self.total_edge * winner_ratio * participant_share),
            loser_profit: round_cents(self.total_edge * loser_ratio * participant_share),
            total_edge: self.total_edge,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    pub winner: Side,
    /// Winning stake x winning odds, paid by the bookmaker.
    pub bookmaker_payout: f64,
    /// The loser gets their whole deposit back.
    pub loser_recovery: f64,
    pub platform_share: f64,
    pub winner_profit: f64,
    pub loser_profit: f64,
    pub total_edge: f64,
}

impl Settlement {
    pub fn distributed_edge(&self) -> f64 {
        self.platform_share + self.winner_profit + self.loser_profit
    }

    /// Shares add back up to the edge, allowing for cent rounding.
    pub fn is_balanced(&self) -> bool {
        (self.distributed_edge() - self.total_edge).abs() <= 0.02
    }
}

/// What to do with a funded match once the margin has been recalculated.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionVerdict {
    Proceed(Allocation),
    Cancel { profit_margin: f64, min_margin: f64 },
}

/// Recalculates the margin at execution time and cancels the match when the
/// edge has shrunk to the threshold or below.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionGuard {
    pub min_margin: f64,
}

impl Default for ExecutionGuard {
    fn default() -> Self {
        Self { min_margin: 0.005 }
    }
}

impl ExecutionGuard {
    pub fn new(min_margin: f64) -> Self {
        Self { min_margin }
    }

    pub fn from_config(config: &SettlementConfig) -> Self {
        Self::new(config.min_margin)
    }

    /// True when both prices are valid and their margin is above the minimum.
    pub fn clears(&self, odds_a: f64, odds_b: f64) -> bool {
        validate_odds(odds_a).is_ok()
            && validate_odds(odds_b).is_ok()
            && two_way_margin(odds_a, odds_b) > self.min_margin
    }

    pub fn check(&self, odds_a: f64, odds_b: f64, pool: f64) -> Result<ExecutionVerdict, EngineError> {
        validate_odds(odds_a)?;
        validate_odds(odds_b)?;
        validate_pool(pool)?;

        let profit_margin = two_way_margin(odds_a, odds_b);
        if profit_margin <= self.min_margin {
            tracing::warn!(
                margin = format!("{:.4}", profit_margin),
                min_margin = self.min_margin,
                "margin below threshold at execution, cancelling"
            );
            return Ok(ExecutionVerdict::Cancel {
                profit_margin,
                min_margin: self.min_margin,
            });
        }

        Ok(ExecutionVerdict::Proceed(Allocation::new(odds_a, odds_b, pool)?))
    }
}
