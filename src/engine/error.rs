use super::allocator::Side;
use super::matching::MatchStage;
use thiserror::Error;

/// Domain rule violations raised by the allocator, the manual-entry tool and
/// the match lifecycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("decimal odds must be greater than 1.0, got {odds}")]
    OddsNotAboveOne { odds: f64 },

    #[error("pool size must be positive, got {pool}")]
    NonPositivePool { pool: f64 },

    #[error("no arbitrage: implied probabilities sum to {implied_sum:.4} (must be < 1)")]
    NoArbitrage { implied_sum: f64 },

    #[error("countdown must be at least one minute")]
    ZeroCountdown,

    #[error("{field} cannot be empty")]
    EmptyField { field: &'static str },

    #[error("both participants chose the same outcome")]
    SameOutcome,

    #[error("cannot {action} a match in stage {stage:?}")]
    InvalidStage {
        action: &'static str,
        stage: MatchStage,
    },

    #[error("deposit for side {side:?} is {received:.2}, required {required:.2}")]
    InsufficientDeposit {
        side: Side,
        required: f64,
        received: f64,
    },

    #[error("deposit for side {side:?} already recorded")]
    DepositAlreadyRecorded { side: Side },
}
