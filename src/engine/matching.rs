//! Pairing participants on opposite outcomes and walking the pair through
//! deposit, execution and settlement.

use super::allocator::{Allocation, ExecutionGuard, ExecutionVerdict, Settlement, Side};
use super::detector::Outcome;
use super::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

// Cent tolerance for amounts that went through float formatting.
const DEPOSIT_TOLERANCE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchStage {
    Matched,
    Funded,
    Executed,
    Settled,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: String,
    pub outcome: Outcome,
    pub bookmaker: String,
    pub odds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refund {
    pub user_id: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    /// Recalculated margin at or below the guard's minimum.
    MarginTooThin,
    /// Recalculated deposits exceed what was paid in.
    Underfunded,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Executed(Allocation),
    Cancelled {
        reason: CancelReason,
        profit_margin: f64,
        refunds: Vec<Refund>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchedPair {
    pub id: u64,
    pub event_id: String,
    pub a: Participant,
    pub b: Participant,
    pub allocation: Allocation,
    deposit_a: Option<f64>,
    deposit_b: Option<f64>,
    stage: MatchStage,
}

impl MatchedPair {
    pub fn new(
        id: u64,
        event_id: &str,
        a: Participant,
        b: Participant,
        pool: f64,
    ) -> Result<Self, EngineError> {
        if a.outcome == b.outcome {
            return Err(EngineError::SameOutcome);
        }
        let allocation = Allocation::new(a.odds, b.odds, pool)?;
        Ok(Self {
            id,
            event_id: event_id.to_string(),
            a,
            b,
            allocation,
            deposit_a: None,
            deposit_b: None,
            stage: MatchStage::Matched,
        })
    }

    pub fn stage(&self) -> MatchStage {
        self.stage
    }

    pub fn participant(&self, side: Side) -> &Participant {
        match side {
            Side::A => &self.a,
            Side::B => &self.b,
        }
    }

    pub fn deposit_received(&self, side: Side) -> Option<f64> {
        match side {
            Side::A => self.deposit_a,
            Side::B => self.deposit_b,
        }
    }

    /// Record a participant's deposit. Moves to `Funded` once both are in.
    pub fn record_deposit(&mut self, side: Side, amount: f64) -> Result<MatchStage, EngineError> {
        if self.stage != MatchStage::Matched {
            return Err(EngineError::InvalidStage {
                action: "deposit into",
                stage: self.stage,
            });
        }
        if self.deposit_received(side).is_some() {
            return Err(EngineError::DepositAlreadyRecorded { side });
        }
        let required = self.allocation.deposit(side);
        if !(amount + DEPOSIT_TOLERANCE >= required) {
            return Err(EngineError::InsufficientDeposit {
                side,
                required,
                received: amount,
            });
        }

        match side {
            Side::A => self.deposit_a = Some(amount),
            Side::B => self.deposit_b = Some(amount),
        }
        if self.deposit_a.is_some() && self.deposit_b.is_some() {
            self.stage = MatchStage::Funded;
            tracing::info!(match_id = self.id, event_id = %self.event_id, "match funded");
        }
        Ok(self.stage)
    }

    fn refunds(&self) -> Vec<Refund> {
        [(Side::A, &self.a), (Side::B, &self.b)]
            .into_iter()
            .filter_map(|(side, p)| {
                self.deposit_received(side).map(|amount| Refund {
                    user_id: p.user_id.clone(),
                    amount,
                })
            })
            .collect()
    }

    /// Abandon the match before execution; every deposit received is refunded.
    pub fn cancel(&mut self) -> Result<Vec<Refund>, EngineError> {
        match self.stage {
            MatchStage::Matched | MatchStage::Funded => {
                self.stage = MatchStage::Cancelled;
                tracing::info!(match_id = self.id, "match cancelled");
                Ok(self.refunds())
            }
            stage => Err(EngineError::InvalidStage {
                action: "cancel",
                stage,
            }),
        }
    }

    /// Recalculate with the odds available now. Below the guard's threshold,
    /// or when the new deposits exceed the funds held, the match is cancelled
    /// and refunded. Otherwise the recalculated stakes and edge replace the
    /// original ones while the deposits stay at what was actually received.
    pub fn execute(
        &mut self,
        odds_a: f64,
        odds_b: f64,
        guard: &ExecutionGuard,
    ) -> Result<ExecutionOutcome, EngineError> {
        if self.stage != MatchStage::Funded {
            return Err(EngineError::InvalidStage {
                action: "execute",
                stage: self.stage,
            });
        }
        let (Some(held_a), Some(held_b)) = (self.deposit_a, self.deposit_b) else {
            return Err(EngineError::InvalidStage {
                action: "execute",
                stage: self.stage,
            });
        };

        let allocation = match guard.check(odds_a, odds_b, self.allocation.pool)? {
            ExecutionVerdict::Proceed(allocation) => allocation,
            ExecutionVerdict::Cancel { profit_margin, .. } => {
                return Ok(self.cancel_execution(CancelReason::MarginTooThin, profit_margin));
            }
        };

        if allocation.deposit_a > held_a + DEPOSIT_TOLERANCE
            || allocation.deposit_b > held_b + DEPOSIT_TOLERANCE
        {
            tracing::warn!(
                match_id = self.id,
                required_a = allocation.deposit_a,
                required_b = allocation.deposit_b,
                held_a,
                held_b,
                "recalculated deposits exceed funds held, cancelling"
            );
            return Ok(self.cancel_execution(CancelReason::Underfunded, allocation.profit_margin));
        }

        let allocation = allocation.with_deposits(held_a, held_b);
        self.a.odds = odds_a;
        self.b.odds = odds_b;
        self.allocation = allocation.clone();
        self.stage = MatchStage::Executed;
        tracing::info!(
            match_id = self.id,
            margin = format!("{:.4}", allocation.profit_margin),
            "match executed"
        );
        Ok(ExecutionOutcome::Executed(allocation))
    }

    fn cancel_execution(&mut self, reason: CancelReason, profit_margin: f64) -> ExecutionOutcome {
        self.stage = MatchStage::Cancelled;
        ExecutionOutcome::Cancelled {
            reason,
            profit_margin,
            refunds: self.refunds(),
        }
    }

    pub fn settle(&mut self, winner: Side, platform_cut: f64) -> Result<Settlement, EngineError> {
        if self.stage != MatchStage::Executed {
            return Err(EngineError::InvalidStage {
                action: "settle",
                stage: self.stage,
            });
        }
        let settlement = self.allocation.settle(winner, platform_cut);
        if !settlement.is_balanced() {
            tracing::warn!(
                match_id = self.id,
                distributed = settlement.distributed_edge(),
                edge = settlement.total_edge,
                "edge split does not add up"
            );
        }
        self.stage = MatchStage::Settled;
        Ok(settlement)
    }
}

/// FIFO pairing per event. A newcomer is paired with the longest-waiting
/// participant on a different outcome whose odds clear the execution guard.
pub struct MatchQueue {
    waiting: HashMap<String, VecDeque<Participant>>, // event_id -> queue
    pool: f64,
    guard: ExecutionGuard,
    next_id: u64,
}

impl MatchQueue {
    pub fn new(pool: f64, guard: ExecutionGuard) -> Self {
        Self {
            waiting: HashMap::new(),
            pool,
            guard,
            next_id: 1,
        }
    }

    /// Returns the new pair, or `None` if the participant was queued (or was
    /// already waiting on this event).
    pub fn join(&mut self, event_id: &str, participant: Participant) -> Option<MatchedPair> {
        let queue = self.waiting.entry(event_id.to_string()).or_default();
        if queue.iter().any(|p| p.user_id == participant.user_id) {
            return None;
        }

        let guard = self.guard;
        let candidate = queue.iter().position(|waiting| {
            waiting.outcome != participant.outcome && guard.clears(waiting.odds, participant.odds)
        });

        let Some(idx) = candidate else {
            tracing::debug!(event_id, user = %participant.user_id, "queued for match");
            queue.push_back(participant);
            return None;
        };

        let opponent = queue.remove(idx)?;
        if queue.is_empty() {
            self.waiting.remove(event_id);
        }

        let id = self.next_id;
        match MatchedPair::new(id, event_id, opponent, participant, self.pool) {
            Ok(pair) => {
                self.next_id += 1;
                tracing::info!(
                    match_id = id,
                    event_id,
                    a = %pair.a.user_id,
                    b = %pair.b.user_id,
                    "participants matched"
                );
                Some(pair)
            }
            Err(e) => {
                // Candidate was checked above, so this only guards odd float input.
                tracing::warn!(event_id, error = %e, "failed to build match");
                None
            }
        }
    }

    /// Remove a waiting participant. Returns true if they were queued.
    pub fn leave(&mut self, event_id: &str, user_id: &str) -> bool {
        let Some(queue) = self.waiting.get_mut(event_id) else {
            return false;
        };
        let before = queue.len();
        queue.retain(|p| p.user_id != user_id);
        let removed = queue.len() < before;
        if queue.is_empty() {
            self.waiting.remove(event_id);
        }
        removed
    }

    pub fn waiting_count(&self, event_id: &str) -> usize {
        self.waiting.get(event_id).map_or(0, VecDeque::len)
    }
}
