pub mod allocator;
pub mod detector;
pub mod error;
pub mod manual;
pub mod matching;
pub mod odds;

pub use allocator::{Allocation, ExecutionGuard, ExecutionVerdict, Settlement, Side};
pub use detector::{ArbitrageOpportunity, Leg, MarketKind, Outcome};
pub use error::EngineError;
pub use matching::{CancelReason, ExecutionOutcome, MatchQueue, MatchStage, MatchedPair, Participant};
