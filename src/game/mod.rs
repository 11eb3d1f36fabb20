//! Game Logic Module
//!
//! The round lifecycle engine. Everything here is in-memory; the only clock
//! reads are the scheduler's phase timers.
//!
//! ## Module Structure
//!
//! - `state`: Player and round identifiers, round status
//! - `sampler`: Heavy-tailed crash point draw
//! - `growth`: Multiplier curve over elapsed time
//! - `ledger`: Per-round bets, cashouts and settlement
//! - `round`: Phase state machine over one ledger
//! - `events`: Outbound events and the gateway trait
//! - `scheduler`: Single-owner task driving rounds

pub mod state;
pub mod sampler;
pub mod growth;
pub mod ledger;
pub mod round;
pub mod events;
pub mod scheduler;

// Re-export key types
pub use state::{PlayerId, RoundId, RoundStatus};
pub use sampler::CrashSampler;
pub use growth::GrowthCurve;
pub use ledger::{Bet, BetLedger, BetRejection, BetResult, Cashout, CashoutFailure};
pub use round::{EngineError, Round, Settlement, TickOutcome};
pub use events::{Audience, BroadcastGateway, RecordingGateway, RoundEvent};
pub use scheduler::{CrashSource, EngineHandle, RoundScheduler, RoundSnapshot, SeededCrashSource};
