//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON, internally tagged by `type`. Money and multipliers
//! travel as numbers with two decimals.

use serde::{Deserialize, Serialize};

use crate::core::money::Multiplier;
use crate::game::events::RoundEvent;
use crate::game::ledger::{BetRejection, BetResult, CashoutFailure};
use crate::game::scheduler::RoundSnapshot;
use crate::game::state::{PlayerId, RoundId, RoundStatus};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Stake an amount on the current round.
    PlaceBet { amount: f64 },

    /// Cash out at the current multiplier.
    Cashout,

    /// Ping for latency measurement.
    Ping { timestamp: u64 },
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First message on every connection.
    Welcome(WelcomeInfo),

    /// Betting window opened.
    RoundStart { round_id: RoundId, betting_seconds: u32 },

    /// Betting countdown.
    BetCountdown { round_id: RoundId, seconds_left: u32 },

    /// Betting window closed.
    BetLocked { round_id: RoundId },

    /// Multiplier update.
    Tick {
        round_id: RoundId,
        status: RoundStatus,
        multiplier: f64,
    },

    /// Round crashed and settled.
    RoundEnd(RoundEndInfo),

    /// Your bet was recorded.
    BetAccepted { round_id: RoundId, amount: f64 },

    /// Your bet was refused.
    BetRejected(Rejection),

    /// Your cashout was locked in.
    CashedOut {
        round_id: RoundId,
        cashed_at: f64,
        payout: f64,
    },

    /// Your cashout was refused.
    CashoutFailed(Rejection),

    /// Another player cashed out.
    PlayerCashed {
        round_id: RoundId,
        player: String,
        cashed_at: f64,
        payout: f64,
    },

    /// Active bet count changed.
    BetsUpdate { round_id: RoundId, total_bets: usize },

    /// Pong response.
    Pong { timestamp: u64, server_time: u64 },

    /// Error message.
    Error(ServerError),

    /// Server is shutting down.
    Shutdown { reason: String },
}

/// Connection greeting with the state of the live round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    /// Id assigned to this connection.
    pub client_id: String,
    /// Server version.
    pub server_version: String,
    /// Current round (`0` before the first round opens).
    pub round_id: RoundId,
    /// Current phase.
    pub status: RoundStatus,
    /// Current multiplier.
    pub multiplier: f64,
    /// Seconds left to bet, while betting.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seconds_left: Option<u32>,
}

impl WelcomeInfo {
    /// Build from an engine snapshot.
    pub fn new(client_id: PlayerId, server_version: &str, snapshot: &RoundSnapshot) -> Self {
        Self {
            client_id: client_id.to_uuid_string(),
            server_version: server_version.to_string(),
            round_id: snapshot.round_id,
            status: snapshot.status,
            multiplier: snapshot.multiplier.as_f64(),
            seconds_left: snapshot.seconds_left,
        }
    }
}

/// Settlement summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundEndInfo {
    /// Round identifier.
    pub round_id: RoundId,
    /// Where the multiplier stopped.
    pub crash_at: f64,
    /// One entry per bet.
    pub results: Vec<BetResultInfo>,
}

/// One settled bet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetResultInfo {
    /// Client id of the bettor.
    pub player: String,
    /// Stake.
    pub amount: f64,
    /// Cashout multiplier, `null` if the bet rode the crash.
    pub cashed_at: Option<f64>,
    /// Payout (`0` for a lost bet).
    pub payout: f64,
}

impl From<&BetResult> for BetResultInfo {
    fn from(result: &BetResult) -> Self {
        Self {
            player: result.player_id.to_uuid_string(),
            amount: result.amount.as_f64(),
            cashed_at: result.cashed_at.map(Multiplier::as_f64),
            payout: result.payout.as_f64(),
        }
    }
}

/// A refused request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rejection {
    /// Round the request was made against.
    pub round_id: RoundId,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable reason.
    pub reason: String,
}

impl Rejection {
    fn bet(round_id: RoundId, reason: &BetRejection) -> Self {
        Self {
            round_id,
            code: reason.code().to_string(),
            reason: reason.to_string(),
        }
    }

    fn cashout(round_id: RoundId, reason: &CashoutFailure) -> Self {
        Self {
            round_id,
            code: reason.code().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be parsed.
    InvalidInput,
    /// Engine is not running.
    InternalError,
}

impl ServerMessage {
    /// `error` message with a code.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        ServerMessage::Error(ServerError {
            code,
            message: message.into(),
        })
    }
}

// =============================================================================
// ENGINE EVENT CONVERSION
// =============================================================================

impl From<&RoundEvent> for ServerMessage {
    fn from(event: &RoundEvent) -> Self {
        match event {
            RoundEvent::RoundStarted { round_id, betting_seconds } => ServerMessage::RoundStart {
                round_id: *round_id,
                betting_seconds: *betting_seconds,
            },
            RoundEvent::BetCountdown { round_id, seconds_left } => ServerMessage::BetCountdown {
                round_id: *round_id,
                seconds_left: *seconds_left,
            },
            RoundEvent::BetLocked { round_id } => ServerMessage::BetLocked { round_id: *round_id },
            RoundEvent::Tick { round_id, status, multiplier } => ServerMessage::Tick {
                round_id: *round_id,
                status: *status,
                multiplier: multiplier.as_f64(),
            },
            RoundEvent::RoundEnded(settlement) => ServerMessage::RoundEnd(RoundEndInfo {
                round_id: settlement.round_id,
                crash_at: settlement.crash_at.as_f64(),
                results: settlement.results.iter().map(BetResultInfo::from).collect(),
            }),
            RoundEvent::BetAccepted { round_id, amount } => ServerMessage::BetAccepted {
                round_id: *round_id,
                amount: amount.as_f64(),
            },
            RoundEvent::BetRejected { round_id, reason } => {
                ServerMessage::BetRejected(Rejection::bet(*round_id, reason))
            }
            RoundEvent::CashedOut { round_id, cashed_at, payout } => ServerMessage::CashedOut {
                round_id: *round_id,
                cashed_at: cashed_at.as_f64(),
                payout: payout.as_f64(),
            },
            RoundEvent::CashoutFailed { round_id, reason } => {
                ServerMessage::CashoutFailed(Rejection::cashout(*round_id, reason))
            }
            RoundEvent::PlayerCashed { round_id, player_tag, cashed_at, payout } => {
                ServerMessage::PlayerCashed {
                    round_id: *round_id,
                    player: player_tag.clone(),
                    cashed_at: cashed_at.as_f64(),
                    payout: payout.as_f64(),
                }
            }
            RoundEvent::BetsUpdated { round_id, total_bets } => ServerMessage::BetsUpdate {
                round_id: *round_id,
                total_bets: *total_bets,
            },
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Milliseconds since the Unix epoch.
pub fn server_time_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
