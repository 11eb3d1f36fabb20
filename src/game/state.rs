//! Round Identifiers and Status
//!
//! Small value types shared by the ledger, the round and the wire layer.
//! Uses BTreeMap-friendly `Ord` ids so settlement order is stable.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Opaque session identifier (UUID as bytes).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub [u8; 16]);

impl PlayerId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Fresh random id for a new connection.
    pub fn random() -> Self {
        Self(*uuid::Uuid::new_v4().as_bytes())
    }

    /// Create from UUID string.
    pub fn from_uuid_str(s: &str) -> Option<Self> {
        uuid::Uuid::parse_str(s).ok().map(|u| Self(*u.as_bytes()))
    }

    /// Convert to UUID string.
    pub fn to_uuid_string(&self) -> String {
        uuid::Uuid::from_bytes(self.0).to_string()
    }

    /// Get raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Short hex prefix for logs.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Tag shown to other players when this player cashes out.
    ///
    /// Stable within a round, unlinkable across rounds.
    pub fn anonymized(&self, round_id: RoundId) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"crash-round-player:");
        hasher.update(self.0);
        hasher.update(round_id.0.to_le_bytes());
        let hash = hasher.finalize();
        hex::encode(&hash[..4])
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_uuid_string())
    }
}

// =============================================================================
// ROUND ID
// =============================================================================

/// Monotonic round number. `0` is reserved for "no round yet".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoundId(pub u64);

impl RoundId {
    /// Placeholder before the first round opens.
    pub const NONE: RoundId = RoundId(0);

    /// The id after this one.
    pub fn next(self) -> RoundId {
        RoundId(self.0 + 1)
    }
}

impl fmt::Display for RoundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// ROUND STATUS
// =============================================================================

/// Phase of a round.
///
/// `Idle -> Betting -> Locked -> Running -> Ended -> (next round) Betting`
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    /// No round opened yet
    #[default]
    Idle,
    /// Accepting bets
    Betting,
    /// Bets closed, waiting for takeoff
    Locked,
    /// Multiplier climbing
    Running,
    /// Crashed and settled
    Ended,
}

impl RoundStatus {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            RoundStatus::Idle => "idle",
            RoundStatus::Betting => "betting",
            RoundStatus::Locked => "locked",
            RoundStatus::Running => "running",
            RoundStatus::Ended => "ended",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
