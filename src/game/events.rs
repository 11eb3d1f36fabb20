//! Round Events
//!
//! Everything the engine tells the outside world, and the gateway trait it
//! tells it through. The engine calls the gateway; nothing calls back.

use std::sync::Mutex;

use crate::core::money::{Cents, Multiplier};
use crate::game::ledger::{BetRejection, CashoutFailure};
use crate::game::round::Settlement;
use crate::game::state::{PlayerId, RoundId, RoundStatus};

/// Who receives an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Audience {
    /// Every connected session.
    All,
    /// One session.
    Player(PlayerId),
    /// Every session except one.
    AllExcept(PlayerId),
}

impl Audience {
    /// Does this audience include `player`.
    pub fn includes(&self, player: &PlayerId) -> bool {
        match self {
            Audience::All => true,
            Audience::Player(p) => p == player,
            Audience::AllExcept(p) => p != player,
        }
    }
}

/// Engine notifications.
#[derive(Clone, Debug, PartialEq)]
pub enum RoundEvent {
    /// Betting window opened.
    RoundStarted {
        round_id: RoundId,
        betting_seconds: u32,
    },

    /// Once per second while betting.
    BetCountdown {
        round_id: RoundId,
        seconds_left: u32,
    },

    /// Betting window closed.
    BetLocked {
        round_id: RoundId,
    },

    /// Multiplier update while running.
    Tick {
        round_id: RoundId,
        status: RoundStatus,
        multiplier: Multiplier,
    },

    /// Crash reached, all bets settled.
    RoundEnded(Settlement),

    /// Reply: bet recorded.
    BetAccepted {
        round_id: RoundId,
        amount: Cents,
    },

    /// Reply: bet refused.
    BetRejected {
        round_id: RoundId,
        reason: BetRejection,
    },

    /// Reply: cashout locked in.
    CashedOut {
        round_id: RoundId,
        cashed_at: Multiplier,
        payout: Cents,
    },

    /// Reply: cashout refused.
    CashoutFailed {
        round_id: RoundId,
        reason: CashoutFailure,
    },

    /// Someone else cashed out.
    PlayerCashed {
        round_id: RoundId,
        player_tag: String,
        cashed_at: Multiplier,
        payout: Cents,
    },

    /// Bet count after an accepted bet.
    BetsUpdated {
        round_id: RoundId,
        total_bets: usize,
    },
}

impl RoundEvent {
    /// Short name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            RoundEvent::RoundStarted { .. } => "round_start",
            RoundEvent::BetCountdown { .. } => "bet_countdown",
            RoundEvent::BetLocked { .. } => "bet_locked",
            RoundEvent::Tick { .. } => "tick",
            RoundEvent::RoundEnded(_) => "round_end",
            RoundEvent::BetAccepted { .. } => "bet_accepted",
            RoundEvent::BetRejected { .. } => "bet_rejected",
            RoundEvent::CashedOut { .. } => "cashed_out",
            RoundEvent::CashoutFailed { .. } => "cashout_failed",
            RoundEvent::PlayerCashed { .. } => "player_cashed",
            RoundEvent::BetsUpdated { .. } => "bets_update",
        }
    }
}

/// Fan-out channel to connected sessions.
///
/// Implementations must not block: the engine calls this while it holds
/// the round.
pub trait BroadcastGateway: Send + Sync {
    /// Deliver `event` to `audience`.
    fn publish(&self, audience: Audience, event: RoundEvent);

    /// Deliver to every session.
    fn broadcast(&self, event: RoundEvent) {
        self.publish(Audience::All, event);
    }

    /// Deliver to one session.
    fn send_to(&self, player: PlayerId, event: RoundEvent) {
        self.publish(Audience::Player(player), event);
    }

    /// Deliver to every session but one.
    fn broadcast_except(&self, player: PlayerId, event: RoundEvent) {
        self.publish(Audience::AllExcept(player), event);
    }
}

/// Gateway that keeps everything it is given. Used by tests and tools.
#[derive(Debug, Default)]
pub struct RecordingGateway {
    events: Mutex<Vec<(Audience, RoundEvent)>>,
}

impl RecordingGateway {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything published so far.
    pub fn events(&self) -> Vec<(Audience, RoundEvent)> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events whose audience includes `player`.
    pub fn seen_by(&self, player: &PlayerId) -> Vec<RoundEvent> {
        self.events()
            .into_iter()
            .filter(|(audience, _)| audience.includes(player))
            .map(|(_, event)| event)
            .collect()
    }

    /// Names of all events in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|(_, e)| e.name()).collect()
    }
}

impl BroadcastGateway for RecordingGateway {
    fn publish(&self, audience: Audience, event: RoundEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push((audience, event));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_includes() {
        let a = PlayerId::new([1; 16]);
        let b = PlayerId::new([2; 16]);
        assert!(Audience::All.includes(&a));
        assert!(Audience::Player(a).includes(&a));
        assert!(!Audience::Player(a).includes(&b));
        assert!(!Audience::AllExcept(a).includes(&a));
        assert!(Audience::AllExcept(a).includes(&b));
    }

    #[test]
    fn test_recording_gateway_filters() {
        let gateway = RecordingGateway::new();
        let a = PlayerId::new([1; 16]);
        let b = PlayerId::new([2; 16]);

        gateway.broadcast(RoundEvent::BetLocked { round_id: RoundId(3) });
        gateway.send_to(a, RoundEvent::BetAccepted { round_id: RoundId(3), amount: Cents(100) });
        gateway.broadcast_except(a, RoundEvent::BetsUpdated { round_id: RoundId(3), total_bets: 1 });

        assert_eq!(gateway.names(), vec!["bet_locked", "bet_accepted", "bets_update"]);
        assert_eq!(gateway.seen_by(&a).len(), 2);
        assert_eq!(gateway.seen_by(&b).len(), 2);
    }
}
