//! Bet Ledger
//!
//! Per-round map from player to bet. Owns every rule about placing a stake,
//! locking in a cashout and producing the settlement list.
//!
//! The ledger is only ever touched through `&mut self` by the round that
//! owns it, so a bet's `cashed_out_at` and `payout` always change together.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::money::{payout, AmountError, Cents, Multiplier};
use crate::game::round::EngineError;
use crate::game::state::{PlayerId, RoundId, RoundStatus};

// =============================================================================
// REJECTIONS
// =============================================================================

/// Why a bet was not accepted. No state changes on rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BetRejection {
    /// Round is not in its betting window.
    #[error("Betting closed")]
    BettingClosed,

    /// Amount is not a positive finite number.
    #[error("Invalid amount")]
    InvalidAmount,

    /// Amount is positive but rounds to less than one cent.
    #[error("Amount below 0.01")]
    BelowMinimum,

    /// Amount exceeds the configured maximum.
    #[error("Amount exceeds maximum bet of {max}")]
    AmountTooLarge {
        /// Configured ceiling.
        max: Cents,
    },

    /// Player already holds a bet this round.
    #[error("Bet already placed this round")]
    AlreadyPlaced,
}

impl BetRejection {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            BetRejection::BettingClosed => "betting_closed",
            BetRejection::InvalidAmount => "invalid_amount",
            BetRejection::BelowMinimum => "below_minimum",
            BetRejection::AmountTooLarge { .. } => "amount_too_large",
            BetRejection::AlreadyPlaced => "already_placed",
        }
    }
}

/// Why a cashout failed. No state changes on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CashoutFailure {
    /// Round is betting, locked or idle.
    #[error("Round not running")]
    RoundNotRunning,

    /// Player has no bet this round.
    #[error("No bet")]
    NoBet,

    /// Player already cashed out this round.
    #[error("Already cashed out")]
    AlreadyCashedOut,

    /// The multiplier has reached the crash point.
    #[error("Too late, crashed")]
    TooLate,
}

impl CashoutFailure {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            CashoutFailure::RoundNotRunning => "round_not_running",
            CashoutFailure::NoBet => "no_bet",
            CashoutFailure::AlreadyCashedOut => "already_cashed_out",
            CashoutFailure::TooLate => "too_late",
        }
    }
}

// =============================================================================
// BET
// =============================================================================

/// One player's stake in one round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    player_id: PlayerId,
    amount: Cents,
    cashed_out_at: Option<Multiplier>,
    payout: Cents,
    placed_at: DateTime<Utc>,
}

impl Bet {
    fn new(player_id: PlayerId, amount: Cents) -> Self {
        Self {
            player_id,
            amount,
            cashed_out_at: None,
            payout: Cents::ZERO,
            placed_at: Utc::now(),
        }
    }

    /// Owner.
    pub fn player_id(&self) -> PlayerId {
        self.player_id
    }

    /// Stake.
    pub fn amount(&self) -> Cents {
        self.amount
    }

    /// Multiplier locked in by a cashout.
    pub fn cashed_out_at(&self) -> Option<Multiplier> {
        self.cashed_out_at
    }

    /// Payout (zero until cashed out).
    pub fn payout(&self) -> Cents {
        self.payout
    }

    /// When the stake was placed.
    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    /// Has this bet been cashed out.
    pub fn is_cashed_out(&self) -> bool {
        self.cashed_out_at.is_some()
    }
}

/// A successful cashout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cashout {
    /// Round the bet belongs to.
    pub round_id: RoundId,
    /// Who cashed out.
    pub player_id: PlayerId,
    /// Stake.
    pub amount: Cents,
    /// Locked-in multiplier.
    pub cashed_at: Multiplier,
    /// `amount × cashed_at`, rounded to the cent.
    pub payout: Cents,
}

/// One line of a settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetResult {
    /// Player.
    pub player_id: PlayerId,
    /// Stake.
    pub amount: Cents,
    /// Cashout multiplier, `None` if the bet rode the crash.
    pub cashed_at: Option<Multiplier>,
    /// Final payout.
    pub payout: Cents,
}

// =============================================================================
// LEDGER
// =============================================================================

/// All bets for one round.
#[derive(Debug, Clone)]
pub struct BetLedger {
    round_id: RoundId,
    crash_at: Multiplier,
    max_bet: Option<Cents>,
    bets: BTreeMap<PlayerId, Bet>,
    settled: bool,
}

impl BetLedger {
    /// Empty ledger for a round.
    pub fn new(round_id: RoundId, crash_at: Multiplier, max_bet: Option<Cents>) -> Self {
        Self {
            round_id,
            crash_at,
            max_bet,
            bets: BTreeMap::new(),
            settled: false,
        }
    }

    /// Record a stake.
    ///
    /// Checked in order: phase, amount, maximum, duplicate. A second bet
    /// from the same player is rejected and the first is left untouched.
    pub fn place_bet(
        &mut self,
        status: RoundStatus,
        player_id: PlayerId,
        amount: f64,
    ) -> Result<Cents, BetRejection> {
        if status != RoundStatus::Betting {
            return Err(BetRejection::BettingClosed);
        }

        let amount = Cents::from_amount(amount).map_err(|e| match e {
            AmountError::BelowMinimum => BetRejection::BelowMinimum,
            AmountError::NotPositive | AmountError::TooLarge => BetRejection::InvalidAmount,
        })?;
        if let Some(max) = self.max_bet {
            if amount > max {
                return Err(BetRejection::AmountTooLarge { max });
            }
        }

        match self.bets.entry(player_id) {
            Entry::Occupied(_) => Err(BetRejection::AlreadyPlaced),
            Entry::Vacant(slot) => {
                slot.insert(Bet::new(player_id, amount));
                Ok(amount)
            }
        }
    }

    /// Lock in `current` as the player's multiplier.
    ///
    /// Checked in order: phase, bet present, not yet cashed out, and
    /// `current < crash_at`. An ended round reports `TooLate` to a player
    /// whose bet rode the crash so clients can tell a loss from a closed
    /// phase.
    pub fn request_cashout(
        &mut self,
        status: RoundStatus,
        player_id: PlayerId,
        current: Multiplier,
    ) -> Result<Cashout, CashoutFailure> {
        match status {
            RoundStatus::Running => {}
            RoundStatus::Ended => {
                return Err(match self.bets.get(&player_id) {
                    Some(bet) if !bet.is_cashed_out() => CashoutFailure::TooLate,
                    _ => CashoutFailure::RoundNotRunning,
                });
            }
            _ => return Err(CashoutFailure::RoundNotRunning),
        }

        let crash_at = self.crash_at;
        let bet = self.bets.get_mut(&player_id).ok_or(CashoutFailure::NoBet)?;
        if bet.is_cashed_out() {
            return Err(CashoutFailure::AlreadyCashedOut);
        }
        if current >= crash_at {
            return Err(CashoutFailure::TooLate);
        }

        let won = payout(bet.amount, current);
        bet.cashed_out_at = Some(current);
        bet.payout = won;

        Ok(Cashout {
            round_id: self.round_id,
            player_id,
            amount: bet.amount,
            cashed_at: current,
            payout: won,
        })
    }

    /// Final results, one per bet in player order.
    ///
    /// Payouts were fixed at cashout time and are copied, never recomputed.
    /// Calling this twice is an engine bug.
    pub fn settle(&mut self) -> Result<Vec<BetResult>, EngineError> {
        if self.settled {
            return Err(EngineError::AlreadySettled(self.round_id));
        }

        let mut results = Vec::with_capacity(self.bets.len());
        for bet in self.bets.values() {
            if let Some(cashed_at) = bet.cashed_out_at {
                if cashed_at >= self.crash_at {
                    return Err(EngineError::CashoutPastCrash {
                        round_id: self.round_id,
                        cashed_at,
                        crash_at: self.crash_at,
                    });
                }
            }
            results.push(BetResult {
                player_id: bet.player_id,
                amount: bet.amount,
                cashed_at: bet.cashed_out_at,
                payout: bet.payout,
            });
        }

        self.settled = true;
        Ok(results)
    }

    /// Round this ledger belongs to.
    pub fn round_id(&self) -> RoundId {
        self.round_id
    }

    /// Look up a player's bet.
    pub fn get(&self, player_id: &PlayerId) -> Option<&Bet> {
        self.bets.get(player_id)
    }

    /// Number of bets placed.
    pub fn total_bets(&self) -> usize {
        self.bets.len()
    }

    /// Sum of all stakes.
    pub fn total_staked(&self) -> Cents {
        self.bets
            .values()
            .fold(Cents::ZERO, |acc, bet| acc.saturating_add(bet.amount))
    }

    /// Has `settle` run.
    pub fn is_settled(&self) -> bool {
        self.settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger(crash_hundredths: u32) -> BetLedger {
        BetLedger::new(RoundId(1), Multiplier::from_hundredths(crash_hundredths), None)
    }

    fn player(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn m(hundredths: u32) -> Multiplier {
        Multiplier::from_hundredths(hundredths)
    }

    #[test]
    fn test_place_bet_accepts() {
        let mut ledger = ledger(250);
        let amount = ledger.place_bet(RoundStatus::Betting, player(1), 100.0).unwrap();
        assert_eq!(amount, Cents(10_000));
        assert_eq!(ledger.total_bets(), 1);
        assert!(!ledger.get(&player(1)).unwrap().is_cashed_out());
    }

    #[test]
    fn test_place_bet_outside_betting() {
        let mut ledger = ledger(250);
        for status in [RoundStatus::Idle, RoundStatus::Locked, RoundStatus::Running, RoundStatus::Ended] {
            assert_eq!(
                ledger.place_bet(status, player(1), 10.0),
                Err(BetRejection::BettingClosed)
            );
        }
        assert_eq!(ledger.total_bets(), 0);
    }

    #[test]
    fn test_place_bet_invalid_amounts() {
        let mut ledger = ledger(250);
        for amount in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            assert_eq!(
                ledger.place_bet(RoundStatus::Betting, player(1), amount),
                Err(BetRejection::InvalidAmount)
            );
        }
        assert_eq!(ledger.total_bets(), 0);
    }

    #[test]
    fn test_place_bet_below_minimum() {
        let mut ledger = ledger(250);
        let rejected = ledger.place_bet(RoundStatus::Betting, player(1), 0.001);
        assert_eq!(rejected, Err(BetRejection::BelowMinimum));
        assert_eq!(BetRejection::BelowMinimum.code(), "below_minimum");
        assert_eq!(BetRejection::BelowMinimum.to_string(), "Amount below 0.01");
        assert_eq!(ledger.total_bets(), 0);

        // Smallest stake that survives rounding
        assert_eq!(ledger.place_bet(RoundStatus::Betting, player(1), 0.01), Ok(Cents(1)));
    }

    #[test]
    fn test_place_bet_max() {
        let mut ledger = BetLedger::new(RoundId(1), m(250), Some(Cents::from_units(500)));
        assert_eq!(
            ledger.place_bet(RoundStatus::Betting, player(1), 500.01),
            Err(BetRejection::AmountTooLarge { max: Cents(50_000) })
        );
        assert!(ledger.place_bet(RoundStatus::Betting, player(1), 500.0).is_ok());
    }

    #[test]
    fn test_second_bet_rejected_first_unchanged() {
        let mut ledger = ledger(250);
        ledger.place_bet(RoundStatus::Betting, player(1), 50.0).unwrap();
        assert_eq!(
            ledger.place_bet(RoundStatus::Betting, player(1), 75.0),
            Err(BetRejection::AlreadyPlaced)
        );
        assert_eq!(ledger.get(&player(1)).unwrap().amount(), Cents(5_000));
        assert_eq!(ledger.total_bets(), 1);
    }

    #[test]
    fn test_cashout_success() {
        let mut ledger = ledger(250);
        ledger.place_bet(RoundStatus::Betting, player(1), 100.0).unwrap();

        let cashout = ledger.request_cashout(RoundStatus::Running, player(1), m(200)).unwrap();
        assert_eq!(cashout.cashed_at, m(200));
        assert_eq!(cashout.payout, Cents(20_000));

        let bet = ledger.get(&player(1)).unwrap();
        assert_eq!(bet.cashed_out_at(), Some(m(200)));
        assert_eq!(bet.payout(), Cents(20_000));
    }

    #[test]
    fn test_cashout_failure_order() {
        let mut ledger = ledger(299);
        ledger.place_bet(RoundStatus::Betting, player(1), 10.0).unwrap();

        assert_eq!(
            ledger.request_cashout(RoundStatus::Locked, player(1), m(100)),
            Err(CashoutFailure::RoundNotRunning)
        );
        assert_eq!(
            ledger.request_cashout(RoundStatus::Running, player(2), m(150)),
            Err(CashoutFailure::NoBet)
        );
        assert_eq!(
            ledger.request_cashout(RoundStatus::Running, player(1), m(300)),
            Err(CashoutFailure::TooLate)
        );
        assert_eq!(
            ledger.request_cashout(RoundStatus::Running, player(1), m(299)),
            Err(CashoutFailure::TooLate)
        );
        ledger.request_cashout(RoundStatus::Running, player(1), m(298)).unwrap();
        assert_eq!(
            ledger.request_cashout(RoundStatus::Running, player(1), m(298)),
            Err(CashoutFailure::AlreadyCashedOut)
        );
    }

    #[test]
    fn test_cashout_after_end() {
        let mut ledger = ledger(200);
        ledger.place_bet(RoundStatus::Betting, player(1), 10.0).unwrap();
        ledger.place_bet(RoundStatus::Betting, player(2), 10.0).unwrap();
        ledger.request_cashout(RoundStatus::Running, player(2), m(150)).unwrap();

        assert_eq!(
            ledger.request_cashout(RoundStatus::Ended, player(1), m(200)),
            Err(CashoutFailure::TooLate)
        );
        assert_eq!(
            ledger.request_cashout(RoundStatus::Ended, player(2), m(200)),
            Err(CashoutFailure::RoundNotRunning)
        );
        assert_eq!(
            ledger.request_cashout(RoundStatus::Ended, player(3), m(200)),
            Err(CashoutFailure::RoundNotRunning)
        );
    }

    #[test]
    fn test_failed_cashout_leaves_bet_untouched() {
        let mut ledger = ledger(150);
        ledger.place_bet(RoundStatus::Betting, player(1), 10.0).unwrap();
        let before = ledger.get(&player(1)).cloned();
        let _ = ledger.request_cashout(RoundStatus::Running, player(1), m(151));
        assert_eq!(ledger.get(&player(1)).cloned(), before);
    }

    #[test]
    fn test_settle_results() {
        let mut ledger = ledger(137);
        ledger.place_bet(RoundStatus::Betting, player(1), 50.0).unwrap();
        ledger.place_bet(RoundStatus::Betting, player(2), 20.0).unwrap();
        ledger.request_cashout(RoundStatus::Running, player(2), m(125)).unwrap();

        let results = ledger.settle().unwrap();
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].player_id, player(1));
        assert_eq!(results[0].cashed_at, None);
        assert_eq!(results[0].payout, Cents::ZERO);

        assert_eq!(results[1].cashed_at, Some(m(125)));
        assert_eq!(results[1].payout, Cents(2_500));
        assert!(ledger.is_settled());
    }

    #[test]
    fn test_settle_twice_is_fatal() {
        let mut ledger = ledger(137);
        ledger.settle().unwrap();
        assert!(matches!(ledger.settle(), Err(EngineError::AlreadySettled(RoundId(1)))));
    }

    #[test]
    fn test_totals() {
        let mut ledger = ledger(500);
        ledger.place_bet(RoundStatus::Betting, player(1), 1.5).unwrap();
        ledger.place_bet(RoundStatus::Betting, player(2), 2.25).unwrap();
        assert_eq!(ledger.total_staked(), Cents(375));
        assert_eq!(ledger.round_id(), RoundId(1));
    }
}
