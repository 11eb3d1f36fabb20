//! Round State Machine
//!
//! A `Round` is one wagering cycle. Every transition checks its source
//! phase; an illegal transition is an engine bug and surfaces as
//! [`EngineError`], never as a client-facing rejection.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::money::{Cents, Multiplier};
use crate::game::growth::GrowthCurve;
use crate::game::ledger::{BetLedger, BetRejection, BetResult, Cashout, CashoutFailure};
use crate::game::state::{PlayerId, RoundId, RoundStatus};

/// Invariant violations. These are fatal: the scheduler stops on them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Settlement was requested a second time.
    #[error("round {0} settled twice")]
    AlreadySettled(RoundId),

    /// A transition was attempted from the wrong phase.
    #[error("round {round_id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        /// Round.
        round_id: RoundId,
        /// Phase we were in.
        from: RoundStatus,
        /// Phase requested.
        to: RoundStatus,
    },

    /// A recorded cashout is at or above the crash point.
    #[error("round {round_id}: cashout at {cashed_at} not below crash {crash_at}")]
    CashoutPastCrash {
        /// Round.
        round_id: RoundId,
        /// Recorded multiplier.
        cashed_at: Multiplier,
        /// Crash point.
        crash_at: Multiplier,
    },

    /// All engine handles were dropped while a request was in flight.
    #[error("engine stopped")]
    Stopped,
}

/// What one clock advance did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Still climbing at this multiplier.
    Climbing(Multiplier),
    /// Reached the crash point; the multiplier is clamped to it.
    Crashed(Multiplier),
}

impl TickOutcome {
    /// Multiplier carried by the tick.
    pub fn multiplier(self) -> Multiplier {
        match self {
            TickOutcome::Climbing(m) | TickOutcome::Crashed(m) => m,
        }
    }
}

/// Final outcome of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Round.
    pub round_id: RoundId,
    /// Crash point, revealed here.
    pub crash_at: Multiplier,
    /// One line per bet.
    pub results: Vec<BetResult>,
}

impl Settlement {
    /// Sum of all payouts.
    pub fn total_paid(&self) -> Cents {
        self.results
            .iter()
            .fold(Cents::ZERO, |acc, r| acc.saturating_add(r.payout))
    }
}

/// One wagering cycle.
#[derive(Debug, Clone)]
pub struct Round {
    id: RoundId,
    status: RoundStatus,
    crash_at: Multiplier,
    multiplier: Multiplier,
    opened_at: DateTime<Utc>,
    start_time: Option<DateTime<Utc>>,
    ledger: BetLedger,
}

impl Round {
    /// Placeholder before the first round.
    pub fn idle() -> Self {
        Self {
            id: RoundId::NONE,
            status: RoundStatus::Idle,
            crash_at: Multiplier::ONE,
            multiplier: Multiplier::ONE,
            opened_at: Utc::now(),
            start_time: None,
            ledger: BetLedger::new(RoundId::NONE, Multiplier::ONE, None),
        }
    }

    /// Open the round that follows `self` for betting.
    ///
    /// Consumes the previous round so it can never be revived; only an
    /// idle or ended round may be followed.
    pub fn next(self, crash_at: Multiplier, max_bet: Option<Cents>) -> Result<Round, EngineError> {
        if !matches!(self.status, RoundStatus::Idle | RoundStatus::Ended) {
            return Err(EngineError::IllegalTransition {
                round_id: self.id,
                from: self.status,
                to: RoundStatus::Betting,
            });
        }

        let id = self.id.next();
        Ok(Self {
            id,
            status: RoundStatus::Betting,
            crash_at,
            multiplier: Multiplier::ONE,
            opened_at: Utc::now(),
            start_time: None,
            ledger: BetLedger::new(id, crash_at, max_bet),
        })
    }

    fn transition(&mut self, from: RoundStatus, to: RoundStatus) -> Result<(), EngineError> {
        if self.status != from {
            return Err(EngineError::IllegalTransition {
                round_id: self.id,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Close the betting window.
    pub fn lock(&mut self) -> Result<(), EngineError> {
        self.transition(RoundStatus::Betting, RoundStatus::Locked)
    }

    /// Take off: multiplier resets to 1.00x and the clock starts.
    pub fn start_running(&mut self) -> Result<(), EngineError> {
        self.transition(RoundStatus::Locked, RoundStatus::Running)?;
        self.multiplier = Multiplier::ONE;
        self.start_time = Some(Utc::now());
        Ok(())
    }

    /// Advance the multiplier to the curve value at `elapsed` since takeoff.
    ///
    /// The multiplier never moves backwards. Reaching `crash_at` clamps to it
    /// exactly and reports `Crashed`; the round stays `Running` until
    /// [`Round::end`] so the final tick can be published first.
    pub fn advance_multiplier(
        &mut self,
        curve: &GrowthCurve,
        elapsed: Duration,
    ) -> Result<TickOutcome, EngineError> {
        if self.status != RoundStatus::Running {
            return Err(EngineError::IllegalTransition {
                round_id: self.id,
                from: self.status,
                to: RoundStatus::Running,
            });
        }

        let next = curve.multiplier_at(elapsed).max(self.multiplier);
        if next >= self.crash_at {
            self.multiplier = self.crash_at;
            Ok(TickOutcome::Crashed(self.crash_at))
        } else {
            self.multiplier = next;
            Ok(TickOutcome::Climbing(next))
        }
    }

    /// Crash: `Running -> Ended`, then settle every bet.
    pub fn end(&mut self) -> Result<Settlement, EngineError> {
        self.transition(RoundStatus::Running, RoundStatus::Ended)?;
        self.multiplier = self.crash_at;
        let results = self.ledger.settle()?;
        Ok(Settlement {
            round_id: self.id,
            crash_at: self.crash_at,
            results,
        })
    }

    /// Place a bet against this round's phase.
    pub fn place_bet(&mut self, player_id: PlayerId, amount: f64) -> Result<Cents, BetRejection> {
        self.ledger.place_bet(self.status, player_id, amount)
    }

    /// Cash out at the current multiplier.
    pub fn request_cashout(&mut self, player_id: PlayerId) -> Result<Cashout, CashoutFailure> {
        self.ledger.request_cashout(self.status, player_id, self.multiplier)
    }

    /// Round id.
    pub fn id(&self) -> RoundId {
        self.id
    }

    /// Phase.
    pub fn status(&self) -> RoundStatus {
        self.status
    }

    /// Current multiplier.
    pub fn multiplier(&self) -> Multiplier {
        self.multiplier
    }

    /// Crash point. Not to be published before the round ends.
    pub fn crash_at(&self) -> Multiplier {
        self.crash_at
    }

    /// When betting opened.
    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// When the multiplier started climbing.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    /// Bets.
    pub fn ledger(&self) -> &BetLedger {
        &self.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(hundredths: u32) -> Multiplier {
        Multiplier::from_hundredths(hundredths)
    }

    fn player(n: u8) -> PlayerId {
        PlayerId::new([n; 16])
    }

    fn running_round(crash: u32) -> Round {
        let mut round = Round::idle().next(m(crash), None).unwrap();
        round.lock().unwrap();
        round.start_running().unwrap();
        round
    }

    #[test]
    fn test_full_lifecycle() {
        let curve = GrowthCurve::new(0.1);
        let mut round = Round::idle().next(m(150), None).unwrap();
        assert_eq!(round.id(), RoundId(1));
        assert_eq!(round.status(), RoundStatus::Betting);
        assert_eq!(round.multiplier(), Multiplier::ONE);

        round.lock().unwrap();
        assert_eq!(round.status(), RoundStatus::Locked);
        round.start_running().unwrap();
        assert_eq!(round.status(), RoundStatus::Running);
        assert!(round.start_time().is_some());

        let mut last = Multiplier::ONE;
        let mut crashed = false;
        for step in 1..=200u64 {
            let outcome = round
                .advance_multiplier(&curve, Duration::from_millis(step * 100))
                .unwrap();
            assert!(outcome.multiplier() >= last);
            last = outcome.multiplier();
            if let TickOutcome::Crashed(at) = outcome {
                assert_eq!(at, m(150));
                crashed = true;
                break;
            }
        }
        assert!(crashed);

        let settlement = round.end().unwrap();
        assert_eq!(settlement.crash_at, m(150));
        assert!(settlement.results.is_empty());
        assert_eq!(round.status(), RoundStatus::Ended);
        assert_eq!(round.multiplier(), m(150));
    }

    #[test]
    fn test_ids_increase_by_one() {
        let mut round = Round::idle();
        for expected in 1..=5u64 {
            round = round.next(m(101), None).unwrap();
            assert_eq!(round.id(), RoundId(expected));
            round.lock().unwrap();
            round.start_running().unwrap();
            round.end().unwrap();
        }
    }

    #[test]
    fn test_cannot_open_over_live_round() {
        let round = Round::idle().next(m(200), None).unwrap();
        assert!(matches!(
            round.next(m(200), None),
            Err(EngineError::IllegalTransition { from: RoundStatus::Betting, .. })
        ));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut round = Round::idle().next(m(200), None).unwrap();
        assert!(round.start_running().is_err());
        assert!(round.end().is_err());
        assert!(round
            .advance_multiplier(&GrowthCurve::default(), Duration::from_secs(1))
            .is_err());
        round.lock().unwrap();
        assert!(round.lock().is_err());
    }

    #[test]
    fn test_settle_twice_is_fatal() {
        let mut round = running_round(120);
        round.end().unwrap();
        assert!(round.end().is_err());
    }

    #[test]
    fn test_scenario_cashout_before_crash() {
        let mut round = Round::idle().next(m(250), None).unwrap();
        round.place_bet(player(1), 100.0).unwrap();
        round.lock().unwrap();
        round.start_running().unwrap();

        // e^(0.1 * 6.94) = 2.0016
        let curve = GrowthCurve::new(0.1);
        let outcome = round
            .advance_multiplier(&curve, Duration::from_millis(6_940))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Climbing(m(200)));

        let cashout = round.request_cashout(player(1)).unwrap();
        assert_eq!(cashout.cashed_at, m(200));
        assert_eq!(cashout.payout, Cents(20_000));

        let settlement = round.end().unwrap();
        assert_eq!(settlement.results[0].payout, Cents(20_000));
        assert_eq!(settlement.total_paid(), Cents(20_000));
    }

    #[test]
    fn test_scenario_ride_to_crash() {
        let mut round = Round::idle().next(m(137), None).unwrap();
        round.place_bet(player(1), 50.0).unwrap();
        round.lock().unwrap();
        round.start_running().unwrap();

        let outcome = round
            .advance_multiplier(&GrowthCurve::default(), Duration::from_secs(60))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Crashed(m(137)));

        let settlement = round.end().unwrap();
        assert_eq!(settlement.results[0].cashed_at, None);
        assert_eq!(settlement.results[0].payout, Cents::ZERO);
    }

    #[test]
    fn test_cashout_on_crash_tick_is_too_late() {
        let mut round = Round::idle().next(m(110), None).unwrap();
        round.place_bet(player(1), 10.0).unwrap();
        round.lock().unwrap();
        round.start_running().unwrap();

        let outcome = round
            .advance_multiplier(&GrowthCurve::default(), Duration::from_secs(600))
            .unwrap();
        assert!(matches!(outcome, TickOutcome::Crashed(_)));

        // Crash tick applied but round not yet ended
        assert_eq!(round.request_cashout(player(1)), Err(CashoutFailure::TooLate));
        round.end().unwrap();
        assert_eq!(round.request_cashout(player(1)), Err(CashoutFailure::TooLate));
    }

    #[test]
    fn test_crash_at_one_never_pays() {
        let mut round = Round::idle().next(Multiplier::ONE, None).unwrap();
        round.place_bet(player(1), 10.0).unwrap();
        round.lock().unwrap();
        round.start_running().unwrap();

        assert_eq!(round.request_cashout(player(1)), Err(CashoutFailure::TooLate));
        let outcome = round
            .advance_multiplier(&GrowthCurve::default(), Duration::from_millis(100))
            .unwrap();
        assert_eq!(outcome, TickOutcome::Crashed(Multiplier::ONE));
    }

    #[test]
    fn test_multiplier_never_regresses() {
        let mut round = running_round(500);
        let curve = GrowthCurve::new(0.1);
        let high = round.advance_multiplier(&curve, Duration::from_secs(5)).unwrap();
        let replay = round.advance_multiplier(&curve, Duration::from_secs(1)).unwrap();
        assert_eq!(high.multiplier(), replay.multiplier());
    }
}
