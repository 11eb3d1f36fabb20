//! Round Scheduler
//!
//! A single task owns the active [`Round`]. Bets, cashouts, ticks and phase
//! timers all run inside that task, one at a time:
//!
//! ```text
//!   EngineHandle ──mpsc──▶ ┌──────────────────────────────┐ ──▶ BroadcastGateway
//!   EngineHandle ──mpsc──▶ │ RoundScheduler (owns Round)  │
//!                          │  select! { timer | command } │
//!                          └──────────────────────────────┘
//! ```
//!
//! A cashout either lands before the tick that reaches the crash point (and
//! is paid) or after it (and is too late). Phase deadlines are locals of the
//! phase that created them, so a new round can never be touched by an old
//! round's timer.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{ConfigError, EngineConfig};
use crate::core::money::{Cents, Multiplier};
use crate::core::rng::{random_server_seed, DeterministicRng};
use crate::game::events::{BroadcastGateway, RoundEvent};
use crate::game::growth::GrowthCurve;
use crate::game::ledger::{BetRejection, Cashout, CashoutFailure};
use crate::game::round::{EngineError, Round, TickOutcome};
use crate::game::sampler::CrashSampler;
use crate::game::state::{PlayerId, RoundId, RoundStatus};

// =============================================================================
// CRASH SOURCE
// =============================================================================

/// Supplies the crash point for each new round.
pub trait CrashSource: Send {
    /// Crash point for `round_id`.
    fn crash_point(&mut self, round_id: RoundId) -> Multiplier;
}

/// Draws each round from `DeterministicRng::for_round(server_seed, id)`.
pub struct SeededCrashSource {
    sampler: CrashSampler,
    server_seed: [u8; 32],
}

impl SeededCrashSource {
    /// Create a source.
    pub fn new(sampler: CrashSampler, server_seed: [u8; 32]) -> Self {
        Self { sampler, server_seed }
    }
}

impl CrashSource for SeededCrashSource {
    fn crash_point(&mut self, round_id: RoundId) -> Multiplier {
        let mut rng = DeterministicRng::for_round(&self.server_seed, round_id.0);
        self.sampler.sample(&mut rng)
    }
}

// =============================================================================
// HANDLE
// =============================================================================

/// Public view of the live round. Never carries the crash point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round id (`0` before the first round).
    pub round_id: RoundId,
    /// Phase.
    pub status: RoundStatus,
    /// Current multiplier.
    pub multiplier: Multiplier,
    /// Bets placed this round.
    pub total_bets: usize,
    /// Seconds left in the betting window.
    pub seconds_left: Option<u32>,
}

#[derive(Debug)]
enum Command {
    PlaceBet {
        player_id: PlayerId,
        amount: f64,
        reply: oneshot::Sender<Result<Cents, BetRejection>>,
    },
    Cashout {
        player_id: PlayerId,
        reply: oneshot::Sender<Result<Cashout, CashoutFailure>>,
    },
    Snapshot {
        reply: oneshot::Sender<RoundSnapshot>,
    },
    Shutdown,
}

/// Cloneable request side of the engine.
///
/// Replies also go out through the gateway; the return values are for
/// callers that want them directly.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Stake `amount` for `player_id` in the current round.
    pub async fn place_bet(
        &self,
        player_id: PlayerId,
        amount: f64,
    ) -> Result<Result<Cents, BetRejection>, EngineError> {
        self.request(|reply| Command::PlaceBet { player_id, amount, reply }).await
    }

    /// Cash out `player_id` at the current multiplier.
    pub async fn cashout(
        &self,
        player_id: PlayerId,
    ) -> Result<Result<Cashout, CashoutFailure>, EngineError> {
        self.request(|reply| Command::Cashout { player_id, reply }).await
    }

    /// Current round state.
    pub async fn snapshot(&self) -> Result<RoundSnapshot, EngineError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Ask the scheduler to stop after the current command.
    pub async fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }
}

// =============================================================================
// SCHEDULER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Drives `betting -> locked -> running -> ended -> betting ...` forever.
pub struct RoundScheduler {
    config: EngineConfig,
    curve: GrowthCurve,
    crash_source: Box<dyn CrashSource>,
    gateway: Arc<dyn BroadcastGateway>,
    round: Round,
    seconds_left: Option<u32>,
    commands: mpsc::Receiver<Command>,
}

impl RoundScheduler {
    /// Scheduler drawing crash points from the configured (or a random)
    /// server seed.
    pub fn new(
        config: EngineConfig,
        gateway: Arc<dyn BroadcastGateway>,
    ) -> Result<(Self, EngineHandle), ConfigError> {
        config.validate()?;
        let sampler = CrashSampler::new(config.alpha, config.max_crash);
        let server_seed = config.server_seed.unwrap_or_else(random_server_seed);
        let source = SeededCrashSource::new(sampler, server_seed);
        Self::with_crash_source(config, gateway, Box::new(source))
    }

    /// Scheduler with an explicit crash source.
    ///
    /// Fails if `config` does not pass [`EngineConfig::validate`].
    pub fn with_crash_source(
        config: EngineConfig,
        gateway: Arc<dyn BroadcastGateway>,
        crash_source: Box<dyn CrashSource>,
    ) -> Result<(Self, EngineHandle), ConfigError> {
        config.validate()?;
        let (tx, commands) = mpsc::channel(config.mailbox_capacity);
        let scheduler = Self {
            curve: GrowthCurve::new(config.growth_rate),
            config,
            crash_source,
            gateway,
            round: Round::idle(),
            seconds_left: None,
            commands,
        };
        Ok((scheduler, EngineHandle { tx }))
    }

    /// Run on the tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<(), EngineError>> {
        tokio::spawn(self.run())
    }

    /// Cycle rounds until shut down or every handle is dropped.
    ///
    /// Returns `Err` only on an invariant violation.
    pub async fn run(mut self) -> Result<(), EngineError> {
        info!(
            "Round scheduler started: betting {}s, lock {:?}, tick {:?}, cooldown {:?}",
            self.config.betting_seconds,
            self.config.lock_delay,
            self.config.tick_interval,
            self.config.cooldown
        );

        loop {
            self.start_betting_phase()?;
            if self.betting_countdown().await == Flow::Stop {
                break;
            }

            self.close_betting()?;
            if self.serve_until(Instant::now() + self.config.lock_delay).await == Flow::Stop {
                break;
            }

            if self.fly().await? == Flow::Stop {
                break;
            }

            if self.serve_until(Instant::now() + self.config.cooldown).await == Flow::Stop {
                break;
            }
        }

        let open = self.round.ledger().total_bets();
        if self.round.status() != RoundStatus::Ended && open > 0 {
            warn!(
                "Scheduler stopped during round {} ({}) with {} unsettled bets",
                self.round.id(),
                self.round.status(),
                open
            );
        }
        info!("Round scheduler stopped");
        Ok(())
    }

    /// `idle|ended -> betting`: new round, new ledger, fresh crash point.
    fn start_betting_phase(&mut self) -> Result<(), EngineError> {
        let next_id = self.round.id().next();
        let crash_at = self.crash_source.crash_point(next_id);
        let previous = std::mem::replace(&mut self.round, Round::idle());
        self.round = previous.next(crash_at, self.config.max_bet)?;

        info!("Round {} open for betting ({}s)", self.round.id(), self.config.betting_seconds);
        self.gateway.broadcast(RoundEvent::RoundStarted {
            round_id: self.round.id(),
            betting_seconds: self.config.betting_seconds,
        });
        Ok(())
    }

    /// One `bet_countdown` per second, deadlines anchored to the window start.
    async fn betting_countdown(&mut self) -> Flow {
        let opened = Instant::now();
        let total = self.config.betting_seconds;

        for remaining in (1..=total).rev() {
            self.seconds_left = Some(remaining);
            self.gateway.broadcast(RoundEvent::BetCountdown {
                round_id: self.round.id(),
                seconds_left: remaining,
            });

            let elapsed = u64::from(total - remaining + 1);
            if self.serve_until(opened + Duration::from_secs(elapsed)).await == Flow::Stop {
                return Flow::Stop;
            }
        }

        self.seconds_left = None;
        Flow::Continue
    }

    /// `betting -> locked`.
    fn close_betting(&mut self) -> Result<(), EngineError> {
        self.round.lock()?;
        info!(
            "Round {} locked with {} bets ({} staked)",
            self.round.id(),
            self.round.ledger().total_bets(),
            self.round.ledger().total_staked()
        );
        self.gateway.broadcast(RoundEvent::BetLocked {
            round_id: self.round.id(),
        });
        Ok(())
    }

    /// `locked -> running -> ended`: tick until the crash point, then settle.
    async fn fly(&mut self) -> Result<Flow, EngineError> {
        self.round.start_running()?;
        let takeoff = Instant::now();
        let tick = self.config.tick_interval;
        let mut ticker = interval_at(takeoff + tick, tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        debug!(
            "Round {} running, expected flight {:?}",
            self.round.id(),
            self.curve.time_to_reach(self.round.crash_at())
        );

        loop {
            tokio::select! {
                at = ticker.tick() => {
                    if self.advance_multiplier(at.duration_since(takeoff))? {
                        return Ok(Flow::Continue);
                    }
                }
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle(command),
                        None => Flow::Stop,
                    };
                    if flow == Flow::Stop {
                        return Ok(Flow::Stop);
                    }
                }
            }
        }
    }

    /// Apply one tick. Returns `true` once the round has crashed and settled.
    fn advance_multiplier(&mut self, elapsed: Duration) -> Result<bool, EngineError> {
        let outcome = self.round.advance_multiplier(&self.curve, elapsed)?;
        self.gateway.broadcast(RoundEvent::Tick {
            round_id: self.round.id(),
            status: self.round.status(),
            multiplier: outcome.multiplier(),
        });

        if let TickOutcome::Crashed(crash_at) = outcome {
            let settlement = self.round.end()?;
            info!(
                "Round {} crashed at {} ({} bets, {} paid)",
                settlement.round_id,
                crash_at,
                settlement.results.len(),
                settlement.total_paid()
            );
            self.gateway.broadcast(RoundEvent::RoundEnded(settlement));
            return Ok(true);
        }
        Ok(false)
    }

    /// Serve requests until `deadline`.
    async fn serve_until(&mut self, deadline: Instant) -> Flow {
        let sleep = sleep_until(deadline);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle(command),
                        None => Flow::Stop,
                    };
                    if flow == Flow::Stop {
                        return Flow::Stop;
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: Command) -> Flow {
        #[cfg(feature = "debug-tracing")]
        debug!("Round {} command: {:?}", self.round.id(), command);

        match command {
            Command::PlaceBet { player_id, amount, reply } => {
                let _ = reply.send(self.place_bet(player_id, amount));
            }
            Command::Cashout { player_id, reply } => {
                let _ = reply.send(self.cashout(player_id));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => return Flow::Stop,
        }
        Flow::Continue
    }

    fn place_bet(&mut self, player_id: PlayerId, amount: f64) -> Result<Cents, BetRejection> {
        let round_id = self.round.id();
        match self.round.place_bet(player_id, amount) {
            Ok(amount) => {
                debug!("Round {} bet {} from {}", round_id, amount, player_id.short());
                self.gateway
                    .send_to(player_id, RoundEvent::BetAccepted { round_id, amount });
                self.gateway.broadcast(RoundEvent::BetsUpdated {
                    round_id,
                    total_bets: self.round.ledger().total_bets(),
                });
                Ok(amount)
            }
            Err(reason) => {
                debug!("Round {} bet rejected for {}: {}", round_id, player_id.short(), reason);
                self.gateway
                    .send_to(player_id, RoundEvent::BetRejected { round_id, reason });
                Err(reason)
            }
        }
    }

    fn cashout(&mut self, player_id: PlayerId) -> Result<Cashout, CashoutFailure> {
        let round_id = self.round.id();
        match self.round.request_cashout(player_id) {
            Ok(cashout) => {
                info!(
                    "Round {} {} cashed out at {} for {}",
                    round_id,
                    player_id.short(),
                    cashout.cashed_at,
                    cashout.payout
                );
                self.gateway.send_to(
                    player_id,
                    RoundEvent::CashedOut {
                        round_id,
                        cashed_at: cashout.cashed_at,
                        payout: cashout.payout,
                    },
                );
                self.gateway.broadcast_except(
                    player_id,
                    RoundEvent::PlayerCashed {
                        round_id,
                        player_tag: player_id.anonymized(round_id),
                        cashed_at: cashout.cashed_at,
                        payout: cashout.payout,
                    },
                );
                Ok(cashout)
            }
            Err(reason) => {
                debug!("Round {} cashout failed for {}: {}", round_id, player_id.short(), reason);
                self.gateway
                    .send_to(player_id, RoundEvent::CashoutFailed { round_id, reason });
                Err(reason)
            }
        }
    }

    fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            round_id: self.round.id(),
            status: self.round.status(),
            multiplier: self.round.multiplier(),
            total_bets: self.round.ledger().total_bets(),
            seconds_left: self.seconds_left,
        }
    }
}
