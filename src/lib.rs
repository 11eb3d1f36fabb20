//! # Crash Round Server
//!
//! Real-time multiplayer crash rounds: players stake during a betting window,
//! a multiplier climbs from 1.00x, and anyone who cashes out before the
//! hidden crash point is paid stake × multiplier.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASH ROUND SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  ├── money.rs    - Cents and hundredths multipliers          │
//! │  └── rng.rs      - Xorshift128+ PRNG, per-round seeds        │
//! │                                                              │
//! │  game/           - Round lifecycle engine                    │
//! │  ├── sampler.rs  - Crash point distribution                  │
//! │  ├── growth.rs   - Multiplier curve                          │
//! │  ├── ledger.rs   - Bets, cashouts, settlement                │
//! │  ├── round.rs    - Phase state machine                       │
//! │  ├── events.rs   - Outbound events + gateway trait           │
//! │  └── scheduler.rs- Single-owner round task                   │
//! │                                                              │
//! │  network/        - Transport (outside the engine)            │
//! │  ├── protocol.rs - JSON wire messages                        │
//! │  ├── gateway.rs  - Broadcast channel fan-out                 │
//! │  └── server.rs   - WebSocket sessions                        │
//! │                                                              │
//! │  config.rs       - Engine and server settings                │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! One task owns the live round. Ticks, bets and cashouts are applied in
//! mailbox order, and the multiplier is quantized to hundredths before any
//! comparison, so a cashout is either strictly before the crash tick or it
//! fails as too late. Settlement runs exactly once per round.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;

// Re-export commonly used types
pub use crate::config::{ConfigError, EngineConfig, ServerConfig};
pub use crate::core::money::{Cents, Multiplier};
pub use crate::core::rng::DeterministicRng;
pub use crate::game::scheduler::{EngineHandle, RoundScheduler};
pub use crate::game::state::{PlayerId, RoundId, RoundStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
