//! Network Layer
//!
//! WebSocket transport around the round engine. Sessions forward requests to
//! the [`EngineHandle`](crate::game::scheduler::EngineHandle) and relay
//! gateway messages; no round state lives here.

pub mod gateway;
pub mod protocol;
pub mod server;

pub use gateway::{ChannelGateway, Envelope, Subscription};
pub use protocol::{ClientMessage, ErrorCode, ServerMessage};
pub use server::{GameServer, GameServerError};
