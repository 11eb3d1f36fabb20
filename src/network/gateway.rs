//! Broadcast Gateway
//!
//! Fans engine events out to every connected session over a
//! `tokio::sync::broadcast` channel. Each event is converted to its wire
//! message once; sessions drop envelopes whose audience does not include them.
//!
//! Replies addressed to one player skip the broadcast ring and go into that
//! session's own queue, so a session that lags on ticks still gets exactly
//! one reply per request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::game::events::{Audience, BroadcastGateway, RoundEvent};
use crate::game::state::PlayerId;
use crate::network::protocol::ServerMessage;

/// A wire message plus who should receive it.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Recipients.
    pub audience: Audience,
    /// Payload.
    pub message: ServerMessage,
}

type DirectQueues = Arc<Mutex<HashMap<PlayerId, mpsc::UnboundedSender<ServerMessage>>>>;

fn lock(queues: &DirectQueues) -> MutexGuard<'_, HashMap<PlayerId, mpsc::UnboundedSender<ServerMessage>>> {
    // Poisoning leaves the map usable
    queues.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// [`BroadcastGateway`] backed by a broadcast channel plus one private
/// queue per session.
#[derive(Debug, Clone)]
pub struct ChannelGateway {
    tx: broadcast::Sender<Envelope>,
    direct: DirectQueues,
}

impl ChannelGateway {
    /// Gateway buffering up to `capacity` shared envelopes per slow session.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            direct: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Feed for one session. Replaces any earlier feed for `player_id`.
    pub fn subscribe(&self, player_id: PlayerId) -> Subscription {
        let (direct_tx, direct_rx) = mpsc::unbounded_channel();
        lock(&self.direct).insert(player_id, direct_tx.clone());
        Subscription {
            player_id,
            rx: self.tx.subscribe(),
            direct_rx,
            direct_tx,
            direct: self.direct.clone(),
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl BroadcastGateway for ChannelGateway {
    fn publish(&self, audience: Audience, event: RoundEvent) {
        let message = ServerMessage::from(&event);
        if let Audience::Player(player_id) = audience {
            let mut queues = lock(&self.direct);
            let delivered = queues
                .get(&player_id)
                .map(|queue| queue.send(message).is_ok())
                .unwrap_or(false);
            if !delivered {
                queues.remove(&player_id);
                debug!("No session for {}, dropped {}", player_id.short(), event.name());
            }
            return;
        }

        // No sessions connected is not an error
        let _ = self.tx.send(Envelope { audience, message });
    }
}

/// One session's view of the gateway.
#[derive(Debug)]
pub struct Subscription {
    player_id: PlayerId,
    rx: broadcast::Receiver<Envelope>,
    direct_rx: mpsc::UnboundedReceiver<ServerMessage>,
    /// Identifies this feed's entry in `direct`.
    direct_tx: mpsc::UnboundedSender<ServerMessage>,
    direct: DirectQueues,
}

impl Subscription {
    /// Next message addressed to this session, or `None` once the gateway
    /// is gone.
    ///
    /// Private replies are never dropped and come out ahead of shared
    /// messages. On the shared feed a lagging session skips what it missed
    /// and keeps going.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            tokio::select! {
                biased;

                Some(message) = self.direct_rx.recv() => return Some(message),
                result = self.rx.recv() => match result {
                    Ok(envelope) if envelope.audience.includes(&self.player_id) => {
                        return Some(envelope.message);
                    }
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Session {} lagged, skipped {} messages", self.player_id.short(), skipped);
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut queues = lock(&self.direct);
        // A newer feed for the same player keeps its queue
        if queues.get(&self.player_id).is_some_and(|queue| queue.same_channel(&self.direct_tx)) {
            queues.remove(&self.player_id);
        }
    }
}
