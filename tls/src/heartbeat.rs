//! Heartbeat liveness state machine (spec.md §4.1).
//!
//! States: `Alive`, `SoftDisconnected`. A challenge is a random 16-byte
//! value; a heartbeat "counts" only if its payload equals the most
//! recently sent challenge. Both the 1000 ms retransmit and 1000 ms
//! disconnect timers restart every time a matching heartbeat arrives.

use std::time::Duration;

use meshlink_crypto::random_challenge;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(1000);
const DISCONNECT_TIMEOUT: Duration = Duration::from_millis(1000);

/// Current liveness state, mirrored to callers via [`super::channel::ChannelEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessState {
    /// The peer has answered the most recent challenge in time.
    Alive,
    /// The disconnect timer fired; still sending challenges, waiting for
    /// the peer to come back.
    SoftDisconnected,
}

/// Commands accepted by [`run`].
pub enum HeartbeatCommand {
    /// A heartbeat payload arrived from the peer.
    Received(Vec<u8>),
    /// The channel is being torn down; stop all timers.
    Stop,
}

/// Side effects the heartbeat loop asks its caller to perform.
pub enum HeartbeatAction {
    /// Send this challenge as a TLS heartbeat request.
    SendChallenge(Vec<u8>),
    /// Liveness state changed; matches spec.md's `disconnected`/`reconnected` events.
    StateChanged(LivenessState),
}

/// Drives the heartbeat state machine until [`HeartbeatCommand::Stop`] is
/// received or `commands` closes. `actions` is unbounded so the timer
/// loop never blocks on a slow consumer.
pub async fn run(mut commands: mpsc::Receiver<HeartbeatCommand>, actions: mpsc::UnboundedSender<HeartbeatAction>) {
    let mut state = LivenessState::Alive;
    let mut current_challenge = random_challenge().to_vec();
    let _ = actions.send(HeartbeatAction::SendChallenge(current_challenge.clone()));

    let mut retransmit_deadline = Instant::now() + RETRANSMIT_INTERVAL;
    let mut disconnect_deadline = Instant::now() + DISCONNECT_TIMEOUT;

    loop {
        tokio::select! {
            cmd = commands.recv() => {
                match cmd {
                    Some(HeartbeatCommand::Received(payload)) => {
                        if payload != current_challenge {
                            trace!("heartbeat payload did not match outstanding challenge, ignoring");
                            continue;
                        }
                        if state == LivenessState::SoftDisconnected {
                            debug!("heartbeat matched after soft-disconnect, reconnected");
                            state = LivenessState::Alive;
                            let _ = actions.send(HeartbeatAction::StateChanged(state));
                        }
                        current_challenge = random_challenge().to_vec();
                        retransmit_deadline = Instant::now() + RETRANSMIT_INTERVAL;
                        disconnect_deadline = Instant::now() + DISCONNECT_TIMEOUT;
                    }
                    Some(HeartbeatCommand::Stop) | None => {
                        debug!("heartbeat loop stopping");
                        return;
                    }
                }
            }
            _ = tokio::time::sleep_until(retransmit_deadline) => {
                let _ = actions.send(HeartbeatAction::SendChallenge(current_challenge.clone()));
                retransmit_deadline = Instant::now() + RETRANSMIT_INTERVAL;
            }
            _ = tokio::time::sleep_until(disconnect_deadline) => {
                if state == LivenessState::Alive {
                    warn!("heartbeat disconnect timer fired, soft-disconnected");
                    state = LivenessState::SoftDisconnected;
                    let _ = actions.send(HeartbeatAction::StateChanged(state));
                }
                current_challenge = random_challenge().to_vec();
                let _ = actions.send(HeartbeatAction::SendChallenge(current_challenge.clone()));
                disconnect_deadline = Instant::now() + DISCONNECT_TIMEOUT;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn matching_heartbeat_keeps_state_alive() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(cmd_rx, action_tx));

        let challenge = match action_rx.recv().await.unwrap() {
            HeartbeatAction::SendChallenge(c) => c,
            _ => panic!("expected initial challenge"),
        };

        cmd_tx.send(HeartbeatCommand::Received(challenge)).await.unwrap();
        // draining the next action should be another challenge, not a state change
        match action_rx.recv().await.unwrap() {
            HeartbeatAction::SendChallenge(_) => {}
            HeartbeatAction::StateChanged(_) => panic!("should not have transitioned on a match"),
        }

        cmd_tx.send(HeartbeatCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_heartbeat_is_ignored() {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (action_tx, mut action_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run(cmd_rx, action_tx));

        let _initial = action_rx.recv().await.unwrap();
        cmd_tx
            .send(HeartbeatCommand::Received(vec![0u8; 16]))
            .await
            .unwrap();

        cmd_tx.send(HeartbeatCommand::Stop).await.unwrap();
        handle.await.unwrap();
    }
}
