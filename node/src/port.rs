//! Open-TCP-port helper (spec.md §4.5): probe the ephemeral range for a
//! free port, upward from a start value, then downward.

use rand::Rng;
use tokio::net::TcpListener;

use crate::error::NodeError;

/// Low end of the ephemeral range meshlink probes (spec.md §3).
pub const PORT_RANGE_START: u16 = 49152;
/// High end of the ephemeral range meshlink probes (spec.md §3).
pub const PORT_RANGE_END: u16 = 65535;

/// Find a TCP port meshlink can bind, starting at `start` (or a random
/// pick in the ephemeral range if `None`), probing upward to the ceiling
/// and then, if that's exhausted, downward from `start - 1` to the floor
/// (spec.md §4.5). Returns `PortExhaustion` if both directions fail.
///
/// This binds and immediately drops a probe listener per port rather
/// than handing back a live socket: the caller (coordinator or node
/// listener) needs the port number before it can mint a CN-matching
/// certificate, so a small bind-after-probe race against another process
/// grabbing the same port is an accepted tradeoff, not a bug — see
/// DESIGN.md.
pub async fn open_port(start: Option<u16>) -> Result<u16, NodeError> {
    let start = start.unwrap_or_else(|| rand::thread_rng().gen_range(PORT_RANGE_START..=PORT_RANGE_END));
    let start = start.max(PORT_RANGE_START);

    for port in start..=PORT_RANGE_END {
        if probe(port).await {
            return Ok(port);
        }
    }
    for port in (PORT_RANGE_START..start).rev() {
        if probe(port).await {
            return Ok(port);
        }
    }
    Err(NodeError::PortExhaustion)
}

async fn probe(port: u16) -> bool {
    match TcpListener::bind(("0.0.0.0", port)).await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_a_port_listen_then_succeeds_on() {
        let port = open_port(None).await.unwrap();
        assert!((PORT_RANGE_START..=PORT_RANGE_END).contains(&port));
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        drop(listener);
    }

    #[tokio::test]
    async fn probes_upward_past_an_occupied_start_port() {
        let held = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let held_port = held.local_addr().unwrap().port();

        let port = open_port(Some(held_port)).await.unwrap();
        assert_ne!(port, held_port);
        drop(held);
    }
}
