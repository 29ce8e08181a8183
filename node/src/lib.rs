//! Mesh formation and per-peer messaging (spec.md §4.3, §4.4): the
//! `MeshNode` shared base, its `HostNode`/`ClientNode` specializations,
//! the neighbor table, the reconnection controller, and the ephemeral
//! open-port helper.

pub mod client;
pub mod error;
pub mod host;
pub mod mesh;
pub mod neighbor;
pub mod port;

pub use client::{ClientEvent, ClientNode};
pub use error::NodeError;
pub use host::{HostEvent, HostNode, RosterMember};
pub use mesh::{MeshNode, NodeEvent};
pub use neighbor::Neighbor;
pub use port::open_port;

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_crypto::{issue_self_signed, RsaKeypair};
    use std::net::SocketAddr;
    use std::time::Duration;

    async fn issue(session: &str, port: u16) -> meshlink_crypto::SelfSignedCert {
        let keypair = RsaKeypair::generate().unwrap();
        issue_self_signed(&keypair, session, port).unwrap()
    }

    async fn free_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    /// spec.md §8 S1/mesh-completeness: a host with two members reaches
    /// `session-started` on every node once all `ack-hello`s land, and
    /// clients learn of each other through the roster, not just the host.
    #[tokio::test]
    async fn three_member_mesh_completes_and_clients_message_each_other_directly() {
        let host_port = free_port().await;
        let c1_port = free_port().await;
        let c2_port = free_port().await;

        let host_addr: SocketAddr = format!("127.0.0.1:{host_port}").parse().unwrap();
        let c1_addr: SocketAddr = format!("127.0.0.1:{c1_port}").parse().unwrap();
        let c2_addr: SocketAddr = format!("127.0.0.1:{c2_port}").parse().unwrap();

        let session_name = "three-member-session";
        let host_cert = issue(session_name, host_port).await;
        let c1_cert = issue(session_name, c1_port).await;
        let c2_cert = issue(session_name, c2_port).await;

        let host = HostNode::new("host", session_name, host_cert, host_addr);
        let mut host_events = host.subscribe();

        let key_c1 = b"0123456789abcdef".to_vec();
        let key_c2 = b"fedcba9876543210".to_vec();

        let c1 = ClientNode::new("c1", session_name, c1_cert, c1_addr, "host", host_addr, key_c1.clone());
        let c2 = ClientNode::new("c2", session_name, c2_cert, c2_addr, "host", host_addr, key_c2.clone());
        let mut c1_events = c1.subscribe();
        let mut c2_events = c2.subscribe();

        c1.start().await.unwrap();
        c2.start().await.unwrap();

        host.start(vec![
            RosterMember { user_name: "c1".into(), ip: c1_addr.ip(), node_port: c1_port, session_key: key_c1 },
            RosterMember { user_name: "c2".into(), ip: c2_addr.ip(), node_port: c2_port, session_key: key_c2 },
        ])
        .await
        .unwrap();

        let deadline = Duration::from_secs(5);
        assert!(wait_for_host_session_started(&mut host_events, deadline).await);
        assert!(wait_for_client_session_started(&mut c1_events, deadline).await);
        assert!(wait_for_client_session_started(&mut c2_events, deadline).await);

        // c1 should have learned about c2 directly from the roster hello,
        // without the host relaying anything further.
        tokio::time::sleep(Duration::from_millis(200)).await;
        c1.send_message("c2", "direct hello").await.unwrap();

        let mut saw_it = false;
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while tokio::time::Instant::now() < deadline {
            if let Ok(ClientEvent::Node(NodeEvent::Message { from, body, .. })) =
                tokio::time::timeout(Duration::from_millis(200), c2_events.recv()).await.unwrap_or(Err(tokio::sync::broadcast::error::RecvError::Closed))
            {
                if from == "c1" && body == "direct hello" {
                    saw_it = true;
                    break;
                }
            }
        }
        assert!(saw_it, "c2 should receive a message sent directly by c1");
    }

    async fn wait_for_host_session_started(rx: &mut tokio::sync::broadcast::Receiver<HostEvent>, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Ok(HostEvent::SessionStarted)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                return true;
            }
        }
        false
    }

    async fn wait_for_client_session_started(rx: &mut tokio::sync::broadcast::Receiver<ClientEvent>, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Ok(ClientEvent::SessionStarted)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
                return true;
            }
        }
        false
    }
}
