//! The `meshlink-session` façade (spec.md §2 "Session façade"): composes
//! discovery, the coordinator, and the mesh node into `Host`/`Client`,
//! and owns session identity (identifiers, keypairs, the host's
//! passcode).

pub mod discovery;
pub mod error;
pub mod identity;
pub mod session;

pub use discovery::{Discovery, DiscoveryEvent, MdnsDiscovery, SERVICE_TYPE};
pub use error::SessionError;
pub use identity::random_identifier;
pub use session::{Client, Host, SessionEvent};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;
    use tokio::sync::Mutex;

    /// In-process `Discovery` stand-in: a `publish` call fans its record
    /// out to every outstanding `browse` subscriber, with no real network
    /// involved (spec.md §1 treats mDNS as an external collaborator; this
    /// is the test-only substitute named in spec.md §3's AMBIENT STACK
    /// test-tooling section). Published records are retained and replayed
    /// to subscribers that `browse` after the `publish` already happened,
    /// mirroring `MdnsDiscovery`'s continuous re-announce over real mDNS.
    #[derive(Default)]
    struct LoopbackDiscovery {
        subscribers: Mutex<Vec<broadcast::Sender<DiscoveryEvent>>>,
        published: Mutex<Vec<DiscoveryEvent>>,
    }

    #[async_trait]
    impl Discovery for LoopbackDiscovery {
        async fn publish(&self, instance_name: &str, _service_type: &str, _port: u16, txt: HashMap<String, String>) -> Result<(), SessionError> {
            let event = DiscoveryEvent::Resolved {
                name: instance_name.to_string(),
                addresses: vec![IpAddr::V4(Ipv4Addr::LOCALHOST)],
                txt,
            };
            for sub in self.subscribers.lock().await.iter() {
                let _ = sub.send(event.clone());
            }
            self.published.lock().await.push(event);
            Ok(())
        }

        async fn browse(&self, _service_type: &str) -> Result<broadcast::Receiver<DiscoveryEvent>, SessionError> {
            let (tx, rx) = broadcast::channel(16);
            for event in self.published.lock().await.iter() {
                let _ = tx.send(event.clone());
            }
            self.subscribers.lock().await.push(tx);
            Ok(rx)
        }

        async fn remove(&self, _instance_name: &str) -> Result<(), SessionError> {
            Ok(())
        }
    }

    /// spec.md §8 S1: passcode success end to end through the façade.
    #[tokio::test]
    async fn host_and_client_authenticate_over_loopback_discovery() {
        let discovery: Arc<dyn Discovery> = Arc::new(LoopbackDiscovery::default());
        let bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);

        let host = Host::create(bind_ip, Some("blorp-glork".into()), discovery.clone()).await.unwrap();
        let mut host_events = host.subscribe();

        let client = Client::create(bind_ip, Some("frulf".into())).await.unwrap();
        client.connect_session(discovery.as_ref(), "blorp-glork", &host.passcode).await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        let mut joined = false;
        while tokio::time::Instant::now() < deadline {
            if let Ok(Ok(SessionEvent::MemberJoined { user_name, .. })) = tokio::time::timeout(Duration::from_millis(200), host_events.recv()).await {
                if user_name == "frulf" {
                    joined = true;
                    break;
                }
            }
        }
        assert!(joined, "host should observe frulf joining");

        let members = host.authenticated_members().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_name, "frulf");
    }
}
