//! Passcode-authenticated SRP handshake coordinator (spec.md §4.2):
//! `CoordinatorServer` runs on the session host, `CoordinatorClient` runs
//! on each joining member.

pub mod client;
pub mod error;
pub mod server;

pub use client::{CoordinatorAuth, CoordinatorClient};
pub use error::CoordinatorError;
pub use server::{AuthenticatedMember, CoordinatorEvent, CoordinatorServer};

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_crypto::{issue_self_signed, RsaKeypair};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    async fn start_coordinator(session_name: &str, passcode: &str) -> (SocketAddr, std::sync::Arc<CoordinatorServer>) {
        let keypair = RsaKeypair::generate().unwrap();
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);
        let cert = issue_self_signed(&keypair, session_name, port).unwrap();
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port);

        let coordinator = CoordinatorServer::new(session_name, passcode, IpAddr::V4(Ipv4Addr::LOCALHOST), 9000);
        coordinator.clone().listen(addr, &cert).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        (addr, coordinator)
    }

    #[tokio::test]
    async fn correct_passcode_authenticates_and_registers_member() {
        let (addr, coordinator) = start_coordinator("blorp-glork", "123456").await;

        let client = CoordinatorClient::connect(addr, "blorp-glork").await.unwrap();
        let auth = client.authenticate("frulf", "123456", 6000).await.unwrap();
        assert_eq!(auth.host_info.user_name, "blorp-glork");

        let members = coordinator.export_users().await;
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_name, "frulf");
        assert_eq!(members[0].node_port, 6000);
    }

    #[tokio::test]
    async fn wrong_passcode_is_rejected() {
        let (addr, coordinator) = start_coordinator("blorp-glork", "123456").await;

        let client = CoordinatorClient::connect(addr, "blorp-glork").await.unwrap();
        let result = client.authenticate("frulf", "654321", 6000).await;
        assert!(result.is_err());
        assert!(coordinator.export_users().await.is_empty());
    }

    #[tokio::test]
    async fn three_bad_proofs_lock_out_the_fourth_attempt_even_with_the_right_passcode() {
        // spec.md §8 Invariant 3 / S4: three failed `srp-handshake_2`
        // attempts from one IP exhaust that IP's retry budget, so the
        // fourth attempt is rejected regardless of whether its proof
        // would otherwise have succeeded.
        let (addr, coordinator) = start_coordinator("blorp-glork", "123456").await;

        for _ in 0..3 {
            let client = CoordinatorClient::connect(addr, "blorp-glork").await.unwrap();
            let result = client.authenticate("frulf", "wrong-passcode", 6000).await;
            assert!(matches!(result, Err(CoordinatorError::VerificationFailed)));
        }

        let client = CoordinatorClient::connect(addr, "blorp-glork").await.unwrap();
        let result = client.authenticate("frulf", "123456", 6000).await;
        assert!(matches!(result, Err(CoordinatorError::RetryBudgetExceeded)));
        assert!(coordinator.export_users().await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_username_from_different_ip_is_not_actually_reachable_over_loopback() {
        // Both dialers originate from 127.0.0.1 in this test harness, so the
        // collision path can't be exercised end-to-end without a real
        // second address; the rejection logic itself is covered directly
        // in `server`'s unit tests via `CoordinatorError::UsernameCollision`'s
        // `Display` message matching spec.md's exact wording.
        let err = crate::error::CoordinatorError::UsernameCollision("dup".into());
        assert!(err.to_string().contains("Username 'dup' already registered"));
    }
}
