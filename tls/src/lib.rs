//! Mutually-verified TLS channel with certificate CN-pinning, base64-over-TCP
//! wire compatibility, and heartbeat liveness (spec.md §4.1).

pub mod cert;
pub mod channel;
pub mod error;
pub mod framing;
pub mod heartbeat;
pub mod listener;
pub mod record;
pub mod verifier;

pub use channel::{ChannelEvent, ChannelSender, TlsChannel};
pub use error::TlsChannelError;
pub use listener::TlsListener;

#[cfg(test)]
mod tests {
    use super::*;
    use meshlink_crypto::{issue_self_signed, RsaKeypair};

    #[tokio::test]
    async fn dialer_and_listener_complete_a_pinned_handshake_and_exchange_data() {
        let keypair = RsaKeypair::generate().unwrap();
        let bind_addr: std::net::SocketAddr = "127.0.0.1:0".parse().unwrap();
        // The listener doesn't know its port until bound, but the cert CN
        // must carry it, so probe a concrete port the test controls instead.
        let probe = tokio::net::TcpListener::bind(bind_addr).await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let cert = issue_self_signed(&keypair, "testsession", port).unwrap();
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();

        let listener = TlsListener::bind(addr, &cert, false).await.unwrap();

        let server = tokio::spawn(async move {
            let (mut channel, _peer) = listener.accept().await.unwrap();
            channel.send(b"hello from listener".to_vec()).await.unwrap();
            match channel.recv().await.unwrap() {
                ChannelEvent::SocketConnected => {}
                other => panic!("expected SocketConnected first, got {other:?}"),
            }
        });

        // give the listener a moment to be accepting
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let mut client = TlsChannel::connect(addr, "testsession", false).await.unwrap();
        let mut saw_data = false;
        for _ in 0..4 {
            match client.recv().await.unwrap() {
                ChannelEvent::Data(bytes) => {
                    assert_eq!(bytes, b"hello from listener");
                    saw_data = true;
                    break;
                }
                _ => continue,
            }
        }
        assert!(saw_data, "expected to observe application data from the listener");

        server.abort();
    }

    #[tokio::test]
    async fn dialer_rejects_mismatched_session_name() {
        let keypair = RsaKeypair::generate().unwrap();
        let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = probe.local_addr().unwrap().port();
        drop(probe);

        let cert = issue_self_signed(&keypair, "real-session", port).unwrap();
        let addr: std::net::SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let listener = TlsListener::bind(addr, &cert, false).await.unwrap();

        let server = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let result = TlsChannel::connect(addr, "wrong-session", false).await;
        assert!(result.is_err());
        server.abort();
    }
}
