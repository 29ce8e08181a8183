//! Listener-side of [`crate::channel::TlsChannel`]: binds one TCP socket
//! and accepts a fresh, independently-handshaking `TlsChannel` per
//! incoming connection, serving the same certificate to every peer
//! (spec.md §4.1: "listener-side ... serves its own certificate").

use std::net::SocketAddr;

use meshlink_crypto::SelfSignedCert;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::channel::TlsChannel;
use crate::error::TlsChannelError;

/// A bound TCP socket ready to accept mutually-TLS connections.
pub struct TlsListener {
    tcp: TcpListener,
    acceptor: TlsAcceptor,
    keep_alive: bool,
}

impl TlsListener {
    /// Bind `addr` and prepare to serve `cert` to every connecting peer.
    pub async fn bind(addr: SocketAddr, cert: &SelfSignedCert, keep_alive: bool) -> Result<Self, TlsChannelError> {
        let tcp = TcpListener::bind(addr).await?;
        let acceptor = TlsChannel::acceptor_for(cert)?;
        debug!(%addr, "tls listener bound");
        Ok(Self { tcp, acceptor, keep_alive })
    }

    /// The locally-bound address, useful when `addr`'s port was 0.
    pub fn local_addr(&self) -> Result<SocketAddr, TlsChannelError> {
        Ok(self.tcp.local_addr()?)
    }

    /// Accept the next incoming connection and complete its handshake.
    /// Rejects if the peer closes before the handshake finishes
    /// (spec.md §4.1).
    pub async fn accept(&self) -> Result<(TlsChannel, SocketAddr), TlsChannelError> {
        let (tcp, peer) = self.tcp.accept().await?;
        debug!(%peer, "tls listener accepted socket");
        let channel = TlsChannel::from_accepted(tcp, self.acceptor.clone(), self.keep_alive).await?;
        Ok((channel, peer))
    }
}
