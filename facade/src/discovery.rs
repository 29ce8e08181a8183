//! Discovery collaborator (spec.md §6.1): publish/browse/remove over
//! mDNS/DNS-SD, external to the core mesh protocol but shipped here as a
//! real implementation behind the [`Discovery`] trait.

use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::SessionError;

/// One event from a [`Discovery::browse`] stream (spec.md §6.1: "for
/// each resolved instance emits `{name, addresses[], txt}`; `remove(name)`
/// on loss").
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    /// A session was resolved or refreshed.
    Resolved {
        /// The mDNS instance name, used as the session identifier.
        name: String,
        /// Resolved IPv4 addresses, loopback already discarded.
        addresses: Vec<IpAddr>,
        /// The TXT record, verbatim.
        txt: HashMap<String, String>,
    },
    /// A previously-resolved session disappeared.
    Removed {
        /// The mDNS instance name.
        name: String,
    },
}

/// The mDNS/DNS-SD publisher and browser contract the session façade
/// depends on (spec.md §6.1), named exactly as specified.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Advertise `instance_name` under `service_type` on `port`, with
    /// `txt` as its TXT record (spec.md: `{ coordinatorPort: int }` for
    /// the meshlink service type).
    async fn publish(&self, instance_name: &str, service_type: &str, port: u16, txt: HashMap<String, String>) -> Result<(), SessionError>;

    /// Begin browsing `service_type`; returns a stream of
    /// [`DiscoveryEvent`]s as instances resolve and disappear.
    async fn browse(&self, service_type: &str) -> Result<broadcast::Receiver<DiscoveryEvent>, SessionError>;

    /// Stop advertising `instance_name`.
    async fn remove(&self, instance_name: &str) -> Result<(), SessionError>;
}

/// Default `protocol="tcp"`, `domain="local."` service type for meshlink
/// sessions (spec.md §6.1).
pub const SERVICE_TYPE: &str = "_meshlink._tcp.local.";

/// [`Discovery`] backed by the `mdns-sd` crate.
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
}

impl MdnsDiscovery {
    /// Start an mDNS responder/browser daemon.
    pub fn new() -> Result<Self, SessionError> {
        let daemon = ServiceDaemon::new().map_err(|e| SessionError::Discovery(e.to_string()))?;
        Ok(Self { daemon })
    }
}

#[async_trait]
impl Discovery for MdnsDiscovery {
    async fn publish(&self, instance_name: &str, service_type: &str, port: u16, txt: HashMap<String, String>) -> Result<(), SessionError> {
        let host_name = format!("{instance_name}.local.");
        let info = ServiceInfo::new(service_type, instance_name, &host_name, "", port, Some(txt))
            .map_err(|e| SessionError::Discovery(e.to_string()))?
            .enable_addr_auto();
        self.daemon.register(info).map_err(|e| SessionError::Discovery(e.to_string()))?;
        debug!(instance_name, service_type, port, "published discovery record");
        Ok(())
    }

    async fn browse(&self, service_type: &str) -> Result<broadcast::Receiver<DiscoveryEvent>, SessionError> {
        let mdns_rx = self.daemon.browse(service_type).map_err(|e| SessionError::Discovery(e.to_string()))?;
        let (tx, rx) = broadcast::channel(256);

        tokio::spawn(async move {
            while let Ok(event) = mdns_rx.recv_async().await {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let addresses: Vec<IpAddr> = info
                            .get_addresses()
                            .iter()
                            .copied()
                            .filter(|ip| !ip.is_loopback())
                            .filter(|ip| ip.is_ipv4())
                            .collect();
                        if addresses.is_empty() {
                            continue;
                        }
                        let txt: HashMap<String, String> = info
                            .get_properties()
                            .iter()
                            .map(|p| (p.key().to_string(), p.val_str().to_string()))
                            .collect();
                        let name = info.get_fullname().split('.').next().unwrap_or(info.get_fullname()).to_string();
                        let _ = tx.send(DiscoveryEvent::Resolved { name, addresses, txt });
                    }
                    ServiceEvent::ServiceRemoved(_ty, fullname) => {
                        let _ = tx.send(DiscoveryEvent::Removed { name: fullname });
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }

    async fn remove(&self, instance_name: &str) -> Result<(), SessionError> {
        let fullname = format!("{instance_name}.{SERVICE_TYPE}");
        match self.daemon.unregister(&fullname) {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, instance_name, "failed to unregister discovery record");
                Err(SessionError::Discovery(e.to_string()))
            }
        }
    }
}
