//! Mesh node wire protocol (spec.md §6.3): messages exchanged between
//! `HostNode`/`ClientNode` over each pairwise `TlsChannel` once the mesh
//! is bootstrapped.

use serde::{Deserialize, Serialize};

/// One row of the roster a `HostNode` hands a newly-joined member in its
/// `hello` payload (spec.md §3, §6.3). `send_key`/`receive_key` are hex
/// strings, not raw bytes — matching the coordinator's text-based wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RosterEntry {
    pub username: String,
    pub ip: String,
    pub port: u16,
    #[serde(rename = "sendKey")]
    pub send_key: String,
    #[serde(rename = "receiveKey")]
    pub receive_key: String,
}

/// Decrypted payload of a `hello` message: the full member roster as the
/// host currently knows it, including the host's own row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HelloPayload {
    pub nodes: Vec<RosterEntry>,
}

/// Decrypted payload of an `ack-hello` reply. Spec.md §6.3 defines this as
/// an empty string; the acknowledging member is already known from
/// [`NodeEnvelope::from`], so there is nothing else to carry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AckHelloPayload {}

/// Decrypted payload of an application `message`/`broadcast` envelope.
/// The body is opaque to the wire layer — callers serialize/deserialize
/// their own payloads into `body`. The sender is carried unencrypted on
/// [`NodeEnvelope::from`], not duplicated in here, since the recipient
/// needs it before decryption to pick the right `receiveKey`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationPayload {
    pub body: String,
}

/// The outer envelope carried as TLS application data on a node channel
/// (spec.md §6.3). `iv` and `encrypted_message` are base64;
/// `encrypted_message` decrypts (under the channel's AES key for this
/// direction) to one of [`HelloPayload`], [`AckHelloPayload`], or
/// [`ApplicationPayload`] depending on `typ`. `from` is plaintext so the
/// recipient can look up which neighbor's key to decrypt with before
/// touching the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEnvelope {
    #[serde(rename = "type")]
    pub typ: NodeMessageType,
    #[serde(rename = "encryptedMessage")]
    pub encrypted_message: String,
    pub iv: String,
    pub from: String,
}

/// Discriminant for [`NodeEnvelope::typ`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeMessageType {
    Hello,
    AckHello,
    Message,
    Broadcast,
}

impl NodeEnvelope {
    /// Wrap an already-encrypted payload for the wire.
    pub fn new(typ: NodeMessageType, from: String, iv_b64: String, ciphertext_b64: String) -> Self {
        Self {
            typ,
            encrypted_message: ciphertext_b64,
            iv: iv_b64,
            from,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_payload_round_trips() {
        let payload = HelloPayload {
            nodes: vec![RosterEntry {
                username: "frulf".into(),
                ip: "10.0.0.2".into(),
                port: 5000,
                send_key: "aa".into(),
                receive_key: "bb".into(),
            }],
        };
        let json = serde_json::to_string(&payload).unwrap();
        let back: HelloPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn envelope_type_serializes_kebab_case() {
        let env = NodeEnvelope::new(NodeMessageType::AckHello, "frulf".into(), "iv".into(), "ct".into());
        let json = serde_json::to_string(&env).unwrap();
        assert!(json.contains("\"type\":\"ack-hello\""));
    }
}
