//! Coordinator wire protocol (spec.md §6.2): UTF-8 JSON messages carried
//! as TLS application data between `CoordinatorClient` and
//! `CoordinatorServer`.

use serde::{Deserialize, Serialize};

/// `srp-handshake_1` request payload (client → server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeOneRequest {
    pub username: String,
    pub salt: String,
    #[serde(rename = "clientEphemeralPublic")]
    pub client_ephemeral_public: String,
}

/// `srp-handshake_2` request payload (client → server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeTwoRequest {
    #[serde(rename = "sessionProof")]
    pub session_proof: String,
    pub username: String,
    #[serde(rename = "nodePort")]
    pub node_port: u16,
}

/// Tagged client → server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    #[serde(rename = "srp-handshake_1")]
    HandshakeOne(HandshakeOneRequest),
    #[serde(rename = "srp-handshake_2")]
    HandshakeTwo(HandshakeTwoRequest),
}

/// Status of a server reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// `srp-handshake_1` response payload (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeOneResponse {
    #[serde(rename = "serverEphermalKey")]
    pub server_ephemeral_key: Option<String>,
}

/// `srp-handshake_2` response payload (server → client).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakeTwoResponse {
    pub iv: Option<String>,
    pub encrypted: Option<String>,
    #[serde(rename = "serverProof")]
    pub server_proof: Option<String>,
}

/// Tagged server → client message envelope. Unlike the client messages,
/// the server always reports `status`/`error` alongside a possibly-null
/// payload (spec.md §6.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage<P> {
    #[serde(rename = "type")]
    pub typ: String,
    pub payload: Option<P>,
    pub status: Status,
    pub error: Option<String>,
}

impl<P> ServerMessage<P> {
    /// Build a success reply carrying `payload`.
    pub fn success(typ: &str, payload: P) -> Self {
        Self {
            typ: typ.to_string(),
            payload: Some(payload),
            status: Status::Success,
            error: None,
        }
    }

    /// Build an error reply with a human-readable message and no payload.
    pub fn error(typ: &str, message: impl Into<String>) -> Self {
        Self {
            typ: typ.to_string(),
            payload: None,
            status: Status::Error,
            error: Some(message.into()),
        }
    }
}

/// Decrypted payload of round-2's `encrypted` field (spec.md §6.2): the
/// host's identity and node endpoint, encrypted under the SRP session key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorInfo {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub ip: String,
    pub port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_message_one_round_trips() {
        let msg = ClientMessage::HandshakeOne(HandshakeOneRequest {
            username: "frulf".into(),
            salt: "deadbeef".into(),
            client_ephemeral_public: "cafebabe".into(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"srp-handshake_1\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        match back {
            ClientMessage::HandshakeOne(r) => assert_eq!(r.username, "frulf"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn server_error_reply_has_null_payload() {
        let reply: ServerMessage<HandshakeOneResponse> =
            ServerMessage::error("srp-handshake_1", "Username 'dup' already registered with a different address");
        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("\"status\":\"error\""));
        assert!(json.contains("already registered"));
    }
}
