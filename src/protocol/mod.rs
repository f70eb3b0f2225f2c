//! Signaling wire protocol shared by the rendezvous server and the client.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! Client frames may carry an `"ack"` id; the server answers those with an
//! `ack` event carrying the same id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::error::{MeetError, Result};

/// Events emitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    JoinRoom { room_id: String, name: String },

    #[serde(rename_all = "camelCase")]
    Signal { target_id: String, signal: Value },

    LeaveRoom,

    #[serde(rename_all = "camelCase")]
    ScreenShareStatus {
        room_id: String,
        is_sharing: bool,
        user_id: String,
    },

    RequestStartRecord(String),

    RequestStopRecord(String),

    RecordHeartbeat(String),
}

/// Events pushed by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Me(String),

    AllUsers(Vec<String>),

    UserJoined { id: String, name: String },

    UserLeft(String),

    Signal { from: String, signal: Value },

    #[serde(rename_all = "camelCase")]
    PeerScreenShareStatus { user_id: String, is_sharing: bool },

    #[serde(rename_all = "camelCase")]
    RecordStarted { user_id: String },

    #[serde(rename_all = "camelCase")]
    RecordStopped { user_id: String },

    Ack { id: u64, response: AckResponse },
}

/// Response to an acknowledged request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Recording lock lease, set on grants when the server expires locks.
    #[serde(rename = "leaseMs", default, skip_serializing_if = "Option::is_none")]
    pub lease_ms: Option<u64>,
}

impl AckResponse {
    pub fn granted() -> Self {
        Self {
            success: true,
            message: None,
            lease_ms: None,
        }
    }

    pub fn denied(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            lease_ms: None,
        }
    }

    pub fn with_lease(mut self, lease: Option<Duration>) -> Self {
        self.lease_ms = lease.map(|l| l.as_millis() as u64);
        self
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease_ms.map(Duration::from_millis)
    }
}

/// Negotiation payload carried opaquely inside `signal` events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalPayload {
    Offer { sdp: String },
    Answer { sdp: String },
    Candidate { candidate: IceCandidate },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    #[serde(rename = "usernameFragment", default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl SignalPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalPayload::Offer { .. } => "offer",
            SignalPayload::Answer { .. } => "answer",
            SignalPayload::Candidate { .. } => "candidate",
        }
    }

    pub fn is_offer(&self) -> bool {
        matches!(self, SignalPayload::Offer { .. })
    }

    pub fn is_answer(&self) -> bool {
        matches!(self, SignalPayload::Answer { .. })
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| MeetError::InvalidSignalingMessage(format!("bad signal payload: {}", e)))
    }
}

/// A client event as it travels on the wire
#[derive(Debug, Clone, PartialEq)]
pub struct ClientFrame {
    pub event: ClientEvent,
    pub ack: Option<u64>,
}

impl ClientFrame {
    pub fn new(event: ClientEvent) -> Self {
        Self { event, ack: None }
    }

    pub fn with_ack(event: ClientEvent, ack: u64) -> Self {
        Self {
            event,
            ack: Some(ack),
        }
    }

    pub fn encode(&self) -> Result<String> {
        let mut value = serde_json::to_value(&self.event)?;
        if let (Some(id), Value::Object(map)) = (self.ack, &mut value) {
            map.insert("ack".to_string(), Value::from(id));
        }
        Ok(serde_json::to_string(&value)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(text)?;
        let ack = match &mut value {
            Value::Object(map) => map.remove("ack").and_then(|v| v.as_u64()),
            _ => {
                return Err(MeetError::InvalidSignalingMessage(
                    "frame is not a JSON object".to_string(),
                ))
            }
        };
        let event = serde_json::from_value(value)?;
        Ok(Self { event, ack })
    }
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_room_wire_shape() {
        let frame = ClientFrame::new(ClientEvent::JoinRoom {
            room_id: "X".to_string(),
            name: "Ann".to_string(),
        });
        let value: Value = serde_json::from_str(&frame.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "joinRoom", "data": {"roomId": "X", "name": "Ann"}})
        );
    }

    #[test]
    fn test_request_start_record_carries_ack() {
        let frame = ClientFrame::with_ack(ClientEvent::RequestStartRecord("X".to_string()), 7);
        let text = frame.encode().unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["event"], "requestStartRecord");
        assert_eq!(value["data"], "X");
        assert_eq!(value["ack"], 7);

        let decoded = ClientFrame::decode(&text).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_leave_room_without_data() {
        let decoded = ClientFrame::decode(r#"{"event":"leaveRoom"}"#).unwrap();
        assert_eq!(decoded.event, ClientEvent::LeaveRoom);
        assert_eq!(decoded.ack, None);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(ClientFrame::decode("[1,2]").is_err());
        assert!(ClientFrame::decode(r#"{"event":"nope"}"#).is_err());
    }

    #[test]
    fn test_server_event_names() {
        let text = ServerEvent::PeerScreenShareStatus {
            user_id: "a".to_string(),
            is_sharing: true,
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({"event": "peerScreenShareStatus", "data": {"userId": "a", "isSharing": true}})
        );

        let ack = ServerEvent::decode(
            r#"{"event":"ack","data":{"id":3,"response":{"success":false,"message":"busy"}}}"#,
        )
        .unwrap();
        assert_eq!(
            ack,
            ServerEvent::Ack {
                id: 3,
                response: AckResponse::denied("busy")
            }
        );
    }

    #[test]
    fn test_grant_carries_lease() {
        let granted = AckResponse::granted().with_lease(Some(Duration::from_secs(30)));
        let value = serde_json::to_value(&granted).unwrap();
        assert_eq!(value, json!({"success": true, "leaseMs": 30000}));
        assert_eq!(granted.lease(), Some(Duration::from_secs(30)));

        let value = serde_json::to_value(AckResponse::granted().with_lease(None)).unwrap();
        assert_eq!(value, json!({"success": true}));
    }

    #[test]
    fn test_signal_payload_shapes() {
        let candidate = SignalPayload::from_value(&json!({
            "type": "candidate",
            "candidate": {"candidate": "candidate:1 1 udp 1 1.2.3.4 5 typ host", "sdpMid": "0", "sdpMLineIndex": 0}
        }))
        .unwrap();
        match &candidate {
            SignalPayload::Candidate { candidate } => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(candidate.kind(), "candidate");

        let answer = SignalPayload::Answer { sdp: "v=0".into() };
        assert!(answer.is_answer());
        assert_eq!(answer.to_value().unwrap()["type"], "answer");
        assert!(SignalPayload::from_value(&json!({"type": "renegotiate"})).is_err());
    }
}
