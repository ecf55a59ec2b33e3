//! Wire envelope and event dispatch (spec §4.A, §6).
//!
//! Every WebSocket message is a JSON object `{"event": ..., "data": ...}`
//! where `data` is itself a JSON-encoded string. Decoding never panics or
//! tears down the connection: a bad envelope or an unrecognised event
//! yields a `CodecError` that the caller logs and drops.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::geo::LocationData;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(#[from] serde_json::Error),
    #[error("unknown event: {0}")]
    UnknownEvent(String),
}

/// The raw wire shape: `data` is a JSON string, not a nested object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub data: String,
}

impl Envelope {
    pub fn new(event: &str, data: impl Serialize) -> Result<Self, CodecError> {
        Ok(Self {
            event: event.to_owned(),
            data: serde_json::to_string(&data)?,
        })
    }

    pub fn empty(event: &str) -> Self {
        Self {
            event: event.to_owned(),
            data: String::new(),
        }
    }
}

/// Every event a client may send us, decoded to a sum type at the edge
/// (spec §9: "avoid stringly-typed switches").
#[derive(Debug)]
pub enum InboundEvent {
    WrtcConnect,
    WrtcOffer(RTCSessionDescription),
    WrtcAnswer(RTCSessionDescription),
    WrtcCandidate(RTCIceCandidateInit),
    WrtcRenegotiationNeeded(RTCSessionDescription),
    WrtcDisconnect,
    Voice,
    Mute,
    UpdateLocation(LocationData),
    SetCurrentAvatar(String),
}

pub fn decode(raw: &str) -> Result<InboundEvent, CodecError> {
    let envelope: Envelope = serde_json::from_str(raw)?;
    match envelope.event.as_str() {
        "wrtc_connect" => Ok(InboundEvent::WrtcConnect),
        "wrtc_offer" => Ok(InboundEvent::WrtcOffer(serde_json::from_str(
            &envelope.data,
        )?)),
        "wrtc_answer" => Ok(InboundEvent::WrtcAnswer(serde_json::from_str(
            &envelope.data,
        )?)),
        "wrtc_candidate" => Ok(InboundEvent::WrtcCandidate(serde_json::from_str(
            &envelope.data,
        )?)),
        "wrtc_renegotiation_needed" => Ok(InboundEvent::WrtcRenegotiationNeeded(
            serde_json::from_str(&envelope.data)?,
        )),
        "wrtc_disconnect" => Ok(InboundEvent::WrtcDisconnect),
        "voice" => Ok(InboundEvent::Voice),
        "mute" => Ok(InboundEvent::Mute),
        "update_location" => Ok(InboundEvent::UpdateLocation(serde_json::from_str(
            &envelope.data,
        )?)),
        "set_current_avatar" => Ok(InboundEvent::SetCurrentAvatar(
            serde_json::from_str(&envelope.data).unwrap_or(envelope.data),
        )),
        other => Err(CodecError::UnknownEvent(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_an_envelope_with_structured_data() {
        let loc = LocationData {
            altitude: 1.0,
            altitude_accuracy: 2.0,
            latitude: 3.0,
            longitude: 4.0,
            accuracy: 5.0,
            heading: 6.0,
            speed: 7.0,
        };
        let envelope = Envelope::new("update_location", loc).unwrap();
        let raw = serde_json::to_string(&envelope).unwrap();
        let decoded: Envelope = serde_json::from_str(&raw).unwrap();
        match decode(&serde_json::to_string(&decoded).unwrap()).unwrap() {
            InboundEvent::UpdateLocation(l) => assert_eq!(l, loc),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn empty_payload_events_decode() {
        let raw = serde_json::to_string(&Envelope::empty("wrtc_connect")).unwrap();
        assert!(matches!(decode(&raw).unwrap(), InboundEvent::WrtcConnect));
    }

    #[test]
    fn unknown_event_is_reported_not_fatal() {
        let raw = serde_json::to_string(&Envelope::empty("not_a_real_event")).unwrap();
        match decode(&raw) {
            Err(CodecError::UnknownEvent(e)) => assert_eq!(e, "not_a_real_event"),
            other => panic!("expected UnknownEvent, got {other:?}"),
        }
    }

    #[test]
    fn garbage_bytes_are_malformed_not_fatal() {
        match decode("not json at all") {
            Err(CodecError::MalformedEnvelope(_)) => {}
            other => panic!("expected MalformedEnvelope, got {other:?}"),
        }
    }
}
