//! Wire format for dispatcher calls.
//!
//! A request is one JSON datagram `{seq, caller, call: {method, args}}`; a reply
//! is one JSON datagram `{seq, body}` echoing the request sequence number.
//! Decoding happens in two steps so that an unknown method name and undecodable
//! arguments can both be answered with an error instead of being dropped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, TransportError};
use crate::types::{DroneId, FaultKind, FireEvent, Point, ProducerId, ZoneId};

/// Per-caller request sequence number.
pub type Seq = u64;

/// Largest datagram either side will send or accept.
pub const MAX_DATAGRAM: usize = 8192;

/// Identity of the process issuing a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Caller {
    Drone(DroneId),
    Producer(ProducerId),
}

impl fmt::Display for Caller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Caller::Drone(id) => write!(f, "drone-{id}"),
            Caller::Producer(id) => write!(f, "producer-{id}"),
        }
    }
}

/// The dispatcher's method table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    AddFireEvent(FireEvent),
    GetNextFireEvent,
    GetNextAssignedEvent { x: f64, y: f64 },
    GetAdditionalFireEvent { battery: f64, x: f64, y: f64 },
    UpdateStatus { event: FireEvent, dispensed: i32 },
    HandleDroneFault { event: FireEvent, fault: FaultKind },
    SetEventsLoaded(ProducerId),
    CalculateTravelTime { x: f64, y: f64, zone_id: ZoneId },
    ReleaseEvent(FireEvent),
}

impl Method {
    pub const NAMES: [&'static str; 9] = [
        "ADD_FIRE_EVENT",
        "GET_NEXT_FIRE_EVENT",
        "GET_NEXT_ASSIGNED_EVENT",
        "GET_ADDITIONAL_FIRE_EVENT",
        "UPDATE_STATUS",
        "HANDLE_DRONE_FAULT",
        "SET_EVENTS_LOADED",
        "CALCULATE_TRAVEL_TIME",
        "RELEASE_EVENT",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Method::AddFireEvent(_) => "ADD_FIRE_EVENT",
            Method::GetNextFireEvent => "GET_NEXT_FIRE_EVENT",
            Method::GetNextAssignedEvent { .. } => "GET_NEXT_ASSIGNED_EVENT",
            Method::GetAdditionalFireEvent { .. } => "GET_ADDITIONAL_FIRE_EVENT",
            Method::UpdateStatus { .. } => "UPDATE_STATUS",
            Method::HandleDroneFault { .. } => "HANDLE_DRONE_FAULT",
            Method::SetEventsLoaded(_) => "SET_EVENTS_LOADED",
            Method::CalculateTravelTime { .. } => "CALCULATE_TRAVEL_TIME",
            Method::ReleaseEvent(_) => "RELEASE_EVENT",
        }
    }

    /// Whether a caller of this class may invoke the method.
    pub fn permitted_for(&self, caller: Caller) -> bool {
        match caller {
            Caller::Drone(_) => true,
            Caller::Producer(_) => matches!(self, Method::AddFireEvent(_) | Method::SetEventsLoaded(_)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub seq: Seq,
    pub caller: Caller,
    pub call: Method,
}

/// Route from a position to a zone center.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TravelPlan {
    pub destination: Point,
    pub seconds: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyBody {
    Ack,
    /// An event, or the explicit "no result" marker.
    Event(Option<FireEvent>),
    /// Nothing to hand out yet; ask again later.
    Wait,
    /// No work will ever arrive again.
    Stop,
    Travel(TravelPlan),
    Error(RemoteError),
}

impl ReplyBody {
    pub fn kind(&self) -> &'static str {
        match self {
            ReplyBody::Ack => "ACK",
            ReplyBody::Event(Some(_)) => "EVENT",
            ReplyBody::Event(None) => "NO_EVENT",
            ReplyBody::Wait => "WAIT",
            ReplyBody::Stop => "STOP",
            ReplyBody::Travel(_) => "TRAVEL",
            ReplyBody::Error(_) => "ERROR",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub seq: Seq,
    pub body: ReplyBody,
}

#[derive(Deserialize)]
struct RawRequest {
    seq: Seq,
    caller: Caller,
    call: serde_json::Value,
}

/// Outcome of decoding an inbound request datagram.
#[derive(Debug)]
pub enum Decoded {
    Call(Request),
    /// Envelope understood but the call is not; answer with the error.
    Rejected { seq: Seq, caller: Caller, error: RemoteError },
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, TransportError> {
    Ok(serde_json::to_vec(message)?)
}

pub fn decode_reply(bytes: &[u8]) -> Result<Reply, TransportError> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Decode a request; fails only when the envelope itself is unreadable.
pub fn decode_request(bytes: &[u8]) -> Result<Decoded, TransportError> {
    let raw: RawRequest = serde_json::from_slice(bytes)?;
    let name = raw
        .call
        .get("method")
        .and_then(serde_json::Value::as_str)
        .unwrap_or_default()
        .to_string();
    if !Method::NAMES.contains(&name.as_str()) {
        return Ok(Decoded::Rejected {
            seq: raw.seq,
            caller: raw.caller,
            error: RemoteError::UnknownMethod(name),
        });
    }
    match serde_json::from_value::<Method>(raw.call) {
        Ok(call) => Ok(Decoded::Call(Request {
            seq: raw.seq,
            caller: raw.caller,
            call,
        })),
        Err(err) => Ok(Decoded::Rejected {
            seq: raw.seq,
            caller: raw.caller,
            error: RemoteError::MalformedArguments {
                method: name,
                reason: err.to_string(),
            },
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_match_wire_tags() {
        let calls = [
            Method::AddFireEvent(FireEvent::new("t", 1, "FIRE_DETECTED", "low", FaultKind::None)),
            Method::GetNextFireEvent,
            Method::GetNextAssignedEvent { x: 0.0, y: 0.0 },
            Method::GetAdditionalFireEvent { battery: 1.0, x: 0.0, y: 0.0 },
            Method::SetEventsLoaded(3),
            Method::CalculateTravelTime { x: 1.0, y: 2.0, zone_id: 4 },
        ];
        for call in calls {
            let value = serde_json::to_value(&call).expect("serialize");
            assert_eq!(value["method"], call.name());
            assert!(Method::NAMES.contains(&call.name()));
        }
    }

    #[test]
    fn request_decodes_back() {
        let request = Request {
            seq: 7,
            caller: Caller::Drone(2),
            call: Method::GetNextAssignedEvent { x: 12.5, y: -3.0 },
        };
        let bytes = encode(&request).expect("encode");
        match decode_request(&bytes).expect("decode") {
            Decoded::Call(decoded) => assert_eq!(decoded, request),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_method_is_rejected_not_dropped() {
        let bytes = br#"{"seq":4,"caller":{"kind":"drone","id":1},"call":{"method":"SELF_DESTRUCT"}}"#;
        match decode_request(bytes).expect("decode") {
            Decoded::Rejected { seq, caller, error } => {
                assert_eq!(seq, 4);
                assert_eq!(caller, Caller::Drone(1));
                assert_eq!(error, RemoteError::UnknownMethod("SELF_DESTRUCT".into()));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_arguments_are_rejected() {
        let bytes =
            br#"{"seq":5,"caller":{"kind":"producer","id":2},"call":{"method":"SET_EVENTS_LOADED","args":"zone-two"}}"#;
        match decode_request(bytes).expect("decode") {
            Decoded::Rejected { error: RemoteError::MalformedArguments { method, .. }, .. } => {
                assert_eq!(method, "SET_EVENTS_LOADED");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn broken_envelope_is_a_codec_error() {
        assert!(matches!(decode_request(b"not json"), Err(TransportError::Codec(_))));
    }

    #[test]
    fn producers_only_submit_and_finish_feeds() {
        let producer = Caller::Producer(1);
        assert!(Method::SetEventsLoaded(1).permitted_for(producer));
        assert!(!Method::GetNextFireEvent.permitted_for(producer));
        assert!(Method::GetNextFireEvent.permitted_for(Caller::Drone(1)));
    }
}
