//! Wire envelope definitions for the user WebSocket protocol.
//!
//! Every frame is a JSON object carrying an integer `_type` discriminant
//! plus tag-specific fields. Decoding happens in two steps: the `_type`
//! field selects a variant, then the remaining fields deserialize into
//! that variant's payload and run its validation. Either step failing is
//! a [`DecodeError`], which the protocol layer reports as an
//! `INVALID_MESSAGE` error envelope rather than a connection-fatal
//! condition.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use parkflow_core::types::Location;

use crate::lot::NearbyLot;

/// Name of the discriminant field.
const TYPE_FIELD: &str = "_type";

/// Failure to decode an inbound frame into a [`WsMessage`].
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The frame is not a JSON object.
    #[error("frame is not a JSON object")]
    NotAnObject,
    /// The `_type` field is absent.
    #[error("missing _type")]
    MissingTag,
    /// The `_type` field is not an integer.
    #[error("_type is not an integer")]
    NonIntegerTag,
    /// The `_type` value does not name a known message.
    #[error("invalid _type: {0}")]
    UnknownTag(i64),
    /// The payload fields failed to deserialize.
    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
    /// The payload deserialized but failed validation.
    #[error("invalid payload: {0}")]
    Validation(String),
}

/// Protocol error codes carried in [`ErrorInfo::code`].
///
/// The numeric values are part of the wire contract; never renumber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    /// A connection for this user id is already open.
    AnotherConnectionOpen = 1,
    /// The inbound frame failed to decode or validate.
    InvalidMessage = 2,
    /// Well-formed tag the server does not accept from clients.
    NotImplemented = 3,
    /// Session registry state is inconsistent; the connection closes.
    CorruptedSession = 4,
    /// The allocation commit was rejected (lot full or duplicate).
    AllocationCommitFail = 5,
    /// No eligible lot within the requested distance.
    NoAvailableParkingLot = 6,
    /// The persistence layer failed; the request may be retried.
    Database = 7,
    /// An unexpected internal failure; the request may be retried.
    Internal = 8,
}

impl ErrorCode {
    /// Canonical human-readable text for this code.
    pub fn message(&self) -> &'static str {
        match self {
            Self::AnotherConnectionOpen => "another connection is open for this user",
            Self::InvalidMessage => "invalid message",
            Self::NotImplemented => "message type not accepted by the server",
            Self::CorruptedSession => "session state is corrupted",
            Self::AllocationCommitFail => "failed to commit allocation",
            Self::NoAvailableParkingLot => "no available parking lot",
            Self::Database => "database error",
            Self::Internal => "internal server error",
        }
    }
}

/// The `error` object of an error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable numeric code, see [`ErrorCode`].
    pub code: u32,
    /// Human-readable text.
    pub message: String,
}

/// Location update payload (tag 1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdate {
    /// The client's current position.
    pub location: Location,
}

impl LocationUpdate {
    fn validate(&self) -> Result<(), DecodeError> {
        if !self.location.in_range() {
            return Err(DecodeError::Validation("location out of range".into()));
        }
        Ok(())
    }
}

/// Parking request payload (tag 2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingRequest {
    /// Where the client wants to park.
    pub location: Location,
    /// Free-form preferences; the engine reads the `distance` key.
    #[serde(default)]
    pub preferences: HashMap<String, Value>,
}

impl ParkingRequest {
    fn validate(&self) -> Result<(), DecodeError> {
        if !self.location.in_range() {
            return Err(DecodeError::Validation("location out of range".into()));
        }
        Ok(())
    }
}

/// The lot object of an allocation offer (tag 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferedLot {
    /// Lot identifier, echoed back in acceptance/rejection.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Total capacity.
    pub capacity: i32,
    /// Price per hour.
    pub price: f64,
    /// Lot position.
    pub location: Location,
    /// Great-circle distance from the requested location, in meters.
    pub distance: f64,
    /// Free slots at offer time.
    pub availability: i32,
}

impl From<&NearbyLot> for OfferedLot {
    fn from(nearby: &NearbyLot) -> Self {
        Self {
            id: nearby.lot.id,
            name: nearby.lot.name.clone(),
            capacity: nearby.lot.capacity,
            price: nearby.lot.price,
            location: nearby.lot.location(),
            distance: nearby.distance_meters,
            availability: nearby.lot.num_available - nearby.lot.num_allocated,
        }
    }
}

/// Allocation offer payload (tag 3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingAllocation {
    /// The offered lot.
    pub lot: OfferedLot,
}

/// Acceptance payload (tag 4).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingAcceptance {
    /// Id of the accepted lot.
    pub id: i32,
}

impl ParkingAcceptance {
    fn validate(&self) -> Result<(), DecodeError> {
        validate_non_negative_id(self.id)
    }
}

/// Rejection payload (tag 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingRejection {
    /// Id of the declined lot.
    pub id: i32,
}

impl ParkingRejection {
    fn validate(&self) -> Result<(), DecodeError> {
        validate_non_negative_id(self.id)
    }
}

/// Cancellation payload (tag 7).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParkingCancellation {
    /// Id of the lot the user is walking away from.
    pub id: i32,
    /// Cancellation reason; 0 is "unknown".
    #[serde(default)]
    pub reason: i32,
}

impl ParkingCancellation {
    fn validate(&self) -> Result<(), DecodeError> {
        validate_non_negative_id(self.id)
    }
}

fn validate_non_negative_id(id: i32) -> Result<(), DecodeError> {
    if id < 0 {
        return Err(DecodeError::Validation("id must be non-negative".into()));
    }
    Ok(())
}

/// A decoded wire envelope.
///
/// Closed over the nine protocol tags; dispatch sites match exhaustively
/// so an added tag is a compile error everywhere it matters.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// Tag 1, client → server.
    LocationUpdate(LocationUpdate),
    /// Tag 2, client → server.
    ParkingRequest(ParkingRequest),
    /// Tag 3, server → client.
    ParkingAllocation(ParkingAllocation),
    /// Tag 4, client → server.
    ParkingAcceptance(ParkingAcceptance),
    /// Tag 5, client → server.
    ParkingRejection(ParkingRejection),
    /// Tag 6, server → client; no payload.
    ParkingDeallocation,
    /// Tag 7, client → server.
    ParkingCancellation(ParkingCancellation),
    /// Tag 8, server → client.
    Error(ErrorInfo),
    /// Tag 9, server → client; no payload.
    Confirmation,
}

impl WsMessage {
    /// Wire discriminant for this variant.
    pub fn tag(&self) -> i64 {
        match self {
            Self::LocationUpdate(_) => 1,
            Self::ParkingRequest(_) => 2,
            Self::ParkingAllocation(_) => 3,
            Self::ParkingAcceptance(_) => 4,
            Self::ParkingRejection(_) => 5,
            Self::ParkingDeallocation => 6,
            Self::ParkingCancellation(_) => 7,
            Self::Error(_) => 8,
            Self::Confirmation => 9,
        }
    }

    /// Build an error envelope with the code's canonical text.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error(ErrorInfo {
            code: code as u32,
            message: code.message().to_string(),
        })
    }

    /// Build an error envelope with custom text.
    pub fn error_with_message(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorInfo {
            code: code as u32,
            message: message.into(),
        })
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> String {
        let payload = match self {
            Self::LocationUpdate(p) => serde_json::to_value(p),
            Self::ParkingRequest(p) => serde_json::to_value(p),
            Self::ParkingAllocation(p) => serde_json::to_value(p),
            Self::ParkingAcceptance(p) => serde_json::to_value(p),
            Self::ParkingRejection(p) => serde_json::to_value(p),
            Self::ParkingDeallocation => Ok(Value::Object(Default::default())),
            Self::ParkingCancellation(p) => serde_json::to_value(p),
            Self::Error(p) => Ok(serde_json::json!({ "error": p })),
            Self::Confirmation => Ok(Value::Object(Default::default())),
        };

        // Payload structs contain only JSON-representable fields.
        let mut object = match payload {
            Ok(Value::Object(map)) => map,
            _ => Default::default(),
        };
        object.insert(TYPE_FIELD.to_string(), Value::from(self.tag()));
        Value::Object(object).to_string()
    }

    /// Decode a wire frame.
    pub fn decode(raw: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(raw)?;
        let Value::Object(mut object) = value else {
            return Err(DecodeError::NotAnObject);
        };

        let tag = object.remove(TYPE_FIELD).ok_or(DecodeError::MissingTag)?;
        let tag = tag.as_i64().ok_or(DecodeError::NonIntegerTag)?;
        let rest = Value::Object(object);

        let message = match tag {
            1 => {
                let payload: LocationUpdate = serde_json::from_value(rest)?;
                payload.validate()?;
                Self::LocationUpdate(payload)
            }
            2 => {
                let payload: ParkingRequest = serde_json::from_value(rest)?;
                payload.validate()?;
                Self::ParkingRequest(payload)
            }
            3 => {
                let payload: ParkingAllocation = serde_json::from_value(rest)?;
                Self::ParkingAllocation(payload)
            }
            4 => {
                let payload: ParkingAcceptance = serde_json::from_value(rest)?;
                payload.validate()?;
                Self::ParkingAcceptance(payload)
            }
            5 => {
                let payload: ParkingRejection = serde_json::from_value(rest)?;
                payload.validate()?;
                Self::ParkingRejection(payload)
            }
            6 => Self::ParkingDeallocation,
            7 => {
                let payload: ParkingCancellation = serde_json::from_value(rest)?;
                payload.validate()?;
                Self::ParkingCancellation(payload)
            }
            8 => {
                #[derive(Deserialize)]
                struct ErrorEnvelope {
                    error: ErrorInfo,
                }
                let payload: ErrorEnvelope = serde_json::from_value(rest)?;
                Self::Error(payload.error)
            }
            9 => Self::Confirmation,
            other => return Err(DecodeError::UnknownTag(other)),
        };

        Ok(message)
    }
}
