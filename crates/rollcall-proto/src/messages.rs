//! Wire messages.
//!
//! Hand-written protobuf messages. Tags are part of the protocol: the signed
//! bytes of a claim are its protobuf encoding, so renumbering a field breaks
//! every signature made by an older client.

use prost::Message;

/// Radio advertisement, re-broadcast while a session is active.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Advertisement {
    #[prost(string, tag = "1")]
    pub session_code: String,
    #[prost(string, tag = "2")]
    pub course_id: String,
    #[prost(uint32, tag = "3")]
    pub broadcast_version: u32,
}

#[derive(Clone, PartialEq, Eq, Message)]
pub struct ConnectRequest {
    #[prost(string, tag = "1")]
    pub session_code: String,
}

/// Host's answer to a connect request, signed with the session key.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct NonceResponse {
    #[prost(bytes = "vec", tag = "1")]
    pub nonce: Vec<u8>,
    #[prost(string, tag = "2")]
    pub session_id: String,
    /// Unix milliseconds after which the host no longer accepts the nonce.
    #[prost(int64, tag = "3")]
    pub expires_at_ms: i64,
    #[prost(bytes = "vec", tag = "4")]
    pub session_public_key: Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub signature: Vec<u8>,
}

/// The seven signed fields of an attendance packet, in canonical order.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct PacketClaim {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub account_id: String,
    #[prost(string, tag = "3")]
    pub device_id: String,
    #[prost(bytes = "vec", tag = "4")]
    pub nonce: Vec<u8>,
    /// Match score in basis points.
    #[prost(uint32, tag = "5")]
    pub liveness_score: u32,
    #[prost(sint32, tag = "6")]
    pub rssi_at_capture: i32,
    #[prost(int64, tag = "7")]
    pub client_timestamp_ms: i64,
}

/// A signed claim of presence.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct AttendancePacket {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(string, tag = "2")]
    pub account_id: String,
    #[prost(string, tag = "3")]
    pub device_id: String,
    #[prost(bytes = "vec", tag = "4")]
    pub nonce: Vec<u8>,
    #[prost(uint32, tag = "5")]
    pub liveness_score: u32,
    #[prost(sint32, tag = "6")]
    pub rssi_at_capture: i32,
    #[prost(int64, tag = "7")]
    pub client_timestamp_ms: i64,
    #[prost(bytes = "vec", tag = "8")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum WireStatus {
    Unspecified = 0,
    Verified = 1,
    Rejected = 2,
}

/// Host's verdict on a packet, signed with the session key.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct SubmissionResult {
    #[prost(string, tag = "1")]
    pub session_id: String,
    #[prost(bytes = "vec", tag = "2")]
    pub nonce: Vec<u8>,
    #[prost(enumeration = "WireStatus", tag = "3")]
    pub status: i32,
    /// Rejection reason code, empty when verified.
    #[prost(string, tag = "4")]
    pub reason: String,
    #[prost(int64, tag = "5")]
    pub recorded_at_ms: i64,
    #[prost(bytes = "vec", tag = "6")]
    pub signature: Vec<u8>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum RefusalReason {
    Unspecified = 0,
    UnknownSession = 1,
    SessionEnded = 2,
    SessionFull = 3,
    Malformed = 4,
}

/// Connection refused before or instead of a nonce.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Refusal {
    #[prost(enumeration = "RefusalReason", tag = "1")]
    pub reason: i32,
    #[prost(string, tag = "2")]
    pub detail: String,
}

/// Client abandons the attempt; the host expires the nonce.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Cancel {
    #[prost(bytes = "vec", tag = "1")]
    pub nonce: Vec<u8>,
}

/// Envelope for everything sent over a connection.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct Frame {
    #[prost(oneof = "frame::Kind", tags = "1, 2, 3, 4, 5, 6, 7")]
    pub kind: Option<frame::Kind>,
}

pub mod frame {
    #[derive(Clone, PartialEq, Eq, prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Advertisement(super::Advertisement),
        #[prost(message, tag = "2")]
        ConnectRequest(super::ConnectRequest),
        #[prost(message, tag = "3")]
        NonceResponse(super::NonceResponse),
        #[prost(message, tag = "4")]
        AttendancePacket(super::AttendancePacket),
        #[prost(message, tag = "5")]
        SubmissionResult(super::SubmissionResult),
        #[prost(message, tag = "6")]
        Refusal(super::Refusal),
        #[prost(message, tag = "7")]
        Cancel(super::Cancel),
    }
}

impl Frame {
    pub const fn new(kind: frame::Kind) -> Self {
        Self { kind: Some(kind) }
    }

    /// Short name for logs.
    pub const fn kind_name(&self) -> &'static str {
        match &self.kind {
            None => "empty",
            Some(frame::Kind::Advertisement(_)) => "advertisement",
            Some(frame::Kind::ConnectRequest(_)) => "connect_request",
            Some(frame::Kind::NonceResponse(_)) => "nonce_response",
            Some(frame::Kind::AttendancePacket(_)) => "attendance_packet",
            Some(frame::Kind::SubmissionResult(_)) => "submission_result",
            Some(frame::Kind::Refusal(_)) => "refusal",
            Some(frame::Kind::Cancel(_)) => "cancel",
        }
    }
}

impl Advertisement {
    pub fn to_bytes(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

macro_rules! frame_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Frame {
                fn from(msg: $variant) -> Self {
                    Self::new(frame::Kind::$variant(msg))
                }
            }
        )*
    };
}

frame_from!(
    Advertisement,
    ConnectRequest,
    NonceResponse,
    AttendancePacket,
    SubmissionResult,
    Refusal,
    Cancel,
);
