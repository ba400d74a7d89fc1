//! Rollcall attendance packet protocol.
//!
//! Shared by the session host and the discovery client:
//!
//! - [`messages`]: the wire messages, each a protobuf message with fixed tags
//! - [`codec`]: frame encoding over a radio link
//! - [`packet`]: canonical signing bytes for claims, nonces and results
//! - [`validate`]: the five-step, short-circuiting packet validation
//! - [`code`]: six-character session codes
//! - [`radio`]: radio capabilities consumed from the platform
//! - [`record`]: attendance records as kept by host and client
//! - [`sim`]: an in-memory radio medium

pub mod class;
pub mod code;
pub mod codec;
pub mod messages;
pub mod packet;
pub mod radio;
pub mod record;
pub mod sim;
pub mod validate;

pub use class::FailureClass;
pub use code::{InvalidSessionCode, SessionCode};
pub use codec::{CodecError, recv_frame, send_frame};
pub use messages::{
    Advertisement, AttendancePacket, Cancel, ConnectRequest, Frame, NonceResponse, PacketClaim,
    Refusal, RefusalReason, SubmissionResult, WireStatus, frame,
};
pub use radio::{Acceptor, Advertiser, Connector, Link, RadioError, Scanner, SeenAdvertisement};
pub use record::{AttendanceRecord, AttendanceStatus};
pub use validate::{NonceState, NonceView, RejectReason, ValidationContext, ValidationStep, validate};

/// Protocol revision carried in every advertisement.
pub const BROADCAST_VERSION: u32 = 1;

/// Nonce length in bytes (128 bits).
pub const NONCE_LEN: usize = 16;
