//! Rollcall Session Discovery Client
//!
//! Runs on the student's device: scans for advertised sessions, connects,
//! proves liveness and identity on-device, and submits a signed attendance
//! packet. Raw biometric data never leaves the device; only the match score
//! travels, inside the signed packet.
//!
//! - [`discovery`]: the scan stream, strongest signal first
//! - [`state`]: the join state machine as a pure transition function
//! - [`client`]: the I/O driving that machine
//! - [`history`]: the device's own attendance history

pub mod client;
pub mod discovery;
pub mod error;
pub mod history;
pub mod state;

pub use client::{ClientIdentity, DiscoveryClient};
pub use discovery::{Discovery, SessionAdvertisement};
pub use error::{ClientError, Result};
pub use history::{AttendanceHistory, HistoryStats};
pub use state::{ClientEvent, ClientState, FailureCause, InvalidTransition, transition};
