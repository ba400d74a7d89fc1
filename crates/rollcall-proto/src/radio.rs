//! Radio capabilities.
//!
//! The platform BLE stack is consumed through these traits; nothing in the
//! protocol depends on a particular driver. [`crate::sim`] implements them
//! in memory.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::class::FailureClass;
use crate::messages::Advertisement;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RadioError {
    #[error("Radio unavailable")]
    Unavailable,

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Peer {0} unreachable")]
    Unreachable(String),

    #[error("Advertiser fault: {0}")]
    AdvertiserFault(String),
}

impl RadioError {
    pub const fn class(&self) -> FailureClass {
        FailureClass::Transport
    }
}

/// One advertisement as heard by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenAdvertisement {
    /// Radio address of the advertiser, used to connect.
    pub address: String,
    pub advertisement: Advertisement,
    pub rssi_dbm: i32,
}

#[async_trait]
pub trait Advertiser: Send + Sync {
    /// Broadcast (or re-broadcast) an advertisement.
    async fn advertise(&self, advertisement: &Advertisement) -> Result<(), RadioError>;

    /// Stop broadcasting. Never fails.
    async fn stop_advertising(&self);
}

#[async_trait]
pub trait Scanner: Send + Sync {
    /// Start a scan. Advertisements are delivered on the returned channel
    /// until the radio closes it; a disabled radio fails immediately.
    async fn start_scan(&self) -> Result<mpsc::Receiver<SeenAdvertisement>, RadioError>;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, RadioError>;
}

#[async_trait]
pub trait Acceptor: Send {
    /// Wait for the next inbound connection.
    async fn accept(&mut self) -> Result<Box<dyn Link>, RadioError>;
}

/// A point-to-point connection carrying opaque payloads.
#[async_trait]
pub trait Link: Send + Sync {
    async fn send(&self, payload: Vec<u8>) -> Result<(), RadioError>;

    async fn recv(&mut self) -> Result<Vec<u8>, RadioError>;

    /// Signal strength of the peer as measured on this side.
    fn rssi_dbm(&self) -> i32;

    /// Radio address of the peer.
    fn peer(&self) -> &str;
}
