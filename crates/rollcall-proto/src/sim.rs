//! In-memory radio medium.
//!
//! One [`Air`] is shared by every simulated device. Hosts register an
//! advertiser and an acceptor under a radio address; clients get a
//! [`SimDevice`] that scans and connects. Signal strength is configured per
//! (device, host) pair, and faults can be injected to exercise the
//! transport-failure paths.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::messages::Advertisement;
use crate::radio::{Acceptor, Advertiser, Connector, Link, RadioError, Scanner, SeenAdvertisement};

/// RSSI reported for pairs without an explicit setting.
pub const DEFAULT_RSSI_DBM: i32 = -50;

const LINK_BUFFER: usize = 32;

/// A fault applied to the next connection a device opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFault {
    /// The link drops before the host sees it.
    DropOnConnect,
    /// The device's n-th outbound frame (0-based) on that link is lost.
    LoseOutbound(usize),
    /// The n-th frame (0-based) sent to the device on that link is lost.
    LoseInbound(usize),
}

#[derive(Default)]
struct HostSlot {
    advertisement: Option<Advertisement>,
    incoming: Option<mpsc::UnboundedSender<SimLink>>,
    pending_fault: Option<String>,
    broadcasts: u64,
}

#[derive(Default)]
struct AirState {
    hosts: HashMap<String, HostSlot>,
    radios_off: HashSet<String>,
    rssi: HashMap<(String, String), i32>,
    link_faults: HashMap<String, VecDeque<LinkFault>>,
}

impl AirState {
    fn rssi(&self, device: &str, host: &str) -> i32 {
        self.rssi
            .get(&(device.to_string(), host.to_string()))
            .copied()
            .unwrap_or(DEFAULT_RSSI_DBM)
    }
}

/// The shared medium. Cheap to clone.
#[derive(Clone, Default)]
pub struct Air {
    state: Arc<Mutex<AirState>>,
}

impl std::fmt::Debug for Air {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Air").finish_non_exhaustive()
    }
}

impl Air {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<R>(&self, f: impl FnOnce(&mut AirState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    pub fn advertiser(&self, address: &str) -> SimAdvertiser {
        self.with(|s| {
            s.hosts.entry(address.to_string()).or_default();
        });
        SimAdvertiser {
            air: self.clone(),
            address: address.to_string(),
        }
    }

    /// Register the host's inbound connection queue. A later call replaces
    /// the previous acceptor.
    pub fn acceptor(&self, address: &str) -> SimAcceptor {
        let (tx, rx) = mpsc::unbounded_channel();
        self.with(|s| {
            s.hosts.entry(address.to_string()).or_default().incoming = Some(tx);
        });
        SimAcceptor {
            address: address.to_string(),
            incoming: rx,
        }
    }

    pub fn device(&self, address: &str) -> SimDevice {
        SimDevice {
            air: self.clone(),
            address: address.to_string(),
        }
    }

    pub fn set_rssi(&self, device: &str, host: &str, rssi_dbm: i32) {
        self.with(|s| {
            s.rssi.insert((device.to_string(), host.to_string()), rssi_dbm);
        });
    }

    pub fn set_radio_enabled(&self, address: &str, enabled: bool) {
        self.with(|s| {
            if enabled {
                s.radios_off.remove(address);
            } else {
                s.radios_off.insert(address.to_string());
            }
        });
    }

    /// Make the host's next broadcast fail.
    pub fn fail_advertiser(&self, host: &str, reason: &str) {
        self.with(|s| {
            s.hosts.entry(host.to_string()).or_default().pending_fault = Some(reason.to_string());
        });
    }

    pub fn inject_link_fault(&self, device: &str, fault: LinkFault) {
        self.with(|s| {
            s.link_faults
                .entry(device.to_string())
                .or_default()
                .push_back(fault);
        });
    }

    /// Number of successful broadcasts by `host`.
    pub fn broadcasts(&self, host: &str) -> u64 {
        self.with(|s| s.hosts.get(host).map_or(0, |h| h.broadcasts))
    }

    pub fn is_advertising(&self, host: &str) -> bool {
        self.with(|s| s.hosts.get(host).is_some_and(|h| h.advertisement.is_some()))
    }
}

#[derive(Debug)]
pub struct SimAdvertiser {
    air: Air,
    address: String,
}

#[async_trait]
impl Advertiser for SimAdvertiser {
    async fn advertise(&self, advertisement: &Advertisement) -> Result<(), RadioError> {
        self.air.with(|s| {
            if s.radios_off.contains(&self.address) {
                return Err(RadioError::Unavailable);
            }
            let slot = s.hosts.entry(self.address.clone()).or_default();
            if let Some(reason) = slot.pending_fault.take() {
                slot.advertisement = None;
                return Err(RadioError::AdvertiserFault(reason));
            }
            slot.advertisement = Some(advertisement.clone());
            slot.broadcasts += 1;
            Ok(())
        })
    }

    async fn stop_advertising(&self) {
        self.air.with(|s| {
            if let Some(slot) = s.hosts.get_mut(&self.address) {
                slot.advertisement = None;
            }
        });
    }
}

#[derive(Debug)]
pub struct SimAcceptor {
    address: String,
    incoming: mpsc::UnboundedReceiver<SimLink>,
}

#[async_trait]
impl Acceptor for SimAcceptor {
    async fn accept(&mut self) -> Result<Box<dyn Link>, RadioError> {
        let link = self.incoming.recv().await.ok_or(RadioError::Unavailable)?;
        debug!(host = %self.address, peer = %link.peer, "Accepted simulated link");
        Ok(Box::new(link))
    }
}

/// A client device's radio.
#[derive(Debug, Clone)]
pub struct SimDevice {
    air: Air,
    address: String,
}

impl SimDevice {
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait]
impl Scanner for SimDevice {
    async fn start_scan(&self) -> Result<mpsc::Receiver<SeenAdvertisement>, RadioError> {
        let heard: Vec<SeenAdvertisement> = self.air.with(|s| {
            if s.radios_off.contains(&self.address) {
                return Err(RadioError::Unavailable);
            }
            Ok(s.hosts
                .iter()
                .filter_map(|(host, slot)| {
                    slot.advertisement.as_ref().map(|ad| SeenAdvertisement {
                        address: host.clone(),
                        advertisement: ad.clone(),
                        rssi_dbm: s.rssi(&self.address, host),
                    })
                })
                .collect())
        })?;

        let (tx, rx) = mpsc::channel(heard.len().max(1));
        for seen in heard {
            // Capacity covers every entry.
            let _ = tx.try_send(seen);
        }
        Ok(rx)
    }
}

#[async_trait]
impl Connector for SimDevice {
    async fn connect(&self, address: &str) -> Result<Box<dyn Link>, RadioError> {
        let (incoming, rssi_dbm, fault) = self.air.with(|s| {
            if s.radios_off.contains(&self.address) {
                return Err(RadioError::Unavailable);
            }
            let incoming = s
                .hosts
                .get(address)
                .filter(|h| h.advertisement.is_some())
                .and_then(|h| h.incoming.clone())
                .ok_or_else(|| RadioError::Unreachable(address.to_string()))?;
            let fault = s
                .link_faults
                .get_mut(&self.address)
                .and_then(VecDeque::pop_front);
            Ok((incoming, s.rssi(&self.address, address), fault))
        })?;

        let (device_tx, host_rx) = mpsc::channel(LINK_BUFFER);
        let (host_tx, device_rx) = mpsc::channel(LINK_BUFFER);

        let device_link = SimLink {
            peer: address.to_string(),
            rssi_dbm,
            tx: device_tx,
            rx: device_rx,
            lose_outbound: match fault {
                Some(LinkFault::LoseOutbound(n)) => Some(n),
                _ => None,
            },
            sent: AtomicUsize::new(0),
            lose_inbound: match fault {
                Some(LinkFault::LoseInbound(n)) => Some(n),
                _ => None,
            },
            received: 0,
        };
        if fault == Some(LinkFault::DropOnConnect) {
            debug!(device = %self.address, host = address, "Simulated link dropped on connect");
            return Ok(Box::new(device_link));
        }

        let host_link = SimLink {
            peer: self.address.clone(),
            rssi_dbm,
            tx: host_tx,
            rx: host_rx,
            lose_outbound: None,
            sent: AtomicUsize::new(0),
            lose_inbound: None,
            received: 0,
        };
        incoming
            .send(host_link)
            .map_err(|_| RadioError::Unreachable(address.to_string()))?;
        Ok(Box::new(device_link))
    }
}

#[derive(Debug)]
pub struct SimLink {
    peer: String,
    rssi_dbm: i32,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
    lose_outbound: Option<usize>,
    sent: AtomicUsize,
    lose_inbound: Option<usize>,
    received: usize,
}

#[async_trait]
impl Link for SimLink {
    async fn send(&self, payload: Vec<u8>) -> Result<(), RadioError> {
        let n = self.sent.fetch_add(1, Ordering::Relaxed);
        if self.lose_outbound == Some(n) {
            debug!(peer = %self.peer, frame = n, "Simulated frame lost");
            return Ok(());
        }
        self.tx
            .send(payload)
            .await
            .map_err(|_| RadioError::ConnectionLost)
    }

    async fn recv(&mut self) -> Result<Vec<u8>, RadioError> {
        loop {
            let payload = self.rx.recv().await.ok_or(RadioError::ConnectionLost)?;
            let n = self.received;
            self.received += 1;
            if self.lose_inbound == Some(n) {
                debug!(peer = %self.peer, frame = n, "Simulated inbound frame lost");
                continue;
            }
            return Ok(payload);
        }
    }

    fn rssi_dbm(&self) -> i32 {
        self.rssi_dbm
    }

    fn peer(&self) -> &str {
        &self.peer
    }
}
