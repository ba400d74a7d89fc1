//! Session discovery.
//!
//! A scan is a lazy stream: nothing touches the radio until it is first
//! polled. It listens for one scan window, keeps the strongest sighting of
//! each session code and then yields them closest first. Calling
//! [`Discovery::scan`] again starts a fresh scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_stream::{Stream, StreamExt};
use tracing::debug;

use rollcall_proto::{BROADCAST_VERSION, Scanner, SeenAdvertisement, SessionCode};

use crate::error::{ClientError, Result};

/// An advertised session, as heard by this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionAdvertisement {
    /// Radio address of the host.
    pub address: String,
    pub code: SessionCode,
    pub course_id: String,
    pub broadcast_version: u32,
    pub rssi_dbm: i32,
}

impl SessionAdvertisement {
    fn from_seen(seen: SeenAdvertisement) -> Option<Self> {
        let ad = seen.advertisement;
        if ad.broadcast_version != BROADCAST_VERSION {
            debug!(
                address = %seen.address,
                version = ad.broadcast_version,
                "Ignoring advertisement with unsupported version"
            );
            return None;
        }
        let code = SessionCode::parse(&ad.session_code).ok()?;
        Some(Self {
            address: seen.address,
            code,
            course_id: ad.course_id,
            broadcast_version: ad.broadcast_version,
            rssi_dbm: seen.rssi_dbm,
        })
    }
}

#[derive(Clone)]
pub struct Discovery {
    scanner: Arc<dyn Scanner>,
    window: Duration,
}

impl std::fmt::Debug for Discovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Discovery")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Discovery {
    pub fn new(scanner: Arc<dyn Scanner>, window: Duration) -> Self {
        Self { scanner, window }
    }

    /// Scan for sessions, strongest signal first. A disabled radio yields a
    /// single [`ClientError::RadioUnavailable`] without waiting out the
    /// window.
    pub fn scan(&self) -> impl Stream<Item = Result<SessionAdvertisement>> + Send + 'static {
        let scanner = Arc::clone(&self.scanner);
        let window = self.window;
        async_stream::try_stream! {
            let mut sightings = scanner.start_scan().await.map_err(ClientError::from)?;
            let deadline = Instant::now() + window;
            let mut strongest: HashMap<SessionCode, SessionAdvertisement> = HashMap::new();

            while let Ok(Some(seen)) = tokio::time::timeout_at(deadline, sightings.recv()).await {
                let Some(ad) = SessionAdvertisement::from_seen(seen) else {
                    continue;
                };
                match strongest.get(&ad.code) {
                    Some(known) if known.rssi_dbm >= ad.rssi_dbm => {}
                    _ => {
                        strongest.insert(ad.code.clone(), ad);
                    }
                }
            }

            let mut ranked: Vec<_> = strongest.into_values().collect();
            ranked.sort_by(|a, b| b.rssi_dbm.cmp(&a.rssi_dbm).then_with(|| a.code.cmp(&b.code)));
            debug!(sessions = ranked.len(), "Scan complete");
            for ad in ranked {
                yield ad;
            }
        }
    }

    /// Run one scan to completion.
    pub async fn scan_all(&self) -> Result<Vec<SessionAdvertisement>> {
        let stream = self.scan();
        tokio::pin!(stream);
        let mut out = Vec::new();
        while let Some(ad) = stream.next().await {
            out.push(ad?);
        }
        Ok(out)
    }

    /// Find the session advertising `code`.
    pub async fn find(&self, code: &SessionCode) -> Result<SessionAdvertisement> {
        let stream = self.scan();
        tokio::pin!(stream);
        while let Some(ad) = stream.next().await {
            let ad = ad?;
            if &ad.code == code {
                return Ok(ad);
            }
        }
        Err(ClientError::SessionNotFound(code.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rollcall_proto::sim::Air;
    use rollcall_proto::{Advertisement, Advertiser};

    async fn advertise(air: &Air, host: &str, code: &str) {
        air.advertiser(host)
            .advertise(&Advertisement {
                session_code: code.into(),
                course_id: "CS-101".into(),
                broadcast_version: BROADCAST_VERSION,
            })
            .await
            .unwrap();
    }

    fn discovery(air: &Air, device: &str) -> Discovery {
        Discovery::new(Arc::new(air.device(device)), Duration::from_millis(50))
    }

    #[tokio::test]
    async fn ranks_by_signal_strength() {
        let air = Air::new();
        advertise(&air, "far", "FAR001").await;
        advertise(&air, "near", "NEAR01").await;
        advertise(&air, "mid", "MID001").await;
        air.set_rssi("phone", "far", -80);
        air.set_rssi("phone", "near", -40);
        air.set_rssi("phone", "mid", -60);

        let found = discovery(&air, "phone").scan_all().await.unwrap();
        let codes: Vec<_> = found.iter().map(|a| a.code.as_str()).collect();
        assert_eq!(codes, ["NEAR01", "MID001", "FAR001"]);
    }

    #[tokio::test]
    async fn duplicate_codes_keep_strongest() {
        let air = Air::new();
        advertise(&air, "relay", "AB12CD").await;
        advertise(&air, "lectern", "AB12CD").await;
        air.set_rssi("phone", "relay", -75);
        air.set_rssi("phone", "lectern", -45);

        let found = discovery(&air, "phone").scan_all().await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].address, "lectern");
        assert_eq!(found[0].rssi_dbm, -45);
    }

    #[tokio::test]
    async fn disabled_radio_fails_immediately() {
        let air = Air::new();
        advertise(&air, "lectern", "AB12CD").await;
        air.set_radio_enabled("phone", false);

        let slow = Discovery::new(Arc::new(air.device("phone")), Duration::from_secs(3600));
        let result = tokio::time::timeout(Duration::from_secs(1), slow.scan_all())
            .await
            .unwrap();
        assert!(matches!(result, Err(ClientError::RadioUnavailable)));
    }

    #[tokio::test]
    async fn scan_is_restartable() {
        let air = Air::new();
        let d = discovery(&air, "phone");
        assert!(d.scan_all().await.unwrap().is_empty());

        advertise(&air, "lectern", "AB12CD").await;
        assert_eq!(d.scan_all().await.unwrap().len(), 1);
        assert!(d.find(&SessionCode::parse("ab12cd").unwrap()).await.is_ok());
        assert!(matches!(
            d.find(&SessionCode::parse("ZZ99ZZ").unwrap()).await,
            Err(ClientError::SessionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn foreign_versions_are_ignored() {
        let air = Air::new();
        air.advertiser("old")
            .advertise(&Advertisement {
                session_code: "OLD001".into(),
                course_id: String::new(),
                broadcast_version: BROADCAST_VERSION + 1,
            })
            .await
            .unwrap();
        assert!(discovery(&air, "phone").scan_all().await.unwrap().is_empty());
    }
}
