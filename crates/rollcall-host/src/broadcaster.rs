//! Advertisement loop.
//!
//! Re-broadcasts the session advertisement at a fixed interval on its own
//! task, so a slow connection never delays it. A radio error here is fatal
//! to the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use rollcall_proto::{Advertisement, Advertiser};

use crate::actor::SessionHandle;
use crate::session::StopReason;

pub(crate) fn spawn_broadcaster(
    advertiser: Arc<dyn Advertiser>,
    advertisement: Advertisement,
    interval: Duration,
    session: SessionHandle,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = advertiser.advertise(&advertisement).await {
                        error!(
                            session_id = %session.session_id(),
                            code = %advertisement.session_code,
                            error = %e,
                            "Advertiser fault; stopping session"
                        );
                        let _ = session.stop(StopReason::AdvertiserFault(e.to_string())).await;
                        break;
                    }
                    debug!(code = %advertisement.session_code, "Advertisement broadcast");
                }
            }
        }
        advertiser.stop_advertising().await;
    })
}
