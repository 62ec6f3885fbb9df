//! Periodic brightness poll
//!
//! Brightness has no HAL push notification, so a timer samples it at
//! ~100ms. Volume is notification-driven and needs no poll. The task
//! checks the shutdown flag before every send so that no tick is
//! delivered after `stop_monitoring` begins tearing things down.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{Channel, SourceEvent};

/// Brightness sampling cadence. Fast enough that a key press and its
/// observed value land inside the recency window.
pub const BRIGHTNESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn the brightness poll loop.
///
/// Ticks become `Observation` events for the brightness channel. The
/// loop exits as soon as `shutdown` flips true; the engine additionally
/// drops the event receiver on teardown, so a tick racing the shutdown
/// edge lands in a closed channel instead of a live reconciler.
pub fn spawn_brightness_poll(
    events: mpsc::Sender<SourceEvent>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(BRIGHTNESS_POLL_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        debug!("brightness poll started ({:?})", BRIGHTNESS_POLL_INTERVAL);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    trace!("brightness poll tick");
                    if events
                        .send(SourceEvent::Observation {
                            channel: Channel::Brightness,
                            generation: 0,
                        })
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("brightness poll stopped");
    })
}
