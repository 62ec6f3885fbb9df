//! HUD engine - orchestration of sources, reconcilers, and the presenter
//!
//! The engine owns the monitoring lifecycle: it spawns one reconciler per
//! channel, subscribes the notification source, installs the key tap,
//! runs the brightness poll, and routes every `SourceEvent` to the right
//! consumer. `start`/`stop` are idempotent so a process-level singleton
//! policy can be enforced by the caller.

pub mod policy;
pub mod quantize;
pub mod reconciler;

#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::overlay::PresenterHandle;
use crate::sources::poll::spawn_brightness_poll;
use crate::sources::{
    Channel, ChangeNotifications, HardwareReader, KeySource, KeySourceError, SourceEvent,
    SubscriptionHandle,
};

use self::reconciler::{Reconciler, ReconcilerHandle};

/// A normalized "show the HUD" decision, emitted by a reconciler and
/// consumed by the overlay presenter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HudDecision {
    pub channel: Channel,
    pub value: f32,
    pub muted: bool,
    pub at: Instant,
}

/// Capacity for the merged source-event channel. Large enough to absorb
/// a burst of held-key repeats plus poll ticks without drops.
const EVENT_CHANNEL_CAPACITY: usize = 256;

struct Running {
    shutdown: watch::Sender<bool>,
    events_tx: mpsc::Sender<SourceEvent>,
    volume: ReconcilerHandle,
    brightness: ReconcilerHandle,
    dispatch: JoinHandle<()>,
    poll: JoinHandle<()>,
    forward: JoinHandle<()>,
}

pub struct HudEngine {
    hardware: Arc<dyn HardwareReader>,
    notifications: Arc<dyn ChangeNotifications>,
    keys: Arc<dyn KeySource>,
    config: watch::Receiver<Arc<AppConfig>>,
    presenter: PresenterHandle,
    running: tokio::sync::Mutex<Option<Running>>,
}

impl HudEngine {
    pub fn new(
        hardware: Arc<dyn HardwareReader>,
        notifications: Arc<dyn ChangeNotifications>,
        keys: Arc<dyn KeySource>,
        config: watch::Receiver<Arc<AppConfig>>,
        presenter: PresenterHandle,
    ) -> Self {
        Self {
            hardware,
            notifications,
            keys,
            config,
            presenter,
            running: tokio::sync::Mutex::new(None),
        }
    }

    /// Start monitoring. Idempotent: a second call while running is a
    /// no-op returning `Ok`.
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            debug!("engine already running; start ignored");
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel::<SourceEvent>(EVENT_CHANNEL_CAPACITY);
        let (decisions_tx, decisions_rx) = mpsc::unbounded_channel::<HudDecision>();

        let volume = Reconciler::spawn(
            Channel::Volume,
            self.hardware.clone(),
            self.config.clone(),
            decisions_tx.clone(),
        );
        let brightness = Reconciler::spawn(
            Channel::Brightness,
            self.hardware.clone(),
            self.config.clone(),
            decisions_tx,
        );

        let forward = spawn_decision_forwarder(decisions_rx, self.presenter.clone(), shutdown_rx.clone());

        // The privacy grant is re-checked on every start, never cached.
        if !self.keys.permission_granted() {
            info!(
                "input monitoring permission not granted; \
                 key-press detection disabled (no boundary feedback)"
            );
        } else {
            match self.keys.start(events_tx.clone()).await {
                Ok(()) => info!("media-key tap installed"),
                Err(KeySourceError::PermissionDenied) => info!(
                    "input monitoring permission revoked; continuing without key-press detection"
                ),
                Err(err) => warn!(%err, "key tap unavailable; continuing in degraded mode"),
            }
        }

        let subscription = self
            .notifications
            .subscribe(0, events_tx.clone())
            .await
            .map_err(|err| {
                warn!(%err, "volume change notifications unavailable");
                err
            })
            .ok();

        let poll = spawn_brightness_poll(events_tx.clone(), shutdown_rx.clone());

        let dispatch_events_tx = events_tx.clone();
        let dispatch = spawn_dispatch(DispatchLoop {
            events: events_rx,
            events_tx,
            notifications: self.notifications.clone(),
            volume: volume.clone(),
            brightness: brightness.clone(),
            presenter: self.presenter.clone(),
            subscription,
            generation: 0,
            shutdown: shutdown_rx,
        });

        *running = Some(Running {
            shutdown: shutdown_tx,
            events_tx: dispatch_events_tx,
            volume,
            brightness,
            dispatch,
            poll,
            forward,
        });

        info!("HUD monitoring started");
        Ok(())
    }

    /// Stop monitoring and release every subscription, tap, and timer.
    ///
    /// Idempotent. After return, no further state mutation or HUD
    /// emission can occur, even for events that were already in flight.
    pub async fn stop(&self) {
        let mut running = self.running.lock().await;
        let Some(run) = running.take() else {
            debug!("engine already stopped; stop ignored");
            return;
        };

        let _ = run.shutdown.send(true);
        self.keys.stop().await;

        run.volume.shutdown();
        run.brightness.shutdown();

        // The dispatch task unsubscribes the live notification handle on
        // its way out; waiting here guarantees the event pipeline is
        // fully drained before we report stopped.
        let _ = run.dispatch.await;
        let _ = run.poll.await;
        let _ = run.forward.await;

        self.presenter.hide();
        info!("HUD monitoring stopped");
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Sender into the running engine's merged event channel, for
    /// platform hooks wired up outside the engine (display watches).
    /// `None` while stopped.
    pub async fn event_sender(&self) -> Option<mpsc::Sender<SourceEvent>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|run| run.events_tx.clone())
    }
}

/// Forwards reconciler decisions to the presenter until shutdown.
///
/// A separate task so that a decision emitted by a still-draining
/// reconciler after `stop` lands in a closed channel instead of the
/// overlay.
fn spawn_decision_forwarder(
    mut decisions: mpsc::UnboundedReceiver<HudDecision>,
    presenter: PresenterHandle,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                decision = decisions.recv() => match decision {
                    Some(d) => presenter.present(d),
                    None => break,
                },
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}

struct DispatchLoop {
    events: mpsc::Receiver<SourceEvent>,
    /// Kept for re-subscription after device swaps; the loop itself
    /// exits on the shutdown watch, not on channel close.
    events_tx: mpsc::Sender<SourceEvent>,
    notifications: Arc<dyn ChangeNotifications>,
    volume: ReconcilerHandle,
    brightness: ReconcilerHandle,
    presenter: PresenterHandle,
    subscription: Option<SubscriptionHandle>,
    generation: u32,
    shutdown: watch::Receiver<bool>,
}

/// Routes merged source events to their consumers and owns the
/// notification subscription across device swaps.
fn spawn_dispatch(mut d: DispatchLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                event = d.events.recv() => match event {
                    Some(event) => d.handle(event).await,
                    None => break,
                },
                _ = d.shutdown.changed() => {
                    if *d.shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = d.subscription.take() {
            if let Err(err) = d.notifications.unsubscribe(handle).await {
                warn!(%err, "failed to tear down notification subscription");
            }
        }
    })
}

impl DispatchLoop {
    async fn handle(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Observation {
                channel: Channel::Volume,
                generation,
            } => self.volume.observe(generation),
            SourceEvent::Observation {
                channel: Channel::Brightness,
                generation,
            } => self.brightness.observe(generation),
            SourceEvent::Key(key) => match key.channel {
                Channel::Volume => self.volume.key(key),
                Channel::Brightness => self.brightness.key(key),
            },
            SourceEvent::DefaultDeviceChanged => self.resubscribe().await,
            SourceEvent::DisplaysChanged => self.presenter.reposition(),
        }
    }

    /// Default output device swapped: the old subscription is stale and
    /// must not linger. Tear it down first, then subscribe against the
    /// new device under a fresh generation so anything still queued for
    /// the old identity is discarded instead of mis-attributed.
    async fn resubscribe(&mut self) {
        self.generation += 1;
        info!(
            generation = self.generation,
            "default output device changed; re-resolving subscriptions"
        );

        if let Some(stale) = self.subscription.take() {
            if let Err(err) = self.notifications.unsubscribe(stale).await {
                warn!(%err, "failed to unsubscribe stale device listener");
            }
        }

        // Events channel is plumbed through the subscription itself; the
        // source keeps the sender it was given.
        match self
            .notifications
            .subscribe(self.generation, self.events_sender())
            .await
        {
            Ok(handle) => self.subscription = Some(handle),
            Err(err) => warn!(%err, "re-subscription against new device failed"),
        }

        self.volume.reset_device(self.generation);
    }

    fn events_sender(&self) -> mpsc::Sender<SourceEvent> {
        self.events_tx.clone()
    }
}
