//! Per-campaign poll scheduler
//!
//! The PollScheduler is responsible for:
//! - Bootstrapping a [`CampaignReconciler`] when a campaign is started
//! - Running one tokio task per campaign that ticks at its polling interval
//! - Driving the retry state machine from each tick's outcome
//! - Stopping campaigns on request or when retries are exhausted
//!
//! ## Lifecycle
//!
//! ```text
//! Idle ── start() ──▶ Starting ── bootstrap ok ──▶ Polling(None|Backoff|Once)
//!                        │                               │
//!                        └──── bootstrap failed ──▶ Stopped ◀── stop() / Shutdown
//! ```
//!
//! ## Cancellation
//!
//! Each campaign has its own [`CancellationToken`]. A stopped campaign's
//! in-flight calls are not aborted, but the tick fails on its next event or
//! state write, so it neither publishes nor persists anything after the stop.
//! It also cannot touch the scheduler entry of a later `start()` of the same
//! campaign (entries are generation-checked).

mod retry;

pub use retry::{PollerStatus, RetryMode, RetryPolicy, TickDecision};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::PollerConfig;
use crate::error::{Error, Result};
use crate::reconciler::{CampaignReconciler, ReconcilerContext, ReconcilerSettings};
use crate::traits::{GatedEventSink, GatedStateStore};

/// Lifecycle events emitted by the PollScheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    /// Campaign bootstrapped and its timer armed
    Started { campaign_id: String },

    /// Campaign no longer polled
    Stopped { campaign_id: String, reason: String },

    /// Retry mode of a campaign changed
    RetryModeChanged {
        campaign_id: String,
        mode: RetryMode,
        attempt: u32,
    },

    /// The last polled campaign stopped
    Disconnected,
}

/// Scheduler of campaign pollers
///
/// Cheap to clone; clones share the same pollers.
///
/// # Example
///
/// ```rust,no_run
/// # use fundwatch_core::config::PollerConfig;
/// # use fundwatch_core::reconciler::ReconcilerContext;
/// # use fundwatch_core::scheduler::PollScheduler;
/// # use std::time::Duration;
/// # async fn run(ctx: ReconcilerContext) -> fundwatch_core::Result<()> {
/// let (scheduler, mut events) = PollScheduler::new(ctx, PollerConfig::default())?;
/// scheduler.start("campaign-1", Duration::from_secs(15)).await?;
/// while let Some(event) = events.recv().await {
///     println!("{:?}", event);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PollScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    ctx: ReconcilerContext,
    config: PollerConfig,
    policy: RetryPolicy,
    pollers: Mutex<HashMap<String, PollerEntry>>,
    next_generation: AtomicU64,
    tracker: TaskTracker,
    event_tx: mpsc::Sender<PollerEvent>,
}

struct PollerEntry {
    generation: u64,
    token: CancellationToken,
    phase: PollerPhase,
}

enum PollerPhase {
    Starting {
        interval: Duration,
    },
    Polling {
        interval_tx: watch::Sender<Duration>,
        status_rx: watch::Receiver<PollerStatus>,
    },
}

impl PollScheduler {
    /// Create a scheduler
    ///
    /// # Returns
    ///
    /// A tuple of (scheduler, event_receiver) where event_receiver yields poller events
    pub fn new(
        ctx: ReconcilerContext,
        config: PollerConfig,
    ) -> Result<(Self, mpsc::Receiver<PollerEvent>)> {
        config.validate()?;

        let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
        let inner = Inner {
            ctx,
            policy: RetryPolicy::from(&config),
            config,
            pollers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            event_tx,
        };

        Ok((
            Self {
                inner: Arc::new(inner),
            },
            event_rx,
        ))
    }

    /// Start polling a campaign
    ///
    /// Bootstraps the campaign before returning. Starting a campaign that is
    /// already started (or starting) is a no-op.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for a zero interval
    /// - the bootstrap error; the campaign is then stopped
    pub async fn start(&self, campaign_id: &str, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::invalid_input("Polling interval must be non-zero"));
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        {
            let mut pollers = self.inner.pollers.lock().await;
            if pollers.contains_key(campaign_id) {
                debug!("Campaign {} already started", campaign_id);
                return Ok(());
            }
            pollers.insert(
                campaign_id.to_string(),
                PollerEntry {
                    generation,
                    token: token.clone(),
                    phase: PollerPhase::Starting { interval },
                },
            );
        }

        info!("Starting campaign {}", campaign_id);

        let ctx = ReconcilerContext {
            service: self.inner.ctx.service.clone(),
            store: Arc::new(GatedStateStore::new(
                self.inner.ctx.store.clone(),
                campaign_id,
                token.clone(),
            )),
            sink: Arc::new(GatedEventSink::new(self.inner.ctx.sink.clone(), token.clone())),
        };
        let settings = ReconcilerSettings::from_poller_config(&self.inner.config, interval);

        let reconciler = match CampaignReconciler::bootstrap(ctx, campaign_id, settings).await {
            Ok(reconciler) => reconciler,
            Err(_) if token.is_cancelled() => {
                debug!("Campaign {} was stopped while bootstrapping", campaign_id);
                return Ok(());
            }
            Err(e) => {
                error!("Failed to start campaign {}: {}", campaign_id, e);
                self.inner
                    .stop_entry(campaign_id, Some(generation), format!("Bootstrap failed: {}", e))
                    .await;
                return Err(e);
            }
        };

        let mut pollers = self.inner.pollers.lock().await;
        let Some(entry) = pollers
            .get_mut(campaign_id)
            .filter(|entry| entry.generation == generation)
        else {
            debug!("Campaign {} was stopped while starting", campaign_id);
            return Ok(());
        };

        let interval = match entry.phase {
            PollerPhase::Starting { interval } => interval,
            PollerPhase::Polling { .. } => return Ok(()),
        };

        let (interval_tx, interval_rx) = watch::channel(interval);
        let (status_tx, status_rx) = watch::channel(PollerStatus::default());
        entry.phase = PollerPhase::Polling {
            interval_tx,
            status_rx,
        };

        let task = PollerTask {
            inner: self.inner.clone(),
            campaign_id: campaign_id.to_string(),
            generation,
            token,
            reconciler,
            interval_rx,
            status_tx,
        };
        self.inner.tracker.spawn(task.run());
        drop(pollers);

        info!("Started campaign {} (interval {:?})", campaign_id, interval);
        self.inner.emit(PollerEvent::Started {
            campaign_id: campaign_id.to_string(),
        });

        Ok(())
    }

    /// Stop polling a campaign
    ///
    /// Idempotent; returns whether the campaign was started.
    pub async fn stop(&self, campaign_id: &str) -> bool {
        self.inner
            .stop_entry(campaign_id, None, "Stopped".to_string())
            .await
    }

    /// Stop every campaign
    pub async fn stop_all(&self) {
        let drained: Vec<(String, PollerEntry)> = {
            let mut pollers = self.inner.pollers.lock().await;
            pollers.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        for (campaign_id, entry) in drained {
            entry.token.cancel();
            info!("Stopped campaign {}", campaign_id);
            self.inner.emit(PollerEvent::Stopped {
                campaign_id,
                reason: "Stopped".to_string(),
            });
        }

        self.inner.on_disconnected();
    }

    /// Whether the campaign is bootstrapped and scheduled
    pub async fn is_started(&self, campaign_id: &str) -> bool {
        matches!(
            self.inner.pollers.lock().await.get(campaign_id),
            Some(PollerEntry {
                phase: PollerPhase::Polling { .. },
                ..
            })
        )
    }

    /// Change the polling interval of a campaign without losing its state
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput` for a zero interval
    /// - `Error::NotFound` when the campaign is not started
    pub async fn set_polling_interval(&self, campaign_id: &str, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            return Err(Error::invalid_input("Polling interval must be non-zero"));
        }

        let mut pollers = self.inner.pollers.lock().await;
        let entry = pollers
            .get_mut(campaign_id)
            .ok_or_else(|| Error::not_found(format!("Campaign {} is not started", campaign_id)))?;

        match &mut entry.phase {
            PollerPhase::Starting { interval: pending } => *pending = interval,
            PollerPhase::Polling { interval_tx, .. } => {
                interval_tx.send_replace(interval);
            }
        }

        debug!("Polling interval of campaign {} set to {:?}", campaign_id, interval);
        Ok(())
    }

    /// Retry status of a started campaign
    pub async fn status(&self, campaign_id: &str) -> Option<PollerStatus> {
        match &self.inner.pollers.lock().await.get(campaign_id)?.phase {
            PollerPhase::Polling { status_rx, .. } => Some(*status_rx.borrow()),
            PollerPhase::Starting { .. } => None,
        }
    }

    /// Ids of the started campaigns, sorted
    pub async fn active_campaigns(&self) -> Vec<String> {
        let pollers = self.inner.pollers.lock().await;
        let mut ids: Vec<String> = pollers
            .iter()
            .filter(|(_, entry)| matches!(entry.phase, PollerPhase::Polling { .. }))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Stop every campaign and wait for their tasks to finish
    pub async fn shutdown(&self) {
        self.stop_all().await;
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        debug!("All poller tasks finished");
    }
}

impl Inner {
    fn emit(&self, event: PollerEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Poller event channel full or closed, dropping event. Consider increasing event_channel_capacity.");
        }
    }

    /// Remove a campaign's entry and run the stop hook
    ///
    /// With `generation` set, only that incarnation of the poller is removed.
    async fn stop_entry(&self, campaign_id: &str, generation: Option<u64>, reason: String) -> bool {
        let remaining = {
            let mut pollers = self.pollers.lock().await;
            let matches = pollers
                .get(campaign_id)
                .is_some_and(|entry| generation.is_none_or(|g| g == entry.generation));
            if !matches {
                return false;
            }
            if let Some(entry) = pollers.remove(campaign_id) {
                entry.token.cancel();
            }
            pollers.len()
        };

        info!("Stopped campaign {}: {}", campaign_id, reason);
        self.emit(PollerEvent::Stopped {
            campaign_id: campaign_id.to_string(),
            reason,
        });

        if remaining == 0 {
            self.on_disconnected();
        }
        true
    }

    fn on_disconnected(&self) {
        info!("No campaigns left polling");
        self.emit(PollerEvent::Disconnected);
    }
}

/// The poll loop of one campaign
struct PollerTask {
    inner: Arc<Inner>,
    campaign_id: String,
    generation: u64,
    token: CancellationToken,
    reconciler: CampaignReconciler,
    interval_rx: watch::Receiver<Duration>,
    status_tx: watch::Sender<PollerStatus>,
}

impl PollerTask {
    async fn run(mut self) {
        let mut status = PollerStatus::default();
        let period = *self.interval_rx.borrow_and_update();
        self.reconciler.set_polling_interval(period);
        let mut ticker = new_ticker(period);

        loop {
            tokio::select! {
                biased;

                _ = self.token.cancelled() => break,

                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let period = *self.interval_rx.borrow_and_update();
                    self.reconciler.set_polling_interval(period);
                    ticker = new_ticker(period);
                }

                _ = ticker.tick() => {
                    if !self.tick(&mut status).await {
                        break;
                    }
                }
            }
        }

        debug!("Poll loop of campaign {} exited", self.campaign_id);
    }

    /// Run one tick; false once the poller must stop
    async fn tick(&mut self, status: &mut PollerStatus) -> bool {
        match status.begin_tick(Instant::now(), &self.inner.policy) {
            TickDecision::Skip => {
                debug!(
                    "Campaign {} in {} mode, waiting before attempt {}",
                    self.campaign_id,
                    status.retry_mode,
                    status.retry_attempt + 1
                );
                return true;
            }
            TickDecision::Shutdown => {
                self.publish(status);
                error!(
                    "Campaign {} exhausted {} retries, shutting down",
                    self.campaign_id, self.inner.policy.max_retries
                );
                self.shut_down("Retries exhausted".to_string()).await;
                return false;
            }
            TickDecision::Poll => {}
        }

        let result = self.reconciler.poll().await;
        if self.token.is_cancelled() {
            return false;
        }

        match result {
            Ok(()) => {
                if let Some(previous) = status.record_success() {
                    info!(
                        "Campaign {} recovered from {} mode",
                        self.campaign_id, previous
                    );
                    self.publish(status);
                }
            }
            Err(e) => {
                if status.record_failure(e.retry_class()).is_some() {
                    self.publish(status);
                }
                warn!(
                    "Poll of campaign {} failed (mode {}, attempt {}): {}",
                    self.campaign_id, status.retry_mode, status.retry_attempt, e
                );

                if status.retry_mode == RetryMode::Shutdown {
                    error!("Campaign {} shutting down: {}", self.campaign_id, e);
                    self.status_tx.send_replace(*status);
                    self.shut_down(e.to_string()).await;
                    return false;
                }
            }
        }

        self.status_tx.send_replace(*status);
        true
    }

    fn publish(&self, status: &PollerStatus) {
        self.inner.emit(PollerEvent::RetryModeChanged {
            campaign_id: self.campaign_id.clone(),
            mode: status.retry_mode,
            attempt: status.retry_attempt,
        });
    }

    async fn shut_down(&self, reason: String) {
        self.inner
            .stop_entry(&self.campaign_id, Some(self.generation), reason)
            .await;
    }
}

/// Timer whose first tick is one period from now
fn new_ticker(period: Duration) -> Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
