//! Liveness runtime: the shared registry and the repeating tick task.
//!
//! The registry and scheduler live together in one [`Liveness`] value behind
//! a single `tokio::sync::Mutex`. Connection handlers lock it to connect,
//! disconnect, record pongs and joins; the timer task locks it once per tick
//! to drain a bucket. A tick never awaits while holding the lock.

use std::sync::Arc;

use cumulus_core::{
    ConfigError, ConnectionProxy, ConnectionRegistry, LifecycleError, LivenessConfig,
    LivenessScheduler, TickReport,
};
use tokio::{
    sync::{Mutex, oneshot},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};

/// Registry plus scheduler, always locked together.
///
/// The scheduler is only started and stopped through [`LivenessTimer`], so
/// its state always matches whether a tick task is armed.
#[derive(Debug)]
pub struct Liveness<P> {
    /// Tracked connections
    pub registry: ConnectionRegistry<P, Instant>,
    scheduler: LivenessScheduler,
    /// Bumped on every start; a tick task only acts for its own epoch
    epoch: u64,
}

impl<P> Liveness<P> {
    /// Scheduler configuration and state.
    pub fn scheduler(&self) -> &LivenessScheduler {
        &self.scheduler
    }

    /// Stop the scheduler if `epoch` is still the armed one.
    fn disarm(&mut self, epoch: u64) {
        if self.epoch == epoch && self.scheduler.stop().is_ok() {
            tracing::debug!(epoch, "liveness timer released without stop");
        }
    }
}

/// Liveness state shared between connection handlers and the timer.
pub type SharedLiveness<P> = Arc<Mutex<Liveness<P>>>;

impl<P: ConnectionProxy> Liveness<P> {
    /// Empty registry with a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Any error from [`LivenessConfig::validate`].
    pub fn new(config: LivenessConfig) -> Result<Self, ConfigError> {
        let (scheduler, registry) = LivenessScheduler::with_registry(config)?;
        Ok(Self { registry, scheduler, epoch: 0 })
    }

    /// Wrap for sharing.
    pub fn shared(self) -> SharedLiveness<P> {
        Arc::new(Mutex::new(self))
    }

    /// Drain the next bucket.
    pub fn tick(&mut self, now: Instant) -> TickReport {
        self.scheduler.tick(&mut self.registry, now)
    }
}

/// Owner of the repeating tick task.
///
/// `start` arms a `tokio::time::interval` with period `timeout /
/// bucket_count`; `stop` signals the task and waits for it to exit, so no tick
/// runs after `stop` returns. Dropping a started timer stops the scheduler
/// too, so another timer over the same state can start it again.
pub struct LivenessTimer<P> {
    liveness: SharedLiveness<P>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    epoch: u64,
}

impl<P> LivenessTimer<P>
where
    P: ConnectionProxy + Send + 'static,
{
    /// Timer over shared liveness state. Does not start ticking.
    pub fn new(liveness: SharedLiveness<P>) -> Self {
        Self { liveness, shutdown: None, task: None, epoch: 0 }
    }

    /// Shared state the timer ticks.
    pub fn liveness(&self) -> &SharedLiveness<P> {
        &self.liveness
    }

    /// Arm the timer. The first tick fires one period from now.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::AlreadyRunning` if already started
    pub async fn start(&mut self) -> Result<(), LifecycleError> {
        let (period, epoch) = {
            let mut liveness = self.liveness.lock().await;
            liveness.scheduler.start()?;
            liveness.epoch += 1;
            (liveness.scheduler.tick_period(), liveness.epoch)
        };

        let (tx, rx) = oneshot::channel();
        self.task = Some(tokio::spawn(run_ticks(Arc::clone(&self.liveness), period, epoch, rx)));
        self.shutdown = Some(tx);
        self.epoch = epoch;

        tracing::debug!(?period, "liveness timer started");
        Ok(())
    }

    /// Disarm the timer and wait for the task to exit.
    ///
    /// Probes already sent stay in flight.
    ///
    /// # Errors
    ///
    /// - `LifecycleError::NotRunning` if not started
    pub async fn stop(&mut self) -> Result<(), LifecycleError> {
        self.liveness.lock().await.scheduler.stop()?;

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "liveness task failed");
            }
        }

        tracing::debug!("liveness timer stopped");
        Ok(())
    }
}

impl<P> Drop for LivenessTimer<P> {
    fn drop(&mut self) {
        if self.task.take().is_none() {
            return;
        }

        // Dropping the sender ends the task, which disarms under the lock if
        // it cannot be taken here.
        if let Ok(mut liveness) = self.liveness.try_lock() {
            liveness.disarm(self.epoch);
        }
        drop(self.shutdown.take());
    }
}

async fn run_ticks<P: ConnectionProxy>(
    liveness: SharedLiveness<P>,
    period: std::time::Duration,
    epoch: u64,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            signal = &mut shutdown => {
                // Sender dropped without `stop`
                if signal.is_err() {
                    liveness.lock().await.disarm(epoch);
                }
                break;
            },
            _ = interval.tick() => {
                let mut liveness = liveness.lock().await;
                if liveness.epoch != epoch || !liveness.scheduler.is_running() {
                    break;
                }
                liveness.tick(Instant::now());
            },
        }
    }
}
