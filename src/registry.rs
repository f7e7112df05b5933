//! The feature flag registry: a locally cached flag snapshot kept up-to-date by a background
//! refresh timer, and flag evaluation against it.
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use chrono::Utc;
use rand::{thread_rng, Rng};
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{
    bucketer::Sha1Bucketer,
    flag_called_callback::{FeatureFlagCalled, FeatureFlagCalledCallback},
    flag_source::FlagSource,
    flag_store::FlagStore,
    flags::FlagSnapshot,
    Error, Result,
};

/// Configuration for [`FlagRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between refreshes of flag definitions.
    ///
    /// Defaults to [`RegistryConfig::DEFAULT_POLL_INTERVAL`].
    pub interval: Duration,
    /// Randomized duration subtracted from `interval` for each refresh. This helps to avoid many
    /// server instances refreshing in lockstep. Capped at half of `interval`.
    ///
    /// Defaults to [`RegistryConfig::DEFAULT_POLL_JITTER`] (no jitter).
    pub jitter: Duration,
}

impl RegistryConfig {
    /// Default value for [`RegistryConfig::interval`].
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
    /// Default value for [`RegistryConfig::jitter`].
    pub const DEFAULT_POLL_JITTER: Duration = Duration::ZERO;

    pub fn new() -> RegistryConfig {
        RegistryConfig::default()
    }

    pub fn with_interval(mut self, interval: Duration) -> RegistryConfig {
        self.interval = interval;
        self
    }

    pub fn with_jitter(mut self, jitter: Duration) -> RegistryConfig {
        self.jitter = jitter;
        self
    }
}

impl Default for RegistryConfig {
    fn default() -> RegistryConfig {
        RegistryConfig {
            interval: RegistryConfig::DEFAULT_POLL_INTERVAL,
            jitter: RegistryConfig::DEFAULT_POLL_JITTER,
        }
    }
}

/// Keeps a local snapshot of feature flag definitions and evaluates flags against it.
///
/// The registry refreshes its snapshot in the background every [`RegistryConfig::interval`].
/// Simple flags (rollout percentage only) are evaluated locally; other flags are resolved with a
/// remote decision request.
///
/// Dropping the registry shuts it down.
pub struct FlagRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    source: Arc<dyn FlagSource>,
    store: FlagStore,
    config: RegistryConfig,
    callback: Box<dyn FeatureFlagCalledCallback + Send + Sync>,
    runtime: Handle,

    /// Serializes refreshes. Holds the result of the last completed refresh, handed out to callers
    /// that queued behind it.
    refresh_lock: tokio::sync::Mutex<Option<Result<()>>>,
    /// Number of completed refreshes.
    completed_refreshes: AtomicU64,

    /// Set when the definitions request was rejected with 401. Background refreshes stop and
    /// evaluations no longer try to load flags until a forced refresh succeeds.
    unauthorized: AtomicBool,

    timer: Mutex<TimerSlot>,
}

#[derive(Default)]
struct TimerSlot {
    next_id: u64,
    armed: Option<(u64, JoinHandle<()>)>,
    stopped: bool,
}

impl FlagRegistry {
    /// Start a registry and kick off the first load in the background.
    ///
    /// Use [`FlagRegistry::wait_for_flags`] to wait for the first load.
    ///
    /// # Errors
    ///
    /// - [`Error::NoRuntime`] if called outside of a Tokio runtime.
    pub fn start(
        source: Arc<dyn FlagSource>,
        config: RegistryConfig,
        callback: impl FeatureFlagCalledCallback + Send + Sync + 'static,
    ) -> Result<FlagRegistry> {
        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;

        let inner = Arc::new(RegistryInner {
            source,
            store: FlagStore::new(),
            config,
            callback: Box::new(callback),
            runtime,
            refresh_lock: tokio::sync::Mutex::new(None),
            completed_refreshes: AtomicU64::new(0),
            unauthorized: AtomicBool::new(false),
            timer: Mutex::new(TimerSlot::default()),
        });

        let weak = Arc::downgrade(&inner);
        inner.runtime.spawn(async move {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            if let Err(err) = inner.ensure_loaded().await {
                inner.report_background_error(&err);
            }
        });

        log::debug!(target: "posthog", "feature flag registry started with interval {:?}", inner.config.interval);

        Ok(FlagRegistry { inner })
    }

    /// Check whether the flag `key` is enabled for `distinct_id`.
    ///
    /// Returns `default_result` if flags could not be loaded or the flag does not exist. The
    /// registered [`FeatureFlagCalledCallback`] is notified of every other result.
    ///
    /// # Errors
    ///
    /// - [`Error::Unauthorized`] if loading flags for this call was rejected. This indicates a
    ///   misconfigured personal API key.
    /// - [`Error::Network`] or [`Error::UnexpectedStatus`] if the remote decision for a non-simple
    ///   flag failed.
    pub async fn is_enabled(
        &self,
        key: &str,
        distinct_id: &str,
        default_result: bool,
    ) -> Result<bool> {
        match self.inner.ensure_loaded().await {
            Ok(()) => {}
            Err(Error::Unauthorized) => return Err(Error::Unauthorized),
            Err(err) => {
                log::warn!(target: "posthog", flag_key = key, distinct_id; "failed to load feature flags: {:?}", err);
            }
        }

        let Some(snapshot) = self.inner.store.get_snapshot() else {
            log::warn!(target: "posthog", flag_key = key, distinct_id; "evaluating a flag before feature flags have been loaded");
            return Ok(default_result);
        };

        let Some(flag) = snapshot.get(key) else {
            log::trace!(target: "posthog", flag_key = key, distinct_id; "flag not found, returning default");
            return Ok(default_result);
        };

        let enabled = if flag.is_simple_flag {
            flag.is_simple_enabled_for(distinct_id, &Sha1Bucketer)
        } else {
            let enabled_flags = self.inner.source.decide(distinct_id).await?;
            enabled_flags.iter().any(|enabled| enabled == key)
        };

        log::trace!(target: "posthog", flag_key = key, distinct_id, enabled; "evaluated a flag");

        self.inner.notify_flag_called(key, distinct_id, enabled);

        Ok(enabled)
    }

    /// Wait for flags to be loaded, loading them now if needed.
    ///
    /// # Errors
    ///
    /// Returns the error of the load attempt, [`Error::Unauthorized`] if the personal API key
    /// has already been rejected, or [`Error::ShutDown`] if the registry was shut down before
    /// loading any flags.
    pub async fn wait_for_flags(&self) -> Result<()> {
        if self.inner.store.get_snapshot().is_none() {
            if self.inner.unauthorized.load(Ordering::Acquire) {
                return Err(Error::Unauthorized);
            }
            if self.inner.is_stopped() {
                return Err(Error::ShutDown);
            }
        }
        self.inner.ensure_loaded().await
    }

    /// Refresh flag definitions now, regardless of whether they've been loaded already.
    ///
    /// If a refresh is already in flight, waits for it and returns its result instead of issuing
    /// another request. Re-arms the background refresh timer.
    pub async fn force_refresh(&self) -> Result<()> {
        self.inner.refresh().await
    }

    /// The current flag snapshot, or `None` if flags have never been loaded.
    pub fn snapshot(&self) -> Option<Arc<FlagSnapshot>> {
        self.inner.store.get_snapshot()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.store.get_snapshot().is_some()
    }

    /// Stop background refreshes.
    ///
    /// A refresh that is already in flight may still complete and update the snapshot, but no
    /// refresh is scheduled afterwards. Calling it more than once is fine.
    pub fn shutdown(&self) {
        let mut timer = self.inner.lock_timer();
        if !timer.stopped {
            log::debug!(target: "posthog", "shutting down feature flag registry");
        }
        timer.stopped = true;
        if let Some((_, handle)) = timer.armed.take() {
            handle.abort();
        }
    }
}

impl Drop for FlagRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl RegistryInner {
    async fn ensure_loaded(self: &Arc<Self>) -> Result<()> {
        if self.store.get_snapshot().is_some()
            || self.unauthorized.load(Ordering::Acquire)
            || self.is_stopped()
        {
            return Ok(());
        }
        self.refresh().await
    }

    /// Run one refresh, or join the one in flight.
    async fn refresh(self: &Arc<Self>) -> Result<()> {
        let observed = self.completed_refreshes.load(Ordering::Acquire);
        let mut last_result = self.refresh_lock.lock().await;

        if self.completed_refreshes.load(Ordering::Acquire) != observed {
            // Another refresh completed while we were waiting for the lock.
            if let Some(result) = &*last_result {
                return result.clone();
            }
        }

        if self.is_stopped() {
            return Err(Error::ShutDown);
        }

        let result = self.refresh_now().await;
        *last_result = Some(result.clone());
        self.completed_refreshes.fetch_add(1, Ordering::Release);
        result
    }

    async fn refresh_now(self: &Arc<Self>) -> Result<()> {
        // The next refresh is armed before the request so that a slow request does not delay
        // the polling cadence.
        self.schedule_refresh();

        match self.source.fetch_flag_definitions().await {
            Ok(definitions) => {
                let snapshot = FlagSnapshot::from_definitions(definitions);
                log::debug!(target: "posthog", count = snapshot.len(); "loaded feature flag definitions");
                self.store.set_snapshot(Arc::new(snapshot));
                self.unauthorized.store(false, Ordering::Release);
                Ok(())
            }
            Err(Error::Unauthorized) => {
                log::error!(target: "posthog", "{}; feature flags will not be refreshed", Error::Unauthorized);
                self.unauthorized.store(true, Ordering::Release);
                self.cancel_timer();
                Err(Error::Unauthorized)
            }
            Err(err) => {
                log::warn!(target: "posthog", "error while fetching feature flag definitions: {:?}", err);
                Err(err)
            }
        }
    }

    /// Cancel the pending refresh timer, if any, and arm a new one.
    fn schedule_refresh(self: &Arc<Self>) {
        let mut timer = self.lock_timer();
        if let Some((_, handle)) = timer.armed.take() {
            handle.abort();
        }
        self.arm(&mut timer);
    }

    /// Arm a timer unless one is already pending.
    ///
    /// A timer that joined a refresh started elsewhere has released its slot without the refresh
    /// arming a successor, so the cadence would end there.
    fn ensure_armed(self: &Arc<Self>) {
        let mut timer = self.lock_timer();
        if timer.armed.is_some() || self.unauthorized.load(Ordering::Acquire) {
            return;
        }
        self.arm(&mut timer);
    }

    fn arm(self: &Arc<Self>, timer: &mut TimerSlot) {
        if timer.stopped {
            return;
        }

        let id = timer.next_id;
        timer.next_id += 1;

        let delay = jitter(self.config.interval, self.config.jitter);
        let weak: Weak<RegistryInner> = Arc::downgrade(self);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            // Detach from the slot so the refresh below doesn't abort its own task.
            if !inner.disarm(id) {
                return;
            }
            log::debug!(target: "posthog", "refreshing feature flag definitions");
            if let Err(err) = inner.refresh().await {
                inner.report_background_error(&err);
            }
            inner.ensure_armed();
        });

        timer.armed = Some((id, handle));
    }

    /// Release the timer slot held by timer `id`. Returns `false` if the timer has been replaced
    /// or cancelled in the meantime.
    fn disarm(&self, id: u64) -> bool {
        let mut timer = self.lock_timer();
        match &timer.armed {
            Some((armed_id, _)) if *armed_id == id => {
                // Dropping the handle detaches the task without aborting it.
                timer.armed = None;
                true
            }
            _ => false,
        }
    }

    fn cancel_timer(&self) {
        if let Some((_, handle)) = self.lock_timer().armed.take() {
            handle.abort();
        }
    }

    fn is_stopped(&self) -> bool {
        self.lock_timer().stopped
    }

    fn lock_timer(&self) -> std::sync::MutexGuard<'_, TimerSlot> {
        self.timer
            .lock()
            .expect("thread holding refresh timer lock should not panic")
    }

    fn report_background_error(&self, err: &Error) {
        match err {
            // Already logged when the refresh failed.
            Error::Unauthorized | Error::UnexpectedStatus(_) | Error::Network(_) => {}
            Error::ShutDown => {
                log::debug!(target: "posthog", "skipping refresh of a shut down registry");
            }
            err => {
                log::warn!(target: "posthog", "background feature flag refresh failed: {:?}", err);
            }
        }
    }

    fn notify_flag_called(&self, key: &str, distinct_id: &str, enabled: bool) {
        let event = FeatureFlagCalled {
            key: key.to_owned(),
            distinct_id: distinct_id.to_owned(),
            enabled,
            timestamp: Utc::now(),
        };

        let result = catch_unwind(AssertUnwindSafe(|| {
            self.callback.on_feature_flag_called(event);
        }));
        if result.is_err() {
            log::error!(target: "posthog", flag_key = key, distinct_id; "feature flag called callback panicked");
        }
    }
}

/// Apply randomized `jitter` to `interval`. Jitter is capped at half of `interval` so the delay
/// never collapses to zero.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    let jitter = jitter.min(interval / 2);
    if jitter.is_zero() {
        return interval;
    }
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}
