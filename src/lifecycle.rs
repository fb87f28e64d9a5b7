/*!
 * Compute lifecycle management.
 *
 * Reference-counted start/pause of the shared GPU pod. Every job takes a
 * [`ComputeLease`] through [`ComputeLifecycleManager::acquire`]; the first
 * lease taken while the pod is idle performs the warm-up, every other
 * caller waits on a shared readiness signal. The pod is paused when the
 * last lease is released.
 */

use log::{debug, info, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};

use crate::app_config::ComputeConfig;
use crate::errors::{ProviderError, ProvisionError};
use crate::providers::ComputeResource;
use crate::registry::ActiveJobRegistry;
use crate::retry::RetryPolicy;

/// Readiness of the shared pod as seen by acquiring jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// No job holds a lease
    Idle,
    /// A job is bringing the pod up
    WarmingUp,
    /// The pod is running and settled
    Ready,
    /// The last warm-up gave up
    Failed,
}

/// Timing of the warm-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// Start attempts and the backoff after a capacity error
    pub start_policy: RetryPolicy,
    /// Status polls per start attempt
    pub status_poll_policy: RetryPolicy,
    /// Wait after RUNNING before the worker is assumed to be serving
    pub settle_delay: Duration,
}

impl LifecycleSettings {
    pub fn from_config(config: &ComputeConfig) -> Self {
        Self {
            start_policy: config.start_policy,
            status_poll_policy: config.status_poll_policy,
            settle_delay: config.settle_delay(),
        }
    }
}

struct Inner {
    registry: Arc<ActiveJobRegistry>,
    resource: Arc<dyn ComputeResource>,
    settings: LifecycleSettings,
    readiness: watch::Sender<Readiness>,
    // Serializes start and pause requests against each other
    transition: Mutex<()>,
}

/// Start/pause arbiter for the shared pod
#[derive(Clone)]
pub struct ComputeLifecycleManager {
    inner: Arc<Inner>,
}

impl fmt::Debug for ComputeLifecycleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeLifecycleManager")
            .field("resource", &self.inner.resource)
            .field("readiness", &*self.inner.readiness.borrow())
            .finish()
    }
}

impl ComputeLifecycleManager {
    pub fn new(
        registry: Arc<ActiveJobRegistry>,
        resource: Arc<dyn ComputeResource>,
        settings: LifecycleSettings,
    ) -> Self {
        let (readiness, _) = watch::channel(Readiness::Idle);
        Self {
            inner: Arc::new(Inner {
                registry,
                resource,
                settings,
                readiness,
                transition: Mutex::new(()),
            }),
        }
    }

    /// Current readiness
    pub fn readiness(&self) -> Readiness {
        *self.inner.readiness.borrow()
    }

    /// Number of jobs holding a lease
    pub async fn active_jobs(&self) -> u64 {
        self.inner.registry.current().await
    }

    /// Register a job and make sure the pod is up for it.
    ///
    /// On failure the job has already been unregistered again.
    pub async fn acquire(&self) -> Result<ComputeLease, ProvisionError> {
        let readiness = &self.inner.readiness;
        let (count, warmer) = self
            .inner
            .registry
            .increment_and(|_| {
                readiness.send_if_modified(|state| match state {
                    Readiness::Idle | Readiness::Failed => {
                        *state = Readiness::WarmingUp;
                        true
                    }
                    Readiness::WarmingUp | Readiness::Ready => false,
                })
            })
            .await;
        debug!("Lease taken, {} active job(s), warmer: {}", count, warmer);

        let lease = ComputeLease {
            manager: Some(self.clone()),
        };
        let result = if warmer {
            self.warm_up().await
        } else {
            self.wait_until_ready().await
        };

        match result {
            Ok(()) => Ok(lease),
            Err(e) => {
                lease.release().await;
                Err(e)
            }
        }
    }

    async fn release(&self) {
        let readiness = &self.inner.readiness;
        let (count, _) = self
            .inner
            .registry
            .decrement_and(|count| {
                if count == 0 {
                    readiness.send_replace(Readiness::Idle);
                }
            })
            .await;
        debug!("Lease released, {} active job(s)", count);
        if count > 0 {
            return;
        }

        let _transition = self.inner.transition.lock().await;
        // A job may have arrived while we waited for the lock
        if self.inner.registry.current().await > 0 {
            debug!("New job arrived before pause, keeping pod up");
            return;
        }
        info!("All jobs finished. Pausing pod.");
        if let Err(e) = self.inner.resource.request_pause().await {
            warn!("Failed to pause pod: {}", e);
        }
    }

    async fn warm_up(&self) -> Result<(), ProvisionError> {
        let guard = WarmupGuard {
            readiness: &self.inner.readiness,
            armed: true,
        };

        let started = {
            let _transition = self.inner.transition.lock().await;
            self.ensure_running().await
        };

        match started {
            Ok(()) => {
                let settle = self.inner.settings.settle_delay;
                if !settle.is_zero() {
                    info!("Pod is running, waiting {:?} for the worker to come up", settle);
                    tokio::time::sleep(settle).await;
                }
                guard.finish(Readiness::Ready);
                Ok(())
            }
            Err(e) => {
                warn!("{}", e);
                guard.finish(Readiness::Failed);
                Err(e)
            }
        }
    }

    async fn wait_until_ready(&self) -> Result<(), ProvisionError> {
        let mut rx = self.inner.readiness.subscribe();
        let state = rx
            .wait_for(|s| matches!(s, Readiness::Ready | Readiness::Failed))
            .await
            .map(|s| *s)
            .unwrap_or(Readiness::Failed);

        match state {
            Readiness::Ready => Ok(()),
            _ => Err(ProvisionError::WarmupFailed),
        }
    }

    async fn ensure_running(&self) -> Result<(), ProvisionError> {
        let resource = &self.inner.resource;
        let start_policy = self.inner.settings.start_policy;

        let mut last_status = match resource.status().await {
            Ok(status) if status.is_running() => {
                info!("Pod is already running");
                return Ok(());
            }
            Ok(status) => status.to_string(),
            Err(e) => {
                warn!("Pod status query failed: {}", e);
                "UNKNOWN".to_string()
            }
        };
        info!("Pod not running (status={}), resuming...", last_status);

        for attempt in start_policy.attempts() {
            match resource.request_start().await {
                Ok(()) => {}
                Err(ProviderError::CapacityExhausted(_)) => {
                    warn!(
                        "Pod start error: not enough free GPUs (attempt {}/{})",
                        attempt, start_policy.max_attempts
                    );
                    last_status = "NO_CAPACITY".to_string();
                    if start_policy.has_next(attempt) {
                        start_policy.wait().await;
                    }
                    continue;
                }
                Err(e) => {
                    warn!("Pod start request failed, polling status anyway: {}", e);
                }
            }

            match self.poll_until_running().await {
                Ok(()) => {
                    info!("Pod is running (start attempt {})", attempt);
                    return Ok(());
                }
                Err(status) => last_status = status,
            }
        }

        Err(ProvisionError::NotRunning {
            attempts: start_policy.max_attempts,
            last_status,
        })
    }

    /// Poll until RUNNING; on exhaustion return the last status seen
    async fn poll_until_running(&self) -> Result<(), String> {
        let poll_policy = self.inner.settings.status_poll_policy;
        let mut last_status = "UNKNOWN".to_string();
        for _ in poll_policy.attempts() {
            poll_policy.wait().await;
            match self.inner.resource.status().await {
                Ok(status) if status.is_running() => return Ok(()),
                Ok(status) => last_status = status.to_string(),
                Err(e) => debug!("Pod status query failed: {}", e),
            }
        }
        Err(last_status)
    }
}

// Marks the warm-up failed if the warming task is dropped midway, so
// waiters are not left hanging
struct WarmupGuard<'a> {
    readiness: &'a watch::Sender<Readiness>,
    armed: bool,
}

impl WarmupGuard<'_> {
    fn finish(mut self, state: Readiness) {
        self.armed = false;
        self.readiness.send_replace(state);
    }
}

impl Drop for WarmupGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.readiness.send_replace(Readiness::Failed);
        }
    }
}

/// A job's claim on the pod.
///
/// Release it with [`ComputeLease::release`]. A lease dropped without
/// being released is released on a background task.
#[must_use = "a lease must be released when the job ends"]
pub struct ComputeLease {
    manager: Option<ComputeLifecycleManager>,
}

impl fmt::Debug for ComputeLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeLease")
            .field("held", &self.manager.is_some())
            .finish()
    }
}

impl ComputeLease {
    /// Give the claim back, pausing the pod if this was the last one
    pub async fn release(mut self) {
        if let Some(manager) = self.manager.take() {
            manager.release().await;
        }
    }
}

impl Drop for ComputeLease {
    fn drop(&mut self) {
        if let Some(manager) = self.manager.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { manager.release().await });
                }
                Err(_) => warn!("Lease dropped outside a runtime, active job count is now stale"),
            }
        }
    }
}
