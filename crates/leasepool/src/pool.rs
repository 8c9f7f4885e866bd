//! Resource pool: capacity accounting, lease lifecycle and waitlist promotion.
//!
//! All mutations of {active leases, wait queue, armed timers} happen under a
//! single `std::sync::Mutex`. A release and the promotion it triggers are one
//! critical section, so a freed slot is never observable by a fresh acquire
//! before the dequeued waiter has been granted it. Notifications are published
//! after the lock is dropped.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::Utc;
use serde::Serialize;
use tokio::runtime::Handle;

use crate::config::{ConfigError, PoolConfig};
use crate::expiry::{ExpirationScheduler, ExpiryTarget};
use crate::holder::HolderId;
use crate::lease::{Lease, LeaseId};
use crate::notify::{NotificationChannel, RevocationEvent, RevocationReason, Subscription};
use crate::wait_queue::{QueueDiscipline, WaitQueue};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    #[error("invalid holder id: {reason}")]
    InvalidHolder { reason: String },
    #[error("a tokio runtime is required (lease expiry or callback subscribers)")]
    NoRuntime,
    #[error("invalid pool configuration: {0}")]
    Config(#[from] ConfigError),
}

impl PoolError {
    pub(crate) fn invalid_holder(reason: impl Into<String>) -> Self {
        Self::InvalidHolder {
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireResult {
    /// The holder holds this lease. Repeated acquires return the same lease.
    Granted(Lease),
    /// No slot was free; `position` is the 1-based promotion position.
    Queued { position: usize },
}

impl AcquireResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    pub fn lease(&self) -> Option<&Lease> {
        match self {
            Self::Granted(lease) => Some(lease),
            Self::Queued { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseResult {
    Released {
        /// The released lease, now Inactive.
        lease: Lease,
        /// Lease granted to the waiter promoted into the freed slot.
        promoted: Option<Lease>,
    },
    /// The holder had no active lease.
    NoOp,
}

impl ReleaseResult {
    pub fn is_released(&self) -> bool {
        matches!(self, Self::Released { .. })
    }

    pub fn promoted(&self) -> Option<&Lease> {
        match self {
            Self::Released { promoted, .. } => promoted.as_ref(),
            Self::NoOp => None,
        }
    }
}

/// Point-in-time view of the pool for introspection and logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolSnapshot {
    pub capacity: usize,
    pub available: usize,
    /// Active leases ordered by grant.
    pub active: Vec<Lease>,
    /// Waiting holders in promotion order.
    pub waiting: Vec<HolderId>,
}

struct PoolState {
    capacity: usize,
    next_lease: u64,
    active: HashMap<HolderId, Lease>,
    queue: WaitQueue,
    expiry: ExpirationScheduler,
}

impl PoolState {
    fn acquire(&mut self, holder: HolderId, timers: &TimerContext<'_>) -> AcquireResult {
        if let Some(lease) = self.active.get(&holder) {
            tracing::debug!(holder = %holder, lease = %lease.id(), "Holder already has an active lease");
            return AcquireResult::Granted(lease.clone());
        }

        if let Some(position) = self.queue.position(&holder) {
            tracing::debug!(holder = %holder, position, "Holder already waiting");
            return AcquireResult::Queued { position };
        }

        if self.active.len() >= self.capacity {
            self.queue.enqueue(holder.clone());
            let position = self.queue.position(&holder).unwrap_or(self.queue.len());
            tracing::debug!(holder = %holder, position, "No slot available - holder queued");
            return AcquireResult::Queued { position };
        }

        AcquireResult::Granted(self.grant(holder, timers))
    }

    fn grant(&mut self, holder: HolderId, timers: &TimerContext<'_>) -> Lease {
        assert!(
            self.active.len() < self.capacity,
            "capacity exceeded: {} active leases with capacity {}",
            self.active.len(),
            self.capacity
        );
        debug_assert!(!self.queue.contains(&holder), "holder both waiting and active");

        self.next_lease += 1;
        let id = LeaseId::new(self.next_lease);
        let granted_at = Utc::now();
        let duration = self.expiry.next_duration();
        let expires_at = duration
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .and_then(|d| granted_at.checked_add_signed(d));

        if let (Some(duration), Some(runtime)) = (duration, timers.runtime) {
            self.expiry
                .arm(runtime, timers.target.clone(), holder.clone(), id, duration);
        }

        let lease = Lease::grant(id, holder.clone(), granted_at, expires_at);
        tracing::debug!(
            holder = %holder,
            lease = %id,
            active = self.active.len() + 1,
            capacity = self.capacity,
            "Lease granted"
        );
        self.active.insert(holder, lease.clone());
        lease
    }

    fn release(
        &mut self,
        holder: &HolderId,
        only: Option<LeaseId>,
        timers: &TimerContext<'_>,
    ) -> Option<(Lease, Option<Lease>)> {
        match (self.active.get(holder), only) {
            (None, _) => return None,
            (Some(lease), Some(expected)) if lease.id() != expected => return None,
            _ => {}
        }
        let mut lease = self.active.remove(holder)?;
        lease.deactivate();
        self.expiry.cancel(holder, lease.id());

        let promoted = self.queue.dequeue_next().map(|entry| {
            let waited = Utc::now() - entry.enqueued_at;
            let promoted = self.grant(entry.holder, timers);
            tracing::info!(
                holder = %promoted.holder(),
                lease = %promoted.id(),
                waited_ms = waited.num_milliseconds(),
                "Waiter promoted"
            );
            promoted
        });

        Some((lease, promoted))
    }
}

struct TimerContext<'a> {
    runtime: Option<&'a Handle>,
    target: Weak<dyn ExpiryTarget>,
}

struct PoolInner {
    state: Mutex<PoolState>,
    notifications: NotificationChannel,
    discipline: QueueDiscipline,
    runtime: Option<Handle>,
    self_ref: Weak<PoolInner>,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Pool state mutex poisoned - continuing with inner state");
                poisoned.into_inner()
            }
        }
    }

    fn timers(&self) -> TimerContext<'_> {
        let target: Weak<dyn ExpiryTarget> = self.self_ref.clone();
        TimerContext {
            runtime: self.runtime.as_ref(),
            target,
        }
    }

    fn acquire(&self, holder: HolderId) -> AcquireResult {
        let timers = self.timers();
        self.lock_state().acquire(holder, &timers)
    }

    fn revoke(
        &self,
        holder: &HolderId,
        only: Option<LeaseId>,
        reason: RevocationReason,
    ) -> ReleaseResult {
        let timers = self.timers();
        let released = self.lock_state().release(holder, only, &timers);

        let Some((lease, promoted)) = released else {
            tracing::debug!(holder = %holder, ?reason, "No active lease to release");
            return ReleaseResult::NoOp;
        };

        match reason {
            RevocationReason::Expired => {
                tracing::info!(holder = %holder, lease = %lease.id(), "Lease expired")
            }
            RevocationReason::Released => {
                tracing::debug!(holder = %holder, lease = %lease.id(), "Lease released")
            }
        }

        self.notifications.publish(RevocationEvent {
            holder: holder.clone(),
            lease: lease.id(),
            reason,
            at: Utc::now(),
        });

        ReleaseResult::Released { lease, promoted }
    }
}

impl ExpiryTarget for PoolInner {
    fn expire(&self, holder: &HolderId, lease: LeaseId) {
        // A timer whose lease was already released finds a different or no lease.
        self.revoke(holder, Some(lease), RevocationReason::Expired);
    }
}

/// Bounded lease pool. Clones share the same pool.
#[derive(Clone)]
pub struct ResourcePool {
    inner: Arc<PoolInner>,
}

impl ResourcePool {
    /// Create a pool. A pool with lease expiry captures the current tokio
    /// runtime for its timers and fails with [`PoolError::NoRuntime`] outside one.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let runtime = if config.lease_duration.is_some() {
            Some(Handle::try_current().map_err(|_| PoolError::NoRuntime)?)
        } else {
            None
        };
        Self::build(config, runtime)
    }

    /// Create a pool whose expiry timers run on `runtime`.
    pub fn with_runtime(config: PoolConfig, runtime: Handle) -> Result<Self, PoolError> {
        Self::build(config, Some(runtime))
    }

    fn build(config: PoolConfig, runtime: Option<Handle>) -> Result<Self, PoolError> {
        config.validate()?;

        let state = PoolState {
            capacity: config.capacity,
            next_lease: 0,
            active: HashMap::with_capacity(config.capacity),
            queue: WaitQueue::new(config.queue_discipline),
            expiry: ExpirationScheduler::new(config.lease_duration),
        };

        tracing::debug!(
            capacity = config.capacity,
            discipline = config.queue_discipline.as_str(),
            expiry = config.lease_duration.is_some(),
            "Lease pool created"
        );

        let inner = Arc::new_cyclic(|self_ref| PoolInner {
            state: Mutex::new(state),
            notifications: NotificationChannel::new(),
            discipline: config.queue_discipline,
            runtime,
            self_ref: self_ref.clone(),
        });
        Ok(Self { inner })
    }

    /// Grant a lease, or queue the holder if the pool is at capacity.
    /// Never blocks waiting for a slot.
    pub fn acquire(&self, holder: &str) -> Result<AcquireResult, PoolError> {
        let holder = parse_holder(holder)?;
        Ok(self.inner.acquire(holder))
    }

    /// Release the holder's active lease and promote the next waiter.
    /// Unknown or already released holders yield [`ReleaseResult::NoOp`].
    pub fn release(&self, holder: &str) -> Result<ReleaseResult, PoolError> {
        let holder = parse_holder(holder)?;
        Ok(self
            .inner
            .revoke(&holder, None, RevocationReason::Released))
    }

    /// Remove a queued holder from the waitlist. Active leases are untouched.
    pub fn withdraw(&self, holder: &str) -> Result<bool, PoolError> {
        let holder = parse_holder(holder)?;
        let removed = self.inner.lock_state().queue.remove(&holder);
        if removed {
            tracing::debug!(holder = %holder, "Holder withdrawn from waitlist");
        }
        Ok(removed)
    }

    /// The holder's active lease, if any.
    pub fn lease(&self, holder: &str) -> Option<Lease> {
        let holder = HolderId::parse(holder).ok()?;
        self.inner.lock_state().active.get(&holder).cloned()
    }

    pub fn is_waiting(&self, holder: &str) -> bool {
        HolderId::parse(holder)
            .map(|h| self.inner.lock_state().queue.contains(&h))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.inner.lock_state();
        let mut active: Vec<Lease> = state.active.values().cloned().collect();
        active.sort_by_key(|l| l.id());
        PoolSnapshot {
            capacity: state.capacity,
            available: state.capacity - state.active.len(),
            active,
            waiting: state.queue.holders(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock_state().capacity
    }

    pub fn active_count(&self) -> usize {
        self.inner.lock_state().active.len()
    }

    pub fn available(&self) -> usize {
        let state = self.inner.lock_state();
        state.capacity - state.active.len()
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock_state().queue.len()
    }

    pub fn queue_discipline(&self) -> QueueDiscipline {
        self.inner.discipline
    }

    pub fn notifications(&self) -> &NotificationChannel {
        &self.inner.notifications
    }

    /// Shorthand for `notifications().subscribe(handler)`.
    pub fn subscribe<F>(&self, handler: F) -> Result<Subscription, PoolError>
    where
        F: Fn(RevocationEvent) + Send + Sync + 'static,
    {
        self.inner.notifications.subscribe(handler)
    }
}

impl fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();
        f.debug_struct("ResourcePool")
            .field("capacity", &state.capacity)
            .field("active", &state.active.len())
            .field("waiting", &state.queue.len())
            .field("discipline", &self.inner.discipline)
            .finish()
    }
}

fn parse_holder(holder: &str) -> Result<HolderId, PoolError> {
    HolderId::parse(holder).inspect_err(|e| {
        tracing::warn!(holder = ?holder, error = %e, "Rejected holder id");
    })
}
