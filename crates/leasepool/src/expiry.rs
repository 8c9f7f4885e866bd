//! Lease expiration timers.
//!
//! One one-shot timer per active lease. A timer is bound to the lease id it
//! was armed for; the target re-checks that id under its own lock before
//! acting, so a timer racing a manual release is a no-op.

use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::LeaseDurationRange;
use crate::holder::HolderId;
use crate::lease::LeaseId;

/// Receiver of fired timers.
pub trait ExpiryTarget: Send + Sync + 'static {
    fn expire(&self, holder: &HolderId, lease: LeaseId);
}

struct ArmedTimer {
    lease: LeaseId,
    handle: JoinHandle<()>,
}

pub struct ExpirationScheduler {
    range: Option<LeaseDurationRange>,
    timers: HashMap<HolderId, ArmedTimer>,
}

impl ExpirationScheduler {
    pub fn new(range: Option<LeaseDurationRange>) -> Self {
        Self {
            range,
            timers: HashMap::new(),
        }
    }

    /// Duration for the next grant, or `None` when leases never expire.
    pub fn next_duration(&self) -> Option<Duration> {
        self.range.map(|r| r.sample())
    }

    /// Arm a timer that calls `target.expire(holder, lease)` after `after`.
    /// Replaces any timer already armed for `holder`.
    pub fn arm(
        &mut self,
        runtime: &Handle,
        target: Weak<dyn ExpiryTarget>,
        holder: HolderId,
        lease: LeaseId,
        after: Duration,
    ) {
        if let Some(stale) = self.timers.remove(&holder) {
            tracing::warn!(holder = %holder, lease = %stale.lease, "Replacing armed expiry timer");
            stale.handle.abort();
        }

        let deadline = Instant::now() + after;
        let task_holder = holder.clone();
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(target) = target.upgrade() {
                target.expire(&task_holder, lease);
            }
        });

        tracing::trace!(holder = %holder, lease = %lease, after = ?after, "Expiry timer armed");
        self.timers.insert(holder, ArmedTimer { lease, handle });
    }

    /// Disarm the timer for `holder` if it belongs to `lease`.
    pub fn cancel(&mut self, holder: &HolderId, lease: LeaseId) -> bool {
        match self.timers.get(holder) {
            Some(timer) if timer.lease == lease => {}
            _ => return false,
        }
        if let Some(timer) = self.timers.remove(holder) {
            timer.handle.abort();
            tracing::trace!(holder = %holder, lease = %lease, "Expiry timer cancelled");
        }
        true
    }

    #[cfg(test)]
    fn armed(&self) -> usize {
        self.timers.len()
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
    }
}

impl Drop for ExpirationScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Vec<(HolderId, LeaseId)>>,
    }

    impl ExpiryTarget for Recorder {
        fn expire(&self, holder: &HolderId, lease: LeaseId) {
            self.fired.lock().unwrap().push((holder.clone(), lease));
        }
    }

    fn id(name: &str) -> HolderId {
        HolderId::parse(name).unwrap()
    }

    fn weak(recorder: &Arc<Recorder>) -> Weak<dyn ExpiryTarget> {
        let target: Arc<dyn ExpiryTarget> = recorder.clone();
        Arc::downgrade(&target)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_duration() {
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = ExpirationScheduler::new(None);

        scheduler.arm(
            &Handle::current(),
            weak(&recorder),
            id("Alice"),
            LeaseId::new(1),
            Duration::from_secs(5),
        );

        tokio::time::sleep(Duration::from_millis(4999)).await;
        assert!(recorder.fired.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(
            *recorder.fired.lock().unwrap(),
            vec![(id("Alice"), LeaseId::new(1))]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = ExpirationScheduler::new(None);

        scheduler.arm(
            &Handle::current(),
            weak(&recorder),
            id("Bob"),
            LeaseId::new(2),
            Duration::from_secs(1),
        );
        assert!(scheduler.cancel(&id("Bob"), LeaseId::new(2)));
        assert_eq!(scheduler.armed(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(recorder.fired.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_ignores_other_lease() {
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = ExpirationScheduler::new(None);

        scheduler.arm(
            &Handle::current(),
            weak(&recorder),
            id("Charlie"),
            LeaseId::new(3),
            Duration::from_secs(1),
        );
        assert!(!scheduler.cancel(&id("Charlie"), LeaseId::new(99)));
        assert_eq!(scheduler.armed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_aborts_outstanding_timers() {
        let recorder = Arc::new(Recorder::default());
        let mut scheduler = ExpirationScheduler::new(None);

        scheduler.arm(
            &Handle::current(),
            weak(&recorder),
            id("Diana"),
            LeaseId::new(4),
            Duration::from_secs(1),
        );
        drop(scheduler);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(recorder.fired.lock().unwrap().is_empty());
    }

    #[test]
    fn next_duration_follows_range() {
        assert!(ExpirationScheduler::new(None).next_duration().is_none());

        let range = LeaseDurationRange::fixed(Duration::from_millis(750)).unwrap();
        let scheduler = ExpirationScheduler::new(Some(range));
        assert_eq!(scheduler.next_duration(), Some(Duration::from_millis(750)));
    }
}
