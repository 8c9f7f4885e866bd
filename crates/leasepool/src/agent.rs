//! Holder-facing façade over a [`ResourcePool`].

use crate::holder::Holder;
use crate::pool::{AcquireResult, PoolError, ReleaseResult, ResourcePool};

/// Claims and revokes leases on behalf of holders. Pure delegation.
#[derive(Debug, Clone)]
pub struct HolderAgent {
    pool: ResourcePool,
}

impl HolderAgent {
    pub fn new(pool: ResourcePool) -> Self {
        Self { pool }
    }

    pub fn claim(&self, holder: &Holder) -> Result<AcquireResult, PoolError> {
        self.pool.acquire(holder.name())
    }

    pub fn revoke(&self, holder: &Holder) -> Result<ReleaseResult, PoolError> {
        self.pool.release(holder.name())
    }

    pub fn pool(&self) -> &ResourcePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;

    #[test]
    fn claim_and_revoke_delegate_to_pool() {
        let pool = ResourcePool::new(PoolConfig::default().with_capacity(1)).unwrap();
        let agent = HolderAgent::new(pool.clone());
        let alice = Holder::new("Alice").unwrap();
        let bob = Holder::new("Bob").unwrap();

        assert!(agent.claim(&alice).unwrap().is_granted());
        assert!(agent.claim(&bob).unwrap().is_queued());

        let released = agent.revoke(&alice).unwrap();
        assert_eq!(released.promoted().unwrap().holder(), bob.id());
        assert!(pool.lease("Bob").is_some());
        assert_eq!(agent.revoke(&alice).unwrap(), ReleaseResult::NoOp);
    }
}
