//! leasepool: bounded lease pool for rate-limiting concurrent access.
//!
//! A fixed number of interchangeable slots shared by named holders. Holders
//! acquire a lease, leases may expire after a configured duration, and holders
//! that find the pool full wait in a queue until a release promotes them.

mod agent;
pub mod config;
mod expiry;
mod holder;
mod lease;
pub mod notify;
mod pool;
mod wait_queue;

pub use agent::HolderAgent;
pub use config::{ConfigError, LeaseDurationRange, PoolConfig};
pub use expiry::{ExpirationScheduler, ExpiryTarget};
pub use holder::{Holder, HolderId};
pub use lease::{Lease, LeaseId, LeaseStatus};
pub use notify::{NotificationChannel, RevocationEvent, RevocationReason, Subscription};
pub use pool::{AcquireResult, PoolError, PoolSnapshot, ReleaseResult, ResourcePool};
pub use wait_queue::{QueueDiscipline, WaitEntry, WaitQueue};
