//! Lease value types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::holder::HolderId;

/// Pool-unique lease identifier. Monotonically increasing per pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct LeaseId(u64);

impl LeaseId {
    pub(crate) fn new(seq: u64) -> Self {
        Self(seq)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lease-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaseStatus {
    Active,
    Inactive,
}

impl LeaseStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
        }
    }
}

/// One holder's claim on a pool slot.
///
/// Leases handed out by the pool are snapshots: mutating a returned lease
/// has no effect on pool state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    id: LeaseId,
    holder: HolderId,
    granted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    status: LeaseStatus,
}

impl Lease {
    pub(crate) fn grant(
        id: LeaseId,
        holder: HolderId,
        granted_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id,
            holder,
            granted_at,
            expires_at,
            status: LeaseStatus::Active,
        }
    }

    /// Active → Inactive. There is no transition back.
    pub(crate) fn deactivate(&mut self) {
        self.status = LeaseStatus::Inactive;
    }

    pub fn id(&self) -> LeaseId {
        self.id
    }

    pub fn holder(&self) -> &HolderId {
        &self.holder
    }

    pub fn granted_at(&self) -> DateTime<Utc> {
        self.granted_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn status(&self) -> LeaseStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}
