//! Holder identities.
//!
//! Holders are created externally and referenced by id only. The pool never
//! owns a [`Holder`], it stores [`HolderId`]s in its lease map and wait queue.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::pool::PoolError;

/// Maximum accepted holder id length in bytes.
pub const MAX_HOLDER_ID_LEN: usize = 256;

/// Validated, cheaply clonable holder identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HolderId(Arc<str>);

impl HolderId {
    pub fn parse(id: &str) -> Result<Self, PoolError> {
        if id.is_empty() {
            return Err(PoolError::invalid_holder("holder id is empty"));
        }
        if id.trim() != id {
            return Err(PoolError::invalid_holder(
                "holder id has leading or trailing whitespace",
            ));
        }
        if id.len() > MAX_HOLDER_ID_LEN {
            return Err(PoolError::invalid_holder(format!(
                "holder id exceeds {MAX_HOLDER_ID_LEN} bytes"
            )));
        }
        if id.chars().any(char::is_control) {
            return Err(PoolError::invalid_holder(
                "holder id contains control characters",
            ));
        }
        Ok(Self(Arc::from(id)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HolderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for HolderId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for HolderId {
    type Error = PoolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<HolderId> for String {
    fn from(id: HolderId) -> Self {
        id.0.to_string()
    }
}

/// An external holder identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Holder {
    id: HolderId,
}

impl Holder {
    pub fn new(name: &str) -> Result<Self, PoolError> {
        Ok(Self {
            id: HolderId::parse(name)?,
        })
    }

    pub fn id(&self) -> &HolderId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.as_str()
    }
}

impl From<HolderId> for Holder {
    fn from(id: HolderId) -> Self {
        Self { id }
    }
}
