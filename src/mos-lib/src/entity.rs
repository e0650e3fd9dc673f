use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{MosError, MosResult};

/// The opaque handle naming one blob in a bucket's blob store.
///
/// A v4 UUID, never reused: overwrite allocates a fresh id and deletes the
/// old blob only after the catalog commit succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(id: &str) -> MosResult<Self> {
        Uuid::parse_str(id)
            .map_err(|e| MosError::InvalidParam(format!("invalid entity id {}: {}", id, e)))?;
        Ok(Self(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = MosError;

    fn try_from(value: String) -> MosResult<Self> {
        Self::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}
