//! Protected data units

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The data unit protected by usage-control rules
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Local artifact identifier, used as rule target.
    pub id: String,
    /// Identifier of the artifact at the remote connector, if requested
    /// from a peer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    pub created: DateTime<Utc>,
    /// Access counter. Mutated only through the entity store's atomic
    /// increment after an allowed access is committed; monotonically
    /// non-decreasing.
    #[serde(default)]
    pub num_accessed: u64,
    /// Timestamp of the first allowed access, recorded once and used by
    /// duration-bound rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_access: Option<DateTime<Utc>>,
}

impl Artifact {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            remote_id: None,
            created: Utc::now(),
            num_accessed: 0,
            first_access: None,
        }
    }
}
