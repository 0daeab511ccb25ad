use serde::{Deserialize, Serialize};

use super::Metadata;

/// Ordered conversation container owning messages.
///
/// Deleting a thread cascades to its messages, runs, and run steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: i64,
    pub modified_at: i64,
}
