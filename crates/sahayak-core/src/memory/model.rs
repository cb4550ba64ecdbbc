//! Memory domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::intent::IntentType;

/// What kind of note a memory item records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    /// Something true about the teacher's situation
    Fact,
    /// A stated or inferred preference, weighted up during retrieval
    Preference,
    /// Conversational context, weighted down during retrieval
    Context,
}

/// Classification context captured when an item was created.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<IntentType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grades: Vec<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u8>,
}

/// One stored fact/preference/context note scoped to a session.
///
/// Items are never mutated after creation except for `usage_count`, which
/// only increases, and are never deleted except by the retention sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub session_id: String,
    pub content: String,
    pub kind: MemoryKind,
    pub created_at: DateTime<Utc>,
    /// Incremented each time the item is returned by a retrieval call
    pub usage_count: u32,
    #[serde(default)]
    pub metadata: MemoryMetadata,
}

/// Aggregate statistics over one session's memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_items: usize,
    pub fact_count: usize,
    pub preference_count: usize,
    pub context_count: usize,
    pub average_usage: f64,
    pub oldest_item: Option<DateTime<Utc>>,
    pub newest_item: Option<DateTime<Utc>>,
}
