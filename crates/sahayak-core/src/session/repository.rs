//! Session repository trait definition.

use async_trait::async_trait;

use super::model::Session;
use crate::error::Result;

/// Persistent storage seam for session records.
///
/// The core never performs IO itself; implementations live in the
/// infrastructure layer (JSON-on-disk, in-memory mocks for tests).
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Finds a session by its id. Returns `Ok(None)` when absent.
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>>;

    /// Saves (creates or replaces) a session record.
    async fn save(&self, session: &Session) -> Result<()>;

    /// Deletes a session record. Deleting an absent session is not an error.
    async fn delete(&self, session_id: &str) -> Result<()>;

    /// Lists all sessions, most recently active first.
    async fn list_all(&self) -> Result<Vec<Session>>;
}
