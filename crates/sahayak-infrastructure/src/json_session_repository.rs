//! JSON-on-disk SessionRepository implementation.
//!
//! One pretty-printed JSON file per session under `<base>/sessions/`, with
//! ISO-8601 timestamps as serialized by the domain models.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;

use sahayak_core::SahayakError;
use sahayak_core::error::Result;
use sahayak_core::session::{Session, SessionRepository};

/// File-backed session repository.
///
/// Directory structure:
/// ```text
/// base_dir/
/// └── sessions/
///     ├── session-id-1.json
///     └── session-id-2.json
/// ```
pub struct JsonDirSessionRepository {
    sessions_dir: PathBuf,
}

impl JsonDirSessionRepository {
    /// Creates a repository at the default location (`~/.config/sahayak`).
    pub async fn default_location() -> Result<Self> {
        let base_dir = crate::paths::SahayakPaths::config_dir()
            .map_err(|e| SahayakError::config(format!("Failed to get config directory: {e}")))?;
        Self::new(base_dir).await
    }

    /// Creates a repository rooted at `base_dir`, creating the sessions
    /// directory if needed.
    pub async fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let sessions_dir = base_dir.as_ref().join("sessions");
        fs::create_dir_all(&sessions_dir).await?;
        Ok(Self { sessions_dir })
    }

    /// Returns the directory session files are stored in.
    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }

    fn session_path(&self, session_id: &str) -> Result<PathBuf> {
        // Session ids become file names; refuse anything that could escape
        // the sessions directory.
        if session_id.is_empty()
            || session_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        {
            return Err(SahayakError::InvalidInput(format!(
                "invalid session id '{session_id}'"
            )));
        }
        Ok(self.sessions_dir.join(format!("{session_id}.json")))
    }
}

#[async_trait]
impl SessionRepository for JsonDirSessionRepository {
    async fn find_by_id(&self, session_id: &str) -> Result<Option<Session>> {
        let path = self.session_path(session_id)?;
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, session: &Session) -> Result<()> {
        let path = self.session_path(&session.id)?;
        let raw = serde_json::to_string_pretty(session)?;
        fs::write(&path, raw).await?;
        tracing::debug!(target: "storage", session_id = %session.id, "session saved");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        let path = self.session_path(session_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list_all(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        let mut entries = fs::read_dir(&self.sessions_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match fs::read_to_string(&path).await {
                Ok(raw) => match serde_json::from_str::<Session>(&raw) {
                    Ok(session) => sessions.push(session),
                    Err(err) => {
                        // Continue loading other sessions
                        tracing::warn!(
                            target: "storage",
                            path = %path.display(),
                            %err,
                            "skipping unreadable session file"
                        );
                    }
                },
                Err(err) => {
                    tracing::warn!(
                        target: "storage",
                        path = %path.display(),
                        %err,
                        "failed to read session file"
                    );
                }
            }
        }

        // Most recently active first
        sessions.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(sessions)
    }
}
