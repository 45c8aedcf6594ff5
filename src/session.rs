//! Session registry for the upload / process / download workflow
//!
//! Each session owns an `uploads/` and an `outputs/` directory under the
//! store root and moves through `Uploaded -> Processed -> Closed`. Sessions
//! are keyed by random UUIDs and tracked in memory; a directory on disk
//! without a registry entry is not a session. A closed session keeps its
//! registry entry (without files) until the next expiry sweep, so closing it
//! again is answered differently from an unknown id.

use crate::{
    archive::sanitize_filename,
    error::{ProcessingError, Result},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

const UPLOADS_DIR: &str = "uploads";
const OUTPUTS_DIR: &str = "outputs";

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Files uploaded, nothing processed yet
    Uploaded,
    /// At least one processing run stored its outputs
    Processed,
    /// Files deleted; only `info` and a repeated `remove` still see it
    Closed,
}

/// A file stored in a session directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Snapshot of a session's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: Uuid,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionEntry {
    state: SessionState,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    dir: PathBuf,
}

impl SessionEntry {
    fn info(&self, id: Uuid) -> SessionInfo {
        SessionInfo {
            id,
            state: self.state,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Filesystem-backed session registry
#[derive(Debug)]
pub struct SessionStore {
    root: PathBuf,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionStore {
    /// Create a store rooted at `root`; directories are created on demand
    #[must_use]
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Parse a client-supplied session id
    ///
    /// Malformed ids are reported as unknown sessions.
    ///
    /// # Errors
    /// Returns `ProcessingError::NotFound` if `raw` is not a UUID.
    pub fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw).map_err(|_| ProcessingError::not_found(format!("Session {raw}")))
    }

    /// Register a new session and create its directories
    ///
    /// # Errors
    /// Returns `ProcessingError::Storage` if the directories cannot be created.
    #[instrument(skip(self))]
    pub async fn create(&self) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let dir = self.root.join(id.to_string());

        for sub in [UPLOADS_DIR, OUTPUTS_DIR] {
            let path = dir.join(sub);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| ProcessingError::file_io_error("create session directory", &path, &e))?;
        }

        let now = Utc::now();
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                state: SessionState::Uploaded,
                created_at: now,
                updated_at: now,
                dir,
            },
        );

        info!(session_id = %id, "session created");
        Ok(id)
    }

    /// Current bookkeeping of a session, including closed ones
    ///
    /// # Errors
    /// Returns `ProcessingError::NotFound` for unknown sessions.
    pub async fn info(&self, id: Uuid) -> Result<SessionInfo> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.info(id))
            .ok_or_else(|| ProcessingError::not_found(format!("Session {id}")))
    }

    /// Number of sessions that are not closed
    pub async fn len(&self) -> usize {
        self.sessions
            .read()
            .await
            .values()
            .filter(|entry| entry.state != SessionState::Closed)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Store an uploaded file, returning its sanitised name
    ///
    /// # Errors
    /// - `ProcessingError::NotFound` for unknown or closed sessions
    /// - `ProcessingError::Validation` once the session has been processed
    /// - `ProcessingError::Storage` on write failures
    pub async fn add_upload(&self, id: Uuid, filename: &str, bytes: &[u8]) -> Result<String> {
        let dir = {
            let mut sessions = self.sessions.write().await;
            let entry = Self::live_entry_mut(&mut sessions, id)?;
            if entry.state != SessionState::Uploaded {
                return Err(ProcessingError::validation(format!(
                    "Session {id} no longer accepts uploads"
                )));
            }
            entry.updated_at = Utc::now();
            entry.dir.join(UPLOADS_DIR)
        };

        let name = sanitize_filename(filename, "upload");
        Self::write_file(&dir, &name, bytes).await?;
        debug!(session_id = %id, filename = %name, size = bytes.len(), "upload stored");
        Ok(name)
    }

    /// Uploaded files, sorted by name
    ///
    /// # Errors
    /// - `ProcessingError::NotFound` for unknown or closed sessions
    /// - `ProcessingError::Storage` when the directory cannot be listed
    pub async fn uploads(&self, id: Uuid) -> Result<Vec<StoredFile>> {
        let dir = self.session_dir(id).await?.join(UPLOADS_DIR);
        Self::list_files(&dir).await
    }

    /// Read an uploaded file
    ///
    /// # Errors
    /// Returns `ProcessingError::NotFound` if the session or file is unknown.
    pub async fn read_upload(&self, id: Uuid, filename: &str) -> Result<Vec<u8>> {
        let dir = self.session_dir(id).await?.join(UPLOADS_DIR);
        Self::read_file(&dir, filename).await
    }

    /// Store a processed file, returning its sanitised name
    ///
    /// # Errors
    /// - `ProcessingError::NotFound` for unknown or closed sessions
    /// - `ProcessingError::Storage` on write failures
    pub async fn store_output(&self, id: Uuid, filename: &str, bytes: &[u8]) -> Result<String> {
        let dir = self.session_dir(id).await?.join(OUTPUTS_DIR);
        let name = sanitize_filename(filename, "output.png");
        Self::write_file(&dir, &name, bytes).await?;
        Ok(name)
    }

    /// Processed files, sorted by name
    ///
    /// # Errors
    /// - `ProcessingError::NotFound` for unknown or closed sessions
    /// - `ProcessingError::Storage` when the directory cannot be listed
    pub async fn outputs(&self, id: Uuid) -> Result<Vec<StoredFile>> {
        let dir = self.session_dir(id).await?.join(OUTPUTS_DIR);
        Self::list_files(&dir).await
    }

    /// Read a processed file
    ///
    /// # Errors
    /// Returns `ProcessingError::NotFound` if the session or file is unknown.
    pub async fn read_output(&self, id: Uuid, filename: &str) -> Result<Vec<u8>> {
        let dir = self.session_dir(id).await?.join(OUTPUTS_DIR);
        Self::read_file(&dir, filename).await
    }

    /// Record a completed processing run
    ///
    /// # Errors
    /// Returns `ProcessingError::NotFound` for unknown or closed sessions.
    pub async fn mark_processed(&self, id: Uuid) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entry = Self::live_entry_mut(&mut sessions, id)?;
        entry.state = SessionState::Processed;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Close a session and delete its directory
    ///
    /// Closing an already closed session is a no-op.
    ///
    /// # Errors
    /// - `ProcessingError::NotFound` for unknown sessions
    /// - `ProcessingError::Storage` if the directory cannot be removed
    #[instrument(skip(self), fields(session_id = %id))]
    pub async fn remove(&self, id: Uuid) -> Result<()> {
        let dir = {
            let mut sessions = self.sessions.write().await;
            let entry = sessions
                .get_mut(&id)
                .ok_or_else(|| ProcessingError::not_found(format!("Session {id}")))?;
            if entry.state == SessionState::Closed {
                debug!("session already closed");
                return Ok(());
            }
            entry.state = SessionState::Closed;
            entry.updated_at = Utc::now();
            entry.dir.clone()
        };

        match fs::remove_dir_all(&dir).await {
            Ok(()) => {},
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => return Err(ProcessingError::file_io_error("remove session", &dir, &e)),
        }

        info!("session closed");
        Ok(())
    }

    /// Close every session idle for longer than `ttl` and forget closed
    /// sessions older than `ttl`
    ///
    /// Returns the number of sessions closed. Failures to delete a
    /// directory are logged and do not stop the sweep.
    pub async fn purge_expired(&self, ttl: Duration) -> usize {
        let cutoff = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        let Some(cutoff) = cutoff else {
            return 0;
        };

        let expired: Vec<Uuid> = {
            let mut sessions = self.sessions.write().await;
            sessions.retain(|_, entry| {
                entry.state != SessionState::Closed || entry.updated_at >= cutoff
            });
            sessions
                .iter()
                .filter(|(_, entry)| entry.updated_at < cutoff)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut closed = 0;
        for id in expired {
            match self.remove(id).await {
                Ok(()) => closed += 1,
                Err(ProcessingError::NotFound(_)) => {},
                Err(e) => warn!(session_id = %id, error = %e, "failed to purge session"),
            }
        }

        if closed > 0 {
            info!(closed, "expired sessions purged");
        }
        closed
    }

    async fn session_dir(&self, id: Uuid) -> Result<PathBuf> {
        let sessions = self.sessions.read().await;
        Self::live_entry(&sessions, id).map(|entry| entry.dir.clone())
    }

    fn live_entry(sessions: &HashMap<Uuid, SessionEntry>, id: Uuid) -> Result<&SessionEntry> {
        sessions
            .get(&id)
            .filter(|entry| entry.state != SessionState::Closed)
            .ok_or_else(|| ProcessingError::not_found(format!("Session {id}")))
    }

    fn live_entry_mut(
        sessions: &mut HashMap<Uuid, SessionEntry>,
        id: Uuid,
    ) -> Result<&mut SessionEntry> {
        sessions
            .get_mut(&id)
            .filter(|entry| entry.state != SessionState::Closed)
            .ok_or_else(|| ProcessingError::not_found(format!("Session {id}")))
    }

    async fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<()> {
        let path = dir.join(name);
        fs::write(&path, bytes)
            .await
            .map_err(|e| ProcessingError::file_io_error("write", &path, &e))
    }

    async fn read_file(dir: &Path, filename: &str) -> Result<Vec<u8>> {
        let name = sanitize_filename(filename, "");
        if name.is_empty() {
            return Err(ProcessingError::not_found(format!("File {filename}")));
        }

        let path = dir.join(&name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ProcessingError::not_found(format!("File {name}")))
            },
            Err(e) => Err(ProcessingError::file_io_error("read", &path, &e)),
        }
    }

    async fn list_files(dir: &Path) -> Result<Vec<StoredFile>> {
        let mut entries = fs::read_dir(dir)
            .await
            .map_err(|e| ProcessingError::file_io_error("list", dir, &e))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ProcessingError::file_io_error("list", dir, &e))?
        {
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| ProcessingError::file_io_error("stat", entry.path(), &e))?;
            if !metadata.is_file() {
                continue;
            }
            if let Some(filename) = entry.file_name().to_str() {
                files.push(StoredFile {
                    filename: filename.to_string(),
                    path: entry.path(),
                    size: metadata.len(),
                });
            }
        }

        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        Ok(files)
    }
}
