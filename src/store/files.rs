use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::PersistenceError;
use crate::orchestrator::{CheckpointRecord, SCHEMA_VERSION, SessionMeta};
use crate::slug::is_valid_session_id;

use super::{CheckpointStore, StoreResult, check_next_seq};

const SESSION_FILE: &str = "session.json";
const CHECKPOINT_DIR: &str = "checkpoints";

/// Directory-backed store.
///
/// Layout:
/// ```text
/// <root>/sessions/<session-id>/session.json
/// <root>/sessions/<session-id>/checkpoints/0000000001.json
/// ```
///
/// Records are written to a dot-prefixed temp file, fsynced, renamed into
/// place and the directory fsynced. A crash leaves either the complete
/// record or a stray temp file, which readers ignore.
///
/// Ids are used as directory names, so anything that is not a session id
/// is refused on write and reads as absent.
pub struct FileCheckpointStore {
    root: PathBuf,
    append_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            append_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(session_id)
    }

    fn checkpoint_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join(CHECKPOINT_DIR)
    }

    fn checkpoint_path(&self, session_id: &str, seq: u64) -> PathBuf {
        self.checkpoint_dir(session_id).join(checkpoint_file_name(seq))
    }

    async fn append_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.append_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Nothing is appended after a terminal record, so its lock can go.
    async fn release_append_lock(&self, session_id: &str) {
        self.append_locks.lock().await.remove(session_id);
    }

    /// Sequence numbers present on disk, ascending. Temp files are skipped.
    async fn stored_seqs(&self, session_id: &str) -> StoreResult<Vec<u64>> {
        if !is_valid_session_id(session_id) {
            return Ok(Vec::new());
        }
        let dir = self.checkpoint_dir(session_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut seqs = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            match parse_checkpoint_file_name(name) {
                Some(seq) => seqs.push(seq),
                None => debug!("Ignoring non-checkpoint file {}", name),
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    async fn read_checkpoint(&self, session_id: &str, seq: u64) -> StoreResult<Option<CheckpointRecord>> {
        if !is_valid_session_id(session_id) {
            return Ok(None);
        }
        let path = self.checkpoint_path(session_id, seq);
        let Some(record) = read_json::<CheckpointRecord>(&path).await? else {
            return Ok(None);
        };

        if record.seq != seq || record.session_id != session_id {
            return Err(PersistenceError::SequenceGap {
                session_id: session_id.to_string(),
                expected: seq,
                found: record.seq,
            });
        }
        if record.schema_version != SCHEMA_VERSION {
            warn!(
                "Checkpoint {} has schema version {} (current {})",
                path.display(),
                record.schema_version,
                SCHEMA_VERSION
            );
        }
        Ok(Some(record))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn create_session(&self, meta: &SessionMeta) -> StoreResult<()> {
        check_id(&meta.session_id)?;
        let lock = self.append_lock(&meta.session_id).await;
        let _guard = lock.lock().await;

        let dir = self.session_dir(&meta.session_id);
        let path = dir.join(SESSION_FILE);
        if exists(&path).await? {
            return Err(PersistenceError::SessionExists(meta.session_id.clone()));
        }

        let checkpoints = self.checkpoint_dir(&meta.session_id);
        fs::create_dir_all(&checkpoints)
            .await
            .map_err(|e| io_error(&checkpoints, e))?;
        write_durable(&path, meta).await?;

        debug!("Registered session {} at {}", meta.session_id, dir.display());
        Ok(())
    }

    async fn session(&self, session_id: &str) -> StoreResult<Option<SessionMeta>> {
        if !is_valid_session_id(session_id) {
            return Ok(None);
        }
        read_json(&self.session_dir(session_id).join(SESSION_FILE)).await
    }

    async fn list_sessions(&self) -> StoreResult<Vec<SessionMeta>> {
        let dir = self.sessions_dir();
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_error(&dir, e)),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_error(&dir, e))? {
            let path = entry.path().join(SESSION_FILE);
            if let Some(meta) = read_json::<SessionMeta>(&path).await? {
                sessions.push(meta);
            }
        }
        sessions.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(sessions)
    }

    async fn append(&self, record: &CheckpointRecord) -> StoreResult<()> {
        check_id(&record.session_id)?;
        let lock = self.append_lock(&record.session_id).await;
        let _guard = lock.lock().await;

        let meta_path = self.session_dir(&record.session_id).join(SESSION_FILE);
        if !exists(&meta_path).await? {
            return Err(PersistenceError::UnknownSession(record.session_id.clone()));
        }

        let latest = self
            .stored_seqs(&record.session_id)
            .await?
            .last()
            .copied()
            .unwrap_or(0);
        check_next_seq(record, latest)?;

        let path = self.checkpoint_path(&record.session_id, record.seq);
        if exists(&path).await? {
            return Err(PersistenceError::SequenceTaken {
                session_id: record.session_id.clone(),
                seq: record.seq,
            });
        }
        write_durable(&path, record).await?;

        if record.outcome.is_terminal() {
            self.release_append_lock(&record.session_id).await;
        }
        Ok(())
    }

    async fn latest(&self, session_id: &str) -> StoreResult<Option<CheckpointRecord>> {
        match self.stored_seqs(session_id).await?.last() {
            Some(&seq) => self.read_checkpoint(session_id, seq).await,
            None => Ok(None),
        }
    }

    async fn get(&self, session_id: &str, seq: u64) -> StoreResult<Option<CheckpointRecord>> {
        self.read_checkpoint(session_id, seq).await
    }

    async fn list(&self, session_id: &str) -> StoreResult<Vec<CheckpointRecord>> {
        let mut records = Vec::new();
        for seq in self.stored_seqs(session_id).await? {
            if let Some(record) = self.read_checkpoint(session_id, seq).await? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

// ============================================================================
// File helpers
// ============================================================================

fn check_id(session_id: &str) -> StoreResult<()> {
    if is_valid_session_id(session_id) {
        Ok(())
    } else {
        Err(PersistenceError::InvalidSessionId(session_id.to_string()))
    }
}

fn checkpoint_file_name(seq: u64) -> String {
    format!("{:010}.json", seq)
}

/// `0000000042.json` -> 42. Temp files (`.0000000042.json.tmp`) do not parse.
fn parse_checkpoint_file_name(name: &str) -> Option<u64> {
    let stem = name.strip_suffix(".json")?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

fn io_error(path: &Path, source: std::io::Error) -> PersistenceError {
    PersistenceError::Io {
        path: path.to_path_buf(),
        source,
    }
}

async fn exists(path: &Path) -> StoreResult<bool> {
    fs::try_exists(path).await.map_err(|e| io_error(path, e))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> StoreResult<Option<T>> {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(io_error(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| PersistenceError::Malformed {
            path: path.to_path_buf(),
            source,
        })
}

/// Write-to-temp, fsync, rename, fsync the parent directory.
async fn write_durable<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_vec_pretty(value).map_err(PersistenceError::Encode)?;

    let dir = path
        .parent()
        .ok_or_else(|| PersistenceError::Unavailable(format!("{} has no parent", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PersistenceError::Unavailable(format!("invalid path {}", path.display())))?;
    let temp_path = dir.join(format!(".{}.tmp", file_name));

    {
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.write_all(&json)
            .await
            .map_err(|e| io_error(&temp_path, e))?;
        file.sync_all().await.map_err(|e| io_error(&temp_path, e))?;
    }

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| io_error(path, e))?;

    sync_dir(dir).await
}

#[cfg(unix)]
async fn sync_dir(dir: &Path) -> StoreResult<()> {
    let handle = fs::File::open(dir).await.map_err(|e| io_error(dir, e))?;
    handle.sync_all().await.map_err(|e| io_error(dir, e))
}

#[cfg(not(unix))]
async fn sync_dir(_dir: &Path) -> StoreResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OutcomeMarker;
    use tempfile::tempdir;

    fn meta(id: &str) -> SessionMeta {
        SessionMeta::new(id.to_string(), "Insomnia".to_string(), "openai".to_string())
    }

    fn record(meta: &SessionMeta, seq: u64) -> CheckpointRecord {
        CheckpointRecord::new(seq, None, OutcomeMarker::Running, meta.initial_state())
    }

    #[test]
    fn test_checkpoint_file_names() {
        assert_eq!(checkpoint_file_name(7), "0000000007.json");
        assert_eq!(parse_checkpoint_file_name("0000000007.json"), Some(7));
        assert_eq!(parse_checkpoint_file_name(".0000000007.json.tmp"), None);
        assert_eq!(parse_checkpoint_file_name("session.json"), None);
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();

        store.append(&record(&meta, 1)).await.unwrap();
        store.append(&record(&meta, 2)).await.unwrap();

        let latest = store.latest("s-1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 2);
        assert_eq!(store.list("s-1").await.unwrap().len(), 2);
        assert_eq!(store.get("s-1", 1).await.unwrap().unwrap().seq, 1);
        assert!(store.get("s-1", 3).await.unwrap().is_none());
        assert!(
            dir.path()
                .join("sessions/s-1/checkpoints/0000000002.json")
                .exists()
        );
    }

    #[tokio::test]
    async fn test_sequence_is_enforced() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();
        store.append(&record(&meta, 1)).await.unwrap();

        assert!(matches!(
            store.append(&record(&meta, 1)).await,
            Err(PersistenceError::SequenceTaken { seq: 1, .. })
        ));
        assert!(matches!(
            store.append(&record(&meta, 3)).await,
            Err(PersistenceError::SequenceGap {
                expected: 2,
                found: 3,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_stray_temp_file_is_ignored() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();
        store.append(&record(&meta, 1)).await.unwrap();

        let stray = dir
            .path()
            .join("sessions/s-1/checkpoints/.0000000002.json.tmp");
        std::fs::write(&stray, b"{ truncated").unwrap();

        assert_eq!(store.latest("s-1").await.unwrap().unwrap().seq, 1);
        store.append(&record(&meta, 2)).await.unwrap();
        assert_eq!(store.latest("s-1").await.unwrap().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_duplicate_session_and_unknown_session() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();

        assert!(matches!(
            store.create_session(&meta).await,
            Err(PersistenceError::SessionExists(_))
        ));
        let other = self::meta("ghost");
        assert!(matches!(
            store.append(&record(&other, 1)).await,
            Err(PersistenceError::UnknownSession(_))
        ));
        assert!(store.latest("ghost").await.unwrap().is_none());
        assert_eq!(store.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ids_that_leave_the_store_are_refused() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("board"));
        std::fs::create_dir_all(dir.path().join("escape/checkpoints")).unwrap();
        std::fs::write(dir.path().join("escape/session.json"), b"{}").unwrap();

        let outside = meta("../../escape");
        assert!(matches!(
            store.create_session(&outside).await,
            Err(PersistenceError::InvalidSessionId(_))
        ));
        assert!(matches!(
            store.append(&record(&outside, 1)).await,
            Err(PersistenceError::InvalidSessionId(_))
        ));
        assert!(store.session("../../escape").await.unwrap().is_none());
        assert!(store.latest("../../escape").await.unwrap().is_none());
        assert!(store.get("../../escape", 1).await.unwrap().is_none());
        assert!(store.list("/etc").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_append_releases_lock() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();
        store.append(&record(&meta, 1)).await.unwrap();
        assert!(store.append_locks.lock().await.contains_key("s-1"));

        let done = CheckpointRecord::new(2, None, OutcomeMarker::Done, meta.initial_state());
        store.append(&done).await.unwrap();
        assert!(store.append_locks.lock().await.is_empty());
        assert_eq!(store.latest("s-1").await.unwrap().unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_malformed_checkpoint_is_reported() {
        let dir = tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let meta = meta("s-1");
        store.create_session(&meta).await.unwrap();
        std::fs::write(
            dir.path().join("sessions/s-1/checkpoints/0000000001.json"),
            b"not json",
        )
        .unwrap();

        assert!(matches!(
            store.latest("s-1").await,
            Err(PersistenceError::Malformed { .. })
        ));
    }
}
