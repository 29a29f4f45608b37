//! Durable rotation history and status.
//!
//! File-rooted, one directory per service:
//!
//! ```text
//! <state-root>/
//!   <service-name>/
//!     history.log      # NDJSON; one HistoryRecord per line, append-only
//!     status.json      # single RotationStatus object, atomically rewritten
//! ```
//!
//! Writes are serialized per service key by a mutex; readers go lock-free.
//! `status.json` updates go through a temp file in the same directory plus
//! rename, so a crash can never leave a torn status. A truncated final line
//! in `history.log` (crash mid-append) is discarded on read.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::io::AsyncWriteExt;
use umbra_error::{Result, UmbraError};

use crate::model::{HistoryRecord, RotationStatus, RotationStatusKind, ServiceRotationState};

const HISTORY_FILE: &str = "history.log";
const STATUS_FILE: &str = "status.json";

/// Durable, per-service rotation records.
pub struct RotationStore {
    root: PathBuf,
    locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl RotationStore {
    /// A store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    /// The per-user default state root.
    pub fn default_root() -> PathBuf {
        directories::ProjectDirs::from("dev", "umbra", "umbra")
            .map(|dirs| dirs.data_local_dir().join("rotation"))
            .unwrap_or_else(|| PathBuf::from(".umbra/rotation"))
    }

    /// The state root in use.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock_for(&self, service: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Directory traversal cannot be spelled with a service name.
    fn service_dir(&self, service: &str) -> PathBuf {
        let safe: String = service
            .chars()
            .map(|c| if c == '/' || c == '\\' || c == '.' { '_' } else { c })
            .collect();
        self.root.join(safe)
    }

    /// Append one history record.
    pub async fn append_history(&self, record: &HistoryRecord) -> Result<()> {
        let lock = self.lock_for(&record.service_name);
        let _guard = lock.lock().await;

        let dir = self.service_dir(&record.service_name);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create service dir", &dir, e))?;

        let mut line = serde_json::to_string(record)
            .map_err(|e| UmbraError::provider("rotation-store", "append", e))?;
        line.push('\n');

        let path = dir.join(HISTORY_FILE);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_error("open history", &path, e))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| storage_error("append history", &path, e))?;
        file.flush()
            .await
            .map_err(|e| storage_error("flush history", &path, e))?;
        Ok(())
    }

    /// Read a service's history, newest last.
    ///
    /// Unparseable lines are skipped: a truncated final line is the expected
    /// crash artifact, and one bad line must not poison the whole log.
    pub async fn read_history(
        &self,
        service: &str,
        limit: Option<usize>,
    ) -> Result<Vec<HistoryRecord>> {
        let path = self.service_dir(service).join(HISTORY_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("read history", &path, e)),
        };

        let mut records: Vec<HistoryRecord> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();
        if let Some(limit) = limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }

    /// The newest completed record carrying `fingerprint`, if any.
    pub async fn find_completed_fingerprint(
        &self,
        service: &str,
        fingerprint: &str,
    ) -> Result<Option<HistoryRecord>> {
        let records = self.read_history(service, None).await?;
        Ok(records
            .into_iter()
            .rev()
            .find(|r| r.fingerprint == fingerprint && r.status == RotationStatusKind::Completed))
    }

    /// Read a service's last-known status.
    pub async fn read_status(&self, service: &str) -> Result<Option<RotationStatus>> {
        let path = self.service_dir(service).join(STATUS_FILE);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read status", &path, e)),
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| UmbraError::provider("rotation-store", "read status", e))
    }

    /// Read-modify-write a service's status under its lock, atomically.
    pub async fn update_status<F>(&self, service: &str, update: F) -> Result<RotationStatus>
    where
        F: FnOnce(&mut RotationStatus),
    {
        let lock = self.lock_for(service);
        let _guard = lock.lock().await;

        let dir = self.service_dir(service);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_error("create service dir", &dir, e))?;

        let mut status = self
            .read_status(service)
            .await?
            .unwrap_or_else(|| RotationStatus::new(service));
        update(&mut status);

        let body = serde_json::to_vec_pretty(&status)
            .map_err(|e| UmbraError::provider("rotation-store", "write status", e))?;

        // Temp file in the same directory so the rename stays on one
        // filesystem and is atomic.
        let final_path = dir.join(STATUS_FILE);
        let temp_path = dir.join(format!(".{STATUS_FILE}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&temp_path, &body)
            .await
            .map_err(|e| storage_error("write status temp", &temp_path, e))?;
        tokio::fs::rename(&temp_path, &final_path)
            .await
            .map_err(|e| storage_error("rename status", &final_path, e))?;

        Ok(status)
    }

    /// Record a finished rotation into the status document.
    pub async fn record_outcome(
        &self,
        service: &str,
        outcome: RotationStatusKind,
        error: Option<String>,
    ) -> Result<RotationStatus> {
        self.update_status(service, |status| {
            status.rotation_count += 1;
            status.last_rotation = Some(chrono::Utc::now());
            status.last_result = Some(outcome);
            match outcome {
                RotationStatusKind::Completed => {
                    status.success_count += 1;
                    status.status = ServiceRotationState::Current;
                    status.last_error = None;
                }
                RotationStatusKind::Failed => {
                    status.failure_count += 1;
                    status.status = ServiceRotationState::Failed;
                    status.last_error = error;
                }
                _ => {
                    status.status = ServiceRotationState::NeedsRotation;
                }
            }
        })
        .await
    }

    /// Service names with any persisted state, sorted.
    pub async fn list_services(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list services", &self.root, e)),
        };
        let mut names = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| storage_error("list services", &self.root, e))?
        {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();
        Ok(names)
    }
}

fn storage_error(operation: &str, path: &Path, err: std::io::Error) -> UmbraError {
    UmbraError::provider(
        "rotation-store",
        format!("{operation} ({})", path.display()),
        err,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn record(service: &str, fingerprint: &str, status: RotationStatusKind) -> HistoryRecord {
        HistoryRecord {
            timestamp: Utc::now(),
            service_name: service.into(),
            credential_kind: "password".into(),
            action: "rotate".into(),
            status,
            duration: Duration::from_secs(1),
            strategy: "immediate".into(),
            fingerprint: fingerprint.into(),
            user: None,
            old_version: None,
            new_version: None,
            error: None,
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn history_appends_and_reads_back_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());

        for i in 0..3 {
            store
                .append_history(&record("prod-db", &format!("fp{i}"), RotationStatusKind::Completed))
                .await
                .unwrap();
        }

        let records = store.read_history("prod-db", None).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].fingerprint, "fp0");
        assert_eq!(records[2].fingerprint, "fp2");

        let limited = store.read_history("prod-db", Some(2)).await.unwrap();
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].fingerprint, "fp1");
    }

    #[tokio::test]
    async fn truncated_final_line_is_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());
        store
            .append_history(&record("prod-db", "good", RotationStatusKind::Completed))
            .await
            .unwrap();

        // Simulate a crash mid-append.
        let path = dir.path().join("prod-db").join(HISTORY_FILE);
        let mut raw = tokio::fs::read_to_string(&path).await.unwrap();
        raw.push_str("{\"timestamp\":\"2026-01-01T00:0");
        tokio::fs::write(&path, raw).await.unwrap();

        let records = store.read_history("prod-db", None).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fingerprint, "good");
    }

    #[tokio::test]
    async fn status_counts_accumulate_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());

        store
            .record_outcome("prod-db", RotationStatusKind::Completed, None)
            .await
            .unwrap();
        store
            .record_outcome("prod-db", RotationStatusKind::Failed, Some("boom".into()))
            .await
            .unwrap();
        store
            .record_outcome("prod-db", RotationStatusKind::Completed, None)
            .await
            .unwrap();

        let status = store.read_status("prod-db").await.unwrap().unwrap();
        assert_eq!(status.rotation_count, 3);
        assert_eq!(status.success_count, 2);
        assert_eq!(status.failure_count, 1);
        assert_eq!(status.status, ServiceRotationState::Current);
        assert!(status.last_error.is_none(), "success clears last_error");

        // No stray temp files after the dance.
        let mut dir_entries = tokio::fs::read_dir(dir.path().join("prod-db")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = dir_entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec![HISTORY_FILE, STATUS_FILE]);
    }

    #[tokio::test]
    async fn fingerprint_lookup_finds_only_completed() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());
        store
            .append_history(&record("svc", "fp-a", RotationStatusKind::Failed))
            .await
            .unwrap();
        store
            .append_history(&record("svc", "fp-a", RotationStatusKind::Completed))
            .await
            .unwrap();

        let hit = store.find_completed_fingerprint("svc", "fp-a").await.unwrap();
        assert!(hit.is_some());
        let miss = store.find_completed_fingerprint("svc", "fp-b").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn concurrent_writers_to_one_service_serialize() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RotationStore::new(dir.path()));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .record_outcome("svc", RotationStatusKind::Completed, None)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let status = store.read_status("svc").await.unwrap().unwrap();
        assert_eq!(status.rotation_count, 16);
        assert_eq!(status.success_count, 16);
    }

    #[tokio::test]
    async fn list_services_names_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());
        store
            .record_outcome("b-svc", RotationStatusKind::Completed, None)
            .await
            .unwrap();
        store
            .record_outcome("a-svc", RotationStatusKind::Completed, None)
            .await
            .unwrap();
        assert_eq!(store.list_services().await.unwrap(), vec!["a-svc", "b-svc"]);
    }

    #[tokio::test]
    async fn status_history_appends_with_history_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = RotationStore::new(dir.path());
        // A record whose history append happened but status write crashed is
        // still readable; status lazily reconstructs on the next update.
        store
            .append_history(&record("svc", "fp", RotationStatusKind::Completed))
            .await
            .unwrap();
        assert!(store.read_status("svc").await.unwrap().is_none());
    }
}
