//! The progress ledger: a durable per-file resume cursor.
//!
//! One append-oriented file per `(version, entity class)`, one JSON object
//! per line, append-then-fsync on write, scan-backward-past-corruption on
//! read.

use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use discog_types::{DumpVersion, EntityClass};
use log::{debug, warn};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

#[derive(Debug, Error, Diagnostic)]
pub enum LedgerError {
    #[error("error creating ledger directory {path:?}")]
    CreateDir { path: PathBuf, #[source] source: io::Error },

    #[error("error opening cursor file {path:?}")]
    OpenFile { path: PathBuf, #[source] source: io::Error },

    #[error("error reading cursor file {path:?}")]
    ReadFile { path: PathBuf, #[source] source: io::Error },

    #[error("error writing cursor file {path:?}")]
    WriteFile { path: PathBuf, #[source] source: io::Error },

    #[error("error fsyncing cursor file {path:?}")]
    Fsync { path: PathBuf, #[source] source: io::Error },

    #[error("error removing cursor file {path:?} during garbage collection")]
    RemoveFile { path: PathBuf, #[source] source: io::Error },
}

/// Resume position inside a single `(version, entity class)` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub offset: u64,
    pub records: u64,
    pub idx: u64,
    pub ts: DateTime<Utc>,
    /// Set once `mark_file_complete` has been called; a terminal cursor is
    /// never advanced further.
    #[serde(default)]
    pub terminal: bool,
}

impl Cursor {
    fn fresh() -> Self {
        Self { offset: 0, records: 0, idx: 0, ts: Utc::now(), terminal: false }
    }
}

/// Stateless aside from `root`, so `Clone` is just a `PathBuf` copy — cheap
/// enough to hand one to every per-class task.
#[derive(Clone)]
pub struct ProgressLedger {
    root: PathBuf,
}

impl ProgressLedger {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cursor_path(&self, version: DumpVersion, class: EntityClass) -> PathBuf {
        self.root.join(version.to_string()).join(format!("{}.cursor", class.as_str()))
    }

    fn completed_marker_path(&self, version: DumpVersion) -> PathBuf {
        self.root.join(version.to_string()).join("COMPLETE")
    }

    async fn ensure_parent(&self, path: &Path) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| LedgerError::CreateDir { path: parent.to_path_buf(), source })?;
        }
        Ok(())
    }

    /// Returns the last persisted cursor, or `None` if the file doesn't
    /// exist or contains no well-formed line.
    pub async fn load(
        &self,
        version: DumpVersion,
        class: EntityClass,
    ) -> Result<Option<Cursor>, LedgerError> {
        let path = self.cursor_path(version, class);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LedgerError::ReadFile { path, source }),
        };

        // Scan backward from the end of the file for the last well-formed
        // line; a crash mid-append can leave a truncated/corrupt tail line.
        for line in bytes.rsplit(|&b| b == b'\n') {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_slice::<Cursor>(line) {
                Ok(cursor) => return Ok(Some(cursor)),
                Err(err) => {
                    warn!(
                        "event=ledger_tail_corrupt path={path:?} error={err}. Scanning backward."
                    );
                }
            }
        }

        Ok(None)
    }

    /// Atomically appends a new cursor line and fsyncs before returning.
    pub async fn checkpoint(
        &self,
        version: DumpVersion,
        class: EntityClass,
        offset: u64,
        records: u64,
        idx: u64,
    ) -> Result<(), LedgerError> {
        let cursor = Cursor { offset, records, idx, ts: Utc::now(), terminal: false };
        self.append_line(version, class, &cursor).await
    }

    pub async fn mark_file_complete(
        &self,
        version: DumpVersion,
        class: EntityClass,
    ) -> Result<(), LedgerError> {
        let mut cursor = self.load(version, class).await?.unwrap_or_else(Cursor::fresh);
        cursor.terminal = true;
        cursor.ts = Utc::now();
        self.append_line(version, class, &cursor).await
    }

    /// Marks the whole dump as done and garbage-collects per-file cursors.
    pub async fn mark_version_complete(&self, version: DumpVersion) -> Result<(), LedgerError> {
        let marker_path = self.completed_marker_path(version);
        self.ensure_parent(&marker_path).await?;
        fs::write(&marker_path, version.to_string().as_bytes())
            .await
            .map_err(|source| LedgerError::WriteFile { path: marker_path.clone(), source })?;

        for class in EntityClass::ALL {
            let path = self.cursor_path(version, class);
            match fs::remove_file(&path).await {
                Ok(()) => debug!("event=cursor_gc path={path:?}"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(LedgerError::RemoveFile { path, source }),
            }
        }

        Ok(())
    }

    pub async fn is_version_complete(&self, version: DumpVersion) -> bool {
        fs::metadata(self.completed_marker_path(version)).await.is_ok()
    }

    async fn append_line(
        &self,
        version: DumpVersion,
        class: EntityClass,
        cursor: &Cursor,
    ) -> Result<(), LedgerError> {
        let path = self.cursor_path(version, class);
        self.ensure_parent(&path).await?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| LedgerError::OpenFile { path: path.clone(), source })?;

        let mut line = serde_json::to_vec(cursor).expect("Cursor always serializes");
        line.push(b'\n');

        file.write_all(&line)
            .await
            .map_err(|source| LedgerError::WriteFile { path: path.clone(), source })?;
        file.sync_all().await.map_err(|source| LedgerError::Fsync { path: path.clone(), source })?;

        Ok(())
    }
}

/// Exercises the documented corruption-tolerance behavior directly against
/// the file, bypassing `append_line`, to simulate a crash mid-write.
#[cfg(test)]
async fn corrupt_tail(path: &Path) {
    let mut file = OpenOptions::new().append(true).open(path).await.unwrap();
    file.write_all(b"{not valid json\n").await.unwrap();
    file.sync_all().await.unwrap();
}

#[cfg(test)]
async fn file_len(path: &Path) -> u64 {
    File::open(path).await.unwrap().seek(SeekFrom::End(0)).await.unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn load_returns_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::new(dir.path());
        let version = DumpVersion::parse("20240601").unwrap();
        assert!(ledger.load(version, EntityClass::Artist).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkpoint_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::new(dir.path());
        let version = DumpVersion::parse("20240601").unwrap();
        ledger.checkpoint(version, EntityClass::Artist, 1000, 10, 10).await.unwrap();
        ledger.checkpoint(version, EntityClass::Artist, 2000, 20, 20).await.unwrap();

        let cursor = ledger.load(version, EntityClass::Artist).await.unwrap().unwrap();
        assert_eq!(cursor.offset, 2000);
        assert_eq!(cursor.records, 20);
        assert_eq!(cursor.idx, 20);
        assert!(!cursor.terminal);
    }

    #[tokio::test]
    async fn mark_file_complete_sets_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::new(dir.path());
        let version = DumpVersion::parse("20240601").unwrap();
        ledger.checkpoint(version, EntityClass::Label, 500, 5, 5).await.unwrap();
        ledger.mark_file_complete(version, EntityClass::Label).await.unwrap();

        let cursor = ledger.load(version, EntityClass::Label).await.unwrap().unwrap();
        assert!(cursor.terminal);
    }

    #[tokio::test]
    async fn tolerates_corrupted_tail_line() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::new(dir.path());
        let version = DumpVersion::parse("20240601").unwrap();
        ledger.checkpoint(version, EntityClass::Master, 100, 1, 1).await.unwrap();

        let path = ledger.cursor_path(version, EntityClass::Master);
        corrupt_tail(&path).await;
        assert!(file_len(&path).await > 0);

        let cursor = ledger.load(version, EntityClass::Master).await.unwrap().unwrap();
        assert_eq!(cursor.offset, 100);
    }

    #[tokio::test]
    async fn mark_version_complete_garbage_collects_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProgressLedger::new(dir.path());
        let version = DumpVersion::parse("20240601").unwrap();
        for class in EntityClass::ALL {
            ledger.checkpoint(version, class, 1, 1, 1).await.unwrap();
            ledger.mark_file_complete(version, class).await.unwrap();
        }

        ledger.mark_version_complete(version).await.unwrap();

        assert!(ledger.is_version_complete(version).await);
        for class in EntityClass::ALL {
            assert!(ledger.load(version, class).await.unwrap().is_none());
        }
    }
}
