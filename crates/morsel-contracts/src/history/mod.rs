use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::food::AnalysisResult;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed writing history file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed encoding history: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Durable collection of accepted analysis records, backed by one JSON file.
///
/// Every mutation is a full read-modify-write of the collection; the internal
/// mutex serializes those cycles so concurrent callers through one handle
/// cannot lose updates or duplicate an identifier. A file that fails to
/// decode is logged and treated as empty.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends a record and rewrites the whole collection.
    pub fn save(&self, result: &AnalysisResult) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut items = read_records(&self.path);
        items.push(result.clone());
        write_records(&self.path, &items)
    }

    /// Replaces the stored record with the same id in place. No-op when the
    /// id is absent.
    pub fn update(&self, result: &AnalysisResult) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut items = read_records(&self.path);
        let Some(slot) = items.iter_mut().find(|item| item.id == result.id) else {
            return Ok(());
        };
        *slot = result.clone();
        write_records(&self.path, &items)
    }

    /// Removes the record with the given id. No-op when the id is absent.
    pub fn delete(&self, id: Uuid) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut items = read_records(&self.path);
        let before = items.len();
        items.retain(|item| item.id != id);
        if items.len() == before {
            return Ok(());
        }
        write_records(&self.path, &items)
    }

    /// Returns the full collection; empty when no durable state exists or it
    /// fails to decode.
    pub fn load_all(&self) -> Vec<AnalysisResult> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        read_records(&self.path)
    }

    /// Records whose analysis date falls on the given UTC calendar day.
    pub fn by_date(&self, day: NaiveDate) -> Vec<AnalysisResult> {
        self.load_all()
            .into_iter()
            .filter(|item| item.analysis_date.date_naive() == day)
            .collect()
    }

    pub fn exists(&self, id: Uuid) -> bool {
        self.load_all().iter().any(|item| item.id == id)
    }

    /// Empties the durable collection.
    pub fn clear_all(&self) -> Result<(), HistoryError> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        write_records(&self.path, &[])
    }
}

fn read_records(path: &Path) -> Vec<AnalysisResult> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "history file unreadable, treating as empty");
            return Vec::new();
        }
    };
    match serde_json::from_str(&raw) {
        Ok(items) => items,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "history file failed to decode, treating as empty");
            Vec::new()
        }
    }
}

fn write_records(path: &Path, items: &[AnalysisResult]) -> Result<(), HistoryError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| HistoryError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }
    let encoded = serde_json::to_string_pretty(items)?;
    std::fs::write(path, encoded).map_err(|source| HistoryError::Write {
        path: path.to_path_buf(),
        source,
    })
}
