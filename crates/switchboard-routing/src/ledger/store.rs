//! Persistence backends for performance records.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{from_str, to_string_pretty};
use switchboard_core::IgnoreLock as _;
use tracing::warn;
use uuid::Uuid;

use super::{Outcome, OutcomeStatus, PerformanceRecord};
use crate::{Result, RoutingError};

/// Which records an aggregate scan covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    Strategy(String),
    Model(String),
}

impl RecordFilter {
    pub fn matches(&self, record: &PerformanceRecord) -> bool {
        match self {
            Self::All => true,
            Self::Strategy(name) => record.strategy == *name,
            Self::Model(name) => record.model == *name,
        }
    }
}

/// Durable storage of [`PerformanceRecord`] rows keyed by decision id.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Inserts a decision record. Re-inserting a known id keeps the stored outcome.
    ///
    /// # Errors
    /// Returns an error if the record cannot be persisted.
    async fn upsert_decision(&self, record: PerformanceRecord) -> Result<()>;

    /// Attaches an outcome to the record with `id`, at most once.
    ///
    /// # Errors
    /// Returns an error if the updated record cannot be persisted.
    async fn record_outcome(&self, id: Uuid, outcome: Outcome) -> Result<OutcomeStatus>;

    /// # Errors
    /// Returns an error if storage cannot be read.
    async fn get(&self, id: Uuid) -> Result<Option<PerformanceRecord>>;

    /// Records matching `filter`, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage cannot be read.
    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<PerformanceRecord>>;
}

/// Attaches `outcome` to a record in `records`, returning the updated copy on success.
fn apply_outcome(
    records: &mut BTreeMap<Uuid, PerformanceRecord>,
    id: Uuid,
    outcome: Outcome,
) -> (OutcomeStatus, Option<PerformanceRecord>) {
    match records.get_mut(&id) {
        None => (OutcomeStatus::NotFound, None),
        Some(record) if record.outcome.is_some() => (OutcomeStatus::AlreadyRecorded, None),
        Some(record) => {
            record.attach_outcome(outcome);
            (OutcomeStatus::Recorded, Some(record.clone()))
        }
    }
}

fn merge_decision(records: &mut BTreeMap<Uuid, PerformanceRecord>, record: PerformanceRecord) -> PerformanceRecord {
    let merged = match records.get(&record.decision_id) {
        Some(existing) if existing.outcome.is_some() => existing.clone(),
        _ => record,
    };
    records.insert(merged.decision_id, merged.clone());
    merged
}

fn sorted(records: &BTreeMap<Uuid, PerformanceRecord>, filter: &RecordFilter) -> Vec<PerformanceRecord> {
    let mut matching: Vec<PerformanceRecord> = records
        .values()
        .filter(|record| filter.matches(record))
        .cloned()
        .collect();
    matching.sort_by_key(|record| (record.timestamp, record.decision_id));
    matching
}

/// In-process store, lost on exit.
#[derive(Default)]
pub struct MemoryLedgerStore {
    records: Mutex<BTreeMap<Uuid, PerformanceRecord>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn upsert_decision(&self, record: PerformanceRecord) -> Result<()> {
        merge_decision(&mut self.records.lock_ignore_poison(), record);
        Ok(())
    }

    async fn record_outcome(&self, id: Uuid, outcome: Outcome) -> Result<OutcomeStatus> {
        let (status, _) = apply_outcome(&mut self.records.lock_ignore_poison(), id, outcome);
        Ok(status)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PerformanceRecord>> {
        Ok(self.records.lock_ignore_poison().get(&id).cloned())
    }

    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<PerformanceRecord>> {
        Ok(sorted(&self.records.lock_ignore_poison(), filter))
    }
}

/// One JSON file per record in a directory, indexed in memory at open.
pub struct JsonLedgerStore {
    directory: PathBuf,
    index: Mutex<BTreeMap<Uuid, PerformanceRecord>>,
}

impl JsonLedgerStore {
    /// Opens (creating if needed) a store in `directory` and loads every record file.
    ///
    /// Unparseable files are skipped with a warning.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created or listed
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self> {
        let directory = directory.into();
        if !directory.exists() {
            std::fs::create_dir_all(&directory).map_err(|error| {
                RoutingError::Ledger(format!("Failed to create ledger directory: {error}"))
            })?;
        }

        let mut index = BTreeMap::new();
        let entries = std::fs::read_dir(&directory).map_err(|error| {
            RoutingError::Ledger(format!("Failed to read ledger directory: {error}"))
        })?;
        for entry in entries {
            let path = entry
                .map_err(|error| RoutingError::Ledger(format!("Failed to read directory entry: {error}")))?
                .path();
            if path.extension().and_then(|extension| extension.to_str()) != Some("json") {
                continue;
            }
            match load_record(&path) {
                Ok(record) => {
                    index.insert(record.decision_id, record);
                }
                Err(error) => warn!(path = %path.display(), %error, "skipping unreadable ledger record"),
            }
        }

        Ok(Self {
            directory,
            index: Mutex::new(index),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, id: Uuid) -> PathBuf {
        self.directory.join(format!("{id}.json"))
    }

    async fn persist(&self, record: &PerformanceRecord) -> Result<()> {
        let json = to_string_pretty(record)?;
        atomic_write(&self.record_path(record.decision_id), &json)
            .await
            .map_err(|error| RoutingError::Ledger(format!("Failed to write ledger record: {error}")))
    }
}

fn load_record(path: &Path) -> Result<PerformanceRecord> {
    let contents = std::fs::read_to_string(path)?;
    Ok(from_str(&contents)?)
}

/// Atomic write: write to a temp file unique to this call, then rename.
async fn atomic_write(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), Uuid::new_v4().simple()));
    tokio::fs::write(&tmp_path, content.as_bytes()).await?;
    if let Err(error) = tokio::fs::rename(&tmp_path, path).await {
        if let Err(cleanup) = tokio::fs::remove_file(&tmp_path).await {
            warn!(path = %tmp_path.display(), %cleanup, "failed to remove temp file");
        }
        return Err(error);
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for JsonLedgerStore {
    async fn upsert_decision(&self, record: PerformanceRecord) -> Result<()> {
        let merged = merge_decision(&mut self.index.lock_ignore_poison(), record);
        self.persist(&merged).await
    }

    async fn record_outcome(&self, id: Uuid, outcome: Outcome) -> Result<OutcomeStatus> {
        let (status, updated) = apply_outcome(&mut self.index.lock_ignore_poison(), id, outcome);
        if let Some(record) = updated
            && let Err(error) = self.persist(&record).await
        {
            if let Some(entry) = self.index.lock_ignore_poison().get_mut(&id) {
                entry.outcome = None;
                entry.outcome_at = None;
            }
            return Err(error);
        }
        Ok(status)
    }

    async fn get(&self, id: Uuid) -> Result<Option<PerformanceRecord>> {
        Ok(self.index.lock_ignore_poison().get(&id).cloned())
    }

    async fn scan(&self, filter: &RecordFilter) -> Result<Vec<PerformanceRecord>> {
        Ok(sorted(&self.index.lock_ignore_poison(), filter))
    }
}

/// Store whose every call fails, for exercising ledger outages.
#[cfg(test)]
pub(crate) struct UnavailableStore;

#[cfg(test)]
#[async_trait]
impl LedgerStore for UnavailableStore {
    async fn upsert_decision(&self, _record: PerformanceRecord) -> Result<()> {
        Err(RoutingError::Ledger("ledger offline".to_owned()))
    }

    async fn record_outcome(&self, _id: Uuid, _outcome: Outcome) -> Result<OutcomeStatus> {
        Err(RoutingError::Ledger("ledger offline".to_owned()))
    }

    async fn get(&self, _id: Uuid) -> Result<Option<PerformanceRecord>> {
        Err(RoutingError::Ledger("ledger offline".to_owned()))
    }

    async fn scan(&self, _filter: &RecordFilter) -> Result<Vec<PerformanceRecord>> {
        Err(RoutingError::Ledger("ledger offline".to_owned()))
    }
}
