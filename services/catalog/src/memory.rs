//! In-process implementations of the catalog seams for tests and local runs.

use crate::catalog_store::{CatalogStore, PutOutcome};
use crate::error::{CatalogError, MailError, ObjectStoreError};
use crate::mailer::{Mailer, Notice};
use crate::model::{ChangeEvent, ChangeKind, ImageRecord};
use crate::object_store::ObjectStore;
use crate::update_builder::UpdateStatement;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{broadcast, Mutex};

/// In-memory catalog that emits change events after every committed write
pub struct MemoryCatalogStore {
    records: Mutex<BTreeMap<String, ImageRecord>>,
    changes: broadcast::Sender<ChangeEvent>,
    failures_remaining: AtomicUsize,
}

impl Default for MemoryCatalogStore {
    fn default() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            records: Mutex::new(BTreeMap::new()),
            changes,
            failures_remaining: AtomicUsize::new(0),
        }
    }
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receive change events committed after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.changes.subscribe()
    }

    /// Make the next `count` operations fail as if the store were unreachable
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    pub async fn ids(&self) -> Vec<String> {
        self.records.lock().await.keys().cloned().collect()
    }

    /// Insert a record directly, without emitting a change event
    pub async fn seed(&self, record: ImageRecord) {
        self.records.lock().await.insert(record.id.clone(), record);
    }

    fn check_available(&self) -> Result<(), CatalogError> {
        let injected = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if injected {
            Err(CatalogError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }

    fn emit(&self, kind: ChangeKind, id: &str) {
        let _ = self.changes.send(ChangeEvent::new(kind, id));
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn put_if_absent(&self, id: &str) -> Result<PutOutcome, CatalogError> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        if records.contains_key(id) {
            return Ok(PutOutcome::AlreadyCataloged);
        }
        records.insert(id.to_string(), ImageRecord::new(id));
        drop(records);

        self.emit(ChangeKind::Insert, id);
        Ok(PutOutcome::Created)
    }

    async fn apply_update(&self, statement: &UpdateStatement) -> Result<(), CatalogError> {
        self.check_available()?;
        let mut records = self.records.lock().await;

        let record = records
            .get_mut(statement.key())
            .ok_or_else(|| CatalogError::NotFound(statement.key().to_string()))?;

        for assignment in statement.assignments() {
            let value = Some(assignment.value.clone());
            match assignment.field {
                "caption" => record.caption = value,
                "date" => record.captured_date = value,
                "photographer" => record.photographer = value,
                other => {
                    return Err(CatalogError::Unavailable(format!("unknown column {}", other)))
                }
            }
        }
        drop(records);

        self.emit(ChangeKind::Update, statement.key());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, CatalogError> {
        self.check_available()?;
        let removed = self.records.lock().await.remove(id).is_some();

        if removed {
            self.emit(ChangeKind::Delete, id);
        }
        Ok(removed)
    }

    async fn get(&self, id: &str) -> Result<Option<ImageRecord>, CatalogError> {
        self.check_available()?;
        Ok(self.records.lock().await.get(id).cloned())
    }
}

/// In-memory object store holding `(bucket, key)` pairs
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<BTreeSet<(String, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, bucket: &str, key: &str) {
        self.objects
            .lock()
            .await
            .insert((bucket.to_string(), key.to_string()));
    }

    pub async fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock()
            .await
            .contains(&(bucket.to_string(), key.to_string()))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), ObjectStoreError> {
        self.objects
            .lock()
            .await
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Mailer that records every notice it is asked to send
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<Notice>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following send fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<Notice> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, notice: &Notice) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Transport("mail relay unavailable".to_string()));
        }
        self.sent.lock().await.push(notice.clone());
        Ok(())
    }
}
