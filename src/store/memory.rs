use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::{SignalingStore, StoreError, Subscription};
use crate::record::{CallRecord, RecordPatch, RecordUpdate};
use crate::utils::random_id;

struct Entry {
    record: CallRecord,
    subscribers: Vec<mpsc::UnboundedSender<RecordUpdate>>,
}

/// Хранилище в памяти процесса.
///
/// Каждое успешное обновление рассылается всем подписчикам записи,
/// даже если значения полей не поменялись (как делает hosted-таблица).
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    offline: AtomicBool,
    updates: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Имитирует недоступность транспорта: все операции вернут `Unavailable`
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::SeqCst);
    }

    /// Сколько обновлений было принято с момента создания
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub async fn subscriber_count(&self, id: &str) -> usize {
        let entries = self.entries.lock().await;
        entries
            .get(id)
            .map(|e| e.subscribers.iter().filter(|s| !s.is_closed()).count())
            .unwrap_or(0)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_record(&self) -> Result<String, StoreError> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let mut id = random_id();
        while entries.contains_key(&id) {
            id = random_id();
        }
        entries.insert(
            id.clone(),
            Entry {
                record: CallRecord::new(id.clone()),
                subscribers: Vec::new(),
            },
        );
        debug!(call_id = %id, "call record created");
        Ok(id)
    }

    async fn read_record(&self, id: &str) -> Result<CallRecord, StoreError> {
        self.check_online()?;
        let entries = self.entries.lock().await;
        entries
            .get(id)
            .map(|e| e.record.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update_record(&self, id: &str, patch: RecordPatch) -> Result<CallRecord, StoreError> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        let previous = entry.record.clone();
        let outcome = entry.record.apply(patch);
        if outcome.ignored_offer || outcome.ignored_answer {
            warn!(call_id = %id, ?outcome, "write-once field rejected");
        }
        self.updates.fetch_add(1, Ordering::SeqCst);

        let update = RecordUpdate {
            previous: Some(previous),
            new: entry.record.clone(),
        };
        entry
            .subscribers
            .retain(|tx| tx.send(update.clone()).is_ok());

        Ok(entry.record.clone())
    }

    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError> {
        self.check_online()?;
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        entry.subscribers.push(tx);
        debug!(call_id = %id, subscribers = entry.subscribers.len(), "subscribed to call record");
        Ok(Subscription::new(id, rx))
    }
}
