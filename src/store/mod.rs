//! Хранилище сигнализации: запись звонка по id и подписка на её изменения.

pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::record::{CallRecord, RecordPatch, RecordUpdate};

pub use memory::MemoryStore;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("record {0} not found")]
    NotFound(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Контракт внешнего хранилища записей звонков
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Создаёт пустую запись и возвращает её идентификатор
    async fn create_record(&self) -> Result<String, StoreError>;

    async fn read_record(&self, id: &str) -> Result<CallRecord, StoreError>;

    /// Частичное обновление; возвращает запись после обновления
    async fn update_record(&self, id: &str, patch: RecordPatch) -> Result<CallRecord, StoreError>;

    /// Подписка на обновления одной записи
    async fn subscribe(&self, id: &str) -> Result<Subscription, StoreError>;
}

/// Поток уведомлений `{previous, new}` по одной записи.
/// Отписка происходит через `cancel()` или при drop.
#[derive(Debug)]
pub struct Subscription {
    call_id: String,
    rx: mpsc::UnboundedReceiver<RecordUpdate>,
    cancelled: bool,
}

impl Subscription {
    pub fn new(call_id: impl Into<String>, rx: mpsc::UnboundedReceiver<RecordUpdate>) -> Self {
        Self {
            call_id: call_id.into(),
            rx,
            cancelled: false,
        }
    }

    /// Следующее уведомление; `None` после отписки или закрытия хранилища
    pub async fn recv(&mut self) -> Option<RecordUpdate> {
        loop {
            if self.cancelled {
                return None;
            }
            let update = self.rx.recv().await?;
            // фильтр по id: хранилище может раздавать общий канал
            if update.new.id == self.call_id {
                return Some(update);
            }
            debug!(call_id = %self.call_id, other = %update.new.id, "dropping update for another call");
        }
    }

    pub fn cancel(&mut self) {
        if !self.cancelled {
            debug!(call_id = %self.call_id, "subscription cancelled");
            self.cancelled = true;
            self.rx.close();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}
