//! Пересылка ICE кандидатов между движком и записью звонка.
//!
//! Локальные кандидаты пишутся в поля своей стороны. Удалённые
//! вычитываются из каждого уведомления, повторы отбрасываются, а до
//! установки remote description кандидаты копятся в очереди.
//!
//! Уведомления могут прийти позже снимка записи, поэтому повтором
//! считается любой уже встречавшийся кандидат, а не только последний.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Error;
use crate::logger::dump_candidate;
use crate::peer::facade::PeerConnection;
use crate::peer::types::CandidatePayload;
use crate::record::{CallRecord, RecordPatch, Role};
use crate::store::SignalingStore;

/// Как кандидаты лежат в записи
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateMode {
    /// Одно поле на сторону, каждая запись заменяет предыдущую.
    /// Промежуточные кандидаты могут потеряться.
    SingleSlot,
    /// Дописываемая последовательность плюс обновление одиночного поля
    #[default]
    Sequence,
}

impl FromStr for CandidateMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "single_slot" | "single-slot" | "slot" => Ok(CandidateMode::SingleSlot),
            "sequence" | "seq" => Ok(CandidateMode::Sequence),
            other => Err(Error::Config(format!("unknown candidate mode '{other}'"))),
        }
    }
}

pub struct CandidateRelay {
    call_id: String,
    side: Role,
    mode: CandidateMode,
    store: Arc<dyn SignalingStore>,
    published: Vec<CandidatePayload>,
    publish_failures: usize,
    // удалённая сторона
    seen: HashSet<CandidatePayload>,
    cursor: usize,
    pending: Vec<CandidatePayload>,
    applied: usize,
}

impl CandidateRelay {
    /// `side` это своя роль: публикуем в её поля, читаем из полей собеседника
    pub fn new(
        call_id: impl Into<String>,
        side: Role,
        mode: CandidateMode,
        store: Arc<dyn SignalingStore>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            side,
            mode,
            store,
            published: Vec::new(),
            publish_failures: 0,
            seen: HashSet::new(),
            cursor: 0,
            pending: Vec::new(),
            applied: 0,
        }
    }

    /// Публикует локальный кандидат. Ошибка хранилища не фатальна.
    pub async fn publish(&mut self, candidate: CandidatePayload) -> bool {
        dump_candidate("LOCAL", &self.call_id, &candidate);
        let patch = match self.mode {
            CandidateMode::SingleSlot => RecordPatch::candidate_slot(self.side, candidate.clone()),
            CandidateMode::Sequence => RecordPatch::candidate_append(self.side, candidate.clone()),
        };
        match self.store.update_record(&self.call_id, patch).await {
            Ok(_) => {
                self.published.push(candidate);
                true
            }
            Err(e) => {
                self.publish_failures += 1;
                warn!(call_id = %self.call_id, "Failed to publish local candidate: {e}");
                false
            }
        }
    }

    /// Новые удалённые кандидаты из очередного состояния записи
    pub fn ingest(&mut self, record: &CallRecord) -> Vec<CandidatePayload> {
        let remote = self.side.remote();

        if self.mode == CandidateMode::Sequence {
            let seq = record.candidates(remote);
            if seq.len() < self.cursor {
                // последовательность только растёт: это уведомление старше прочитанного
                debug!(
                    call_id = %self.call_id,
                    cursor = self.cursor,
                    len = seq.len(),
                    "Stale remote candidate sequence, skipping"
                );
                return Vec::new();
            }
            if !seq.is_empty() {
                let fresh = seq[self.cursor..]
                    .iter()
                    .filter(|c| self.seen.insert((*c).clone()))
                    .cloned()
                    .collect();
                self.cursor = seq.len();
                return fresh;
            }
            // пустая последовательность: собеседник пишет только в слот
        }

        match record.candidate_slot(remote) {
            Some(c) if self.seen.insert(c.clone()) => vec![c.clone()],
            _ => Vec::new(),
        }
    }

    /// Применяет кандидатов сразу или ставит в очередь до remote description
    pub async fn deliver(&mut self, pc: &dyn PeerConnection, fresh: Vec<CandidatePayload>) {
        if fresh.is_empty() {
            return;
        }
        if !pc.has_remote_description().await {
            debug!(
                call_id = %self.call_id,
                count = fresh.len(),
                "Remote description not set yet, queuing candidate"
            );
            self.pending.extend(fresh);
            return;
        }
        for candidate in fresh {
            self.apply_one(pc, candidate).await;
        }
    }

    /// Применяет все отложенные кандидаты после установки remote description
    pub async fn flush_pending(&mut self, pc: &dyn PeerConnection) -> usize {
        let pending = std::mem::take(&mut self.pending);
        let count = pending.len();
        for candidate in pending {
            debug!(call_id = %self.call_id, "Applying pending candidate");
            self.apply_one(pc, candidate).await;
        }
        count
    }

    pub async fn on_update(&mut self, pc: &dyn PeerConnection, record: &CallRecord) {
        let fresh = self.ingest(record);
        self.deliver(pc, fresh).await;
    }

    async fn apply_one(&mut self, pc: &dyn PeerConnection, candidate: CandidatePayload) {
        dump_candidate("REMOTE", &self.call_id, &candidate);
        match pc.add_ice_candidate(candidate).await {
            Ok(()) => self.applied += 1,
            // кандидат best-effort: сессия может соединиться и без него
            Err(e) => warn!(call_id = %self.call_id, "Failed to add remote candidate: {e}"),
        }
    }

    pub fn published(&self) -> &[CandidatePayload] {
        &self.published
    }

    pub fn publish_failures(&self) -> usize {
        self.publish_failures
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn applied(&self) -> usize {
        self.applied
    }
}
