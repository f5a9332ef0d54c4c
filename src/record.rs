//! Общая запись звонка и правила её обновления.
//!
//! Правила живут здесь, а не в конкретном хранилище, чтобы любое
//! хранилище применяло их одинаково.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::peer::types::{CandidatePayload, SessionDescription};

/// Сторона звонка: кто создал запись и кто к ней подключился
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Caller,
    Callee,
}

impl Role {
    pub fn remote(self) -> Role {
        match self {
            Role::Caller => Role::Callee,
            Role::Callee => Role::Caller,
        }
    }
}

/// Запись звонка в хранилище сигнализации
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub offer: Option<SessionDescription>,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
    #[serde(default)]
    pub offer_candidate: Option<CandidatePayload>,
    #[serde(default)]
    pub answer_candidate: Option<CandidatePayload>,
    #[serde(default)]
    pub offer_candidates: Vec<CandidatePayload>,
    #[serde(default)]
    pub answer_candidates: Vec<CandidatePayload>,
}

/// Частичное обновление записи. `None` означает "поле не трогаем".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordPatch {
    pub offer: Option<SessionDescription>,
    pub answer: Option<SessionDescription>,
    pub offer_candidate: Option<CandidatePayload>,
    pub answer_candidate: Option<CandidatePayload>,
    pub append_offer_candidates: Vec<CandidatePayload>,
    pub append_answer_candidates: Vec<CandidatePayload>,
}

impl RecordPatch {
    pub fn offer(desc: SessionDescription) -> Self {
        Self {
            offer: Some(desc),
            ..Default::default()
        }
    }

    pub fn answer(desc: SessionDescription) -> Self {
        Self {
            answer: Some(desc),
            ..Default::default()
        }
    }

    /// Заменяется только одиночное поле стороны `side`
    pub fn candidate_slot(side: Role, candidate: CandidatePayload) -> Self {
        match side {
            Role::Caller => Self {
                offer_candidate: Some(candidate),
                ..Default::default()
            },
            Role::Callee => Self {
                answer_candidate: Some(candidate),
                ..Default::default()
            },
        }
    }

    /// Дописывает в последовательность `side` и обновляет её одиночное поле,
    /// чтобы собеседник, читающий только поле, видел последний кандидат
    pub fn candidate_append(side: Role, candidate: CandidatePayload) -> Self {
        match side {
            Role::Caller => Self {
                offer_candidate: Some(candidate.clone()),
                append_offer_candidates: vec![candidate],
                ..Default::default()
            },
            Role::Callee => Self {
                answer_candidate: Some(candidate.clone()),
                append_answer_candidates: vec![candidate],
                ..Default::default()
            },
        }
    }
}

/// Итог применения патча к записи
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub changed: bool,
    pub ignored_offer: bool,
    pub ignored_answer: bool,
}

impl CallRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now(),
            offer: None,
            answer: None,
            offer_candidate: None,
            answer_candidate: None,
            offer_candidates: Vec::new(),
            answer_candidates: Vec::new(),
        }
    }

    /// Применяет патч. `offer` и `answer` пишутся один раз:
    /// повторная запись игнорируется и отмечается в результате.
    pub fn apply(&mut self, patch: RecordPatch) -> ApplyOutcome {
        let mut out = ApplyOutcome::default();

        if let Some(offer) = patch.offer {
            match &self.offer {
                None => {
                    self.offer = Some(offer);
                    out.changed = true;
                }
                Some(existing) if *existing == offer => {}
                Some(_) => {
                    warn!(call_id = %self.id, "offer already set, ignoring overwrite");
                    out.ignored_offer = true;
                }
            }
        }

        if let Some(answer) = patch.answer {
            match &self.answer {
                None => {
                    self.answer = Some(answer);
                    out.changed = true;
                }
                Some(existing) if *existing == answer => {}
                Some(_) => {
                    warn!(call_id = %self.id, "answer already set, ignoring overwrite");
                    out.ignored_answer = true;
                }
            }
        }

        if let Some(c) = patch.offer_candidate {
            out.changed |= self.offer_candidate.as_ref() != Some(&c);
            self.offer_candidate = Some(c);
        }
        if let Some(c) = patch.answer_candidate {
            out.changed |= self.answer_candidate.as_ref() != Some(&c);
            self.answer_candidate = Some(c);
        }

        if !patch.append_offer_candidates.is_empty() {
            self.offer_candidates.extend(patch.append_offer_candidates);
            out.changed = true;
        }
        if !patch.append_answer_candidates.is_empty() {
            self.answer_candidates.extend(patch.append_answer_candidates);
            out.changed = true;
        }

        out
    }

    /// Описание, опубликованное стороной `side`
    pub fn description(&self, side: Role) -> Option<&SessionDescription> {
        match side {
            Role::Caller => self.offer.as_ref(),
            Role::Callee => self.answer.as_ref(),
        }
    }

    pub fn candidate_slot(&self, side: Role) -> Option<&CandidatePayload> {
        match side {
            Role::Caller => self.offer_candidate.as_ref(),
            Role::Callee => self.answer_candidate.as_ref(),
        }
    }

    pub fn candidates(&self, side: Role) -> &[CandidatePayload] {
        match side {
            Role::Caller => &self.offer_candidates,
            Role::Callee => &self.answer_candidates,
        }
    }
}

/// Уведомление об изменении записи: `{previous, new}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    pub previous: Option<CallRecord>,
    pub new: CallRecord,
}
