use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::peer::types::{CandidatePayload, ConnectionState, SessionDescription};

/// Узкий интерфейс к движку согласования медиа.
///
/// Кандидаты и состояния отдаются через каналы, созданные вместе с
/// движком, поэтому всё, что найдено до того, как сессия начала их
/// читать, остаётся в буфере канала.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()>;

    /// `Error::Negotiation`, если описание не разбирается
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()>;

    /// `Error::Negotiation` для битого кандидата или кандидата до remote description
    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<()>;

    async fn has_remote_description(&self) -> bool;

    async fn local_description(&self) -> Option<SessionDescription>;

    /// Поток локально найденных кандидатов; отдаётся один раз
    fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<CandidatePayload>>;

    /// Поток изменений состояния соединения; отдаётся один раз
    fn take_state_changes(&self) -> Option<mpsc::UnboundedReceiver<ConnectionState>>;

    async fn close(&self) -> Result<()>;

    /// Снимок выбранной ICE пары в лог; движки без статистики ничего не делают
    async fn dump_selected_pair(&self, _call_id: &str, _moment: &str) {}
}
