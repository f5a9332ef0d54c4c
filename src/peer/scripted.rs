//! Детерминированный движок без сети.
//!
//! Выдаёт синтетические SDP и кандидатов, запоминает все вызовы и
//! сообщает `Connected`, когда есть local + remote description и хотя бы
//! один принятый удалённый кандидат. Нужен для тестов и демонстраций
//! сигнализации без реального ICE.

use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::error::{Error, Result};
use crate::peer::facade::PeerConnection;
use crate::peer::types::{CandidatePayload, ConnectionState, SdpType, SessionDescription};

#[derive(Default)]
struct Inner {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_sets: usize,
    applied: Vec<CandidatePayload>,
    rejected: Vec<CandidatePayload>,
    state: Option<ConnectionState>,
    gathered: bool,
    closed: bool,
    dumps: Vec<(String, String)>,
}

pub struct ScriptedPeer {
    label: String,
    gather: Vec<CandidatePayload>,
    inner: Mutex<Inner>,
    cand_tx: mpsc::UnboundedSender<CandidatePayload>,
    state_tx: mpsc::UnboundedSender<ConnectionState>,
    cand_rx: StdMutex<Option<mpsc::UnboundedReceiver<CandidatePayload>>>,
    state_rx: StdMutex<Option<mpsc::UnboundedReceiver<ConnectionState>>>,
}

impl ScriptedPeer {
    /// Движок, который после `set_local_description` "находит" один host-кандидат
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let host = CandidatePayload::new(format!(
            "candidate:{label} 1 udp 2130706431 192.0.2.1 50000 typ host"
        ));
        Self::with_candidates(label, vec![host])
    }

    pub fn with_candidates(label: impl Into<String>, gather: Vec<CandidatePayload>) -> Self {
        let (cand_tx, cand_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        Self {
            label: label.into(),
            gather,
            inner: Mutex::new(Inner::default()),
            cand_tx,
            state_tx,
            cand_rx: StdMutex::new(Some(cand_rx)),
            state_rx: StdMutex::new(Some(state_rx)),
        }
    }

    /// Синтетический SDP с уникальной строкой fingerprint
    fn sdp(&self, kind: SdpType) -> String {
        let digest = hex::encode(self.label.as_bytes()).to_uppercase();
        format!(
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns={kind}\r\nt=0 0\r\na=fingerprint:sha-256 {digest}\r\n"
        )
    }

    /// Локальный кандидат, найденный позже (trickle)
    pub fn discover(&self, candidate: CandidatePayload) {
        let _ = self.cand_tx.send(candidate);
    }

    /// Сообщает сессии произвольное состояние соединения
    pub async fn emit_state(&self, state: ConnectionState) {
        self.inner.lock().await.state = Some(state);
        let _ = self.state_tx.send(state);
    }

    pub async fn remote_description_sets(&self) -> usize {
        self.inner.lock().await.remote_sets
    }

    pub async fn applied_candidates(&self) -> Vec<CandidatePayload> {
        self.inner.lock().await.applied.clone()
    }

    pub async fn rejected_candidates(&self) -> Vec<CandidatePayload> {
        self.inner.lock().await.rejected.clone()
    }

    pub async fn remote_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.remote.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Запросы снимка статистики: `(call_id, moment)`
    pub async fn stats_dumps(&self) -> Vec<(String, String)> {
        self.inner.lock().await.dumps.clone()
    }

    fn try_connect(&self, inner: &mut Inner) {
        let ready = inner.local.is_some() && inner.remote.is_some() && !inner.applied.is_empty();
        if ready && inner.state != Some(ConnectionState::Connected) {
            debug!(peer = %self.label, "scripted peer connected");
            inner.state = Some(ConnectionState::Connected);
            let _ = self.state_tx.send(ConnectionState::Connecting);
            let _ = self.state_tx.send(ConnectionState::Connected);
        }
    }
}

#[async_trait]
impl PeerConnection for ScriptedPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::offer(self.sdp(SdpType::Offer)))
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let inner = self.inner.lock().await;
        match &inner.remote {
            Some(remote) if remote.kind == SdpType::Offer => {
                Ok(SessionDescription::answer(self.sdp(SdpType::Answer)))
            }
            _ => Err(Error::Negotiation("create_answer without remote offer".into())),
        }
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        desc.ensure_well_formed()?;
        let mut inner = self.inner.lock().await;
        inner.local = Some(desc);
        if !inner.gathered {
            inner.gathered = true;
            for c in &self.gather {
                let _ = self.cand_tx.send(c.clone());
            }
        }
        self.try_connect(&mut inner);
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        desc.ensure_well_formed()?;
        if !desc.sdp.starts_with("v=0") {
            return Err(Error::Negotiation(format!("malformed {} sdp", desc.kind)));
        }
        let mut inner = self.inner.lock().await;
        if let Some(local) = &inner.local {
            if local.kind == desc.kind {
                return Err(Error::Negotiation(format!(
                    "remote {} while local is {}",
                    desc.kind, local.kind
                )));
            }
        }
        inner.remote = Some(desc);
        inner.remote_sets += 1;
        self.try_connect(&mut inner);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.remote.is_none() {
            inner.rejected.push(candidate);
            return Err(Error::Negotiation("remote description not set".into()));
        }
        if !candidate.candidate.starts_with("candidate:") {
            inner.rejected.push(candidate);
            return Err(Error::Negotiation("malformed candidate".into()));
        }
        inner.applied.push(candidate);
        self.try_connect(&mut inner);
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.inner.lock().await.remote.is_some()
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.inner.lock().await.local.clone()
    }

    fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<CandidatePayload>> {
        self.cand_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn take_state_changes(&self) -> Option<mpsc::UnboundedReceiver<ConnectionState>> {
        self.state_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if !inner.closed {
            inner.closed = true;
            inner.state = Some(ConnectionState::Closed);
            let _ = self.state_tx.send(ConnectionState::Closed);
        }
        Ok(())
    }

    async fn dump_selected_pair(&self, call_id: &str, moment: &str) {
        debug!(peer = %self.label, call_id, moment, "scripted peer has no stats");
        self.inner
            .lock()
            .await
            .dumps
            .push((call_id.to_string(), moment.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn candidates_are_buffered_until_taken() {
        let peer = ScriptedPeer::new("a");
        let offer = peer.create_offer().await.unwrap();
        peer.set_local_description(offer).await.unwrap();

        let mut rx = peer.take_local_candidates().unwrap();
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind(), Some("host"));
        assert!(peer.take_local_candidates().is_none());
    }

    #[tokio::test]
    async fn premature_candidate_is_rejected() {
        let peer = ScriptedPeer::new("a");
        let err = peer
            .add_ice_candidate(CandidatePayload::new("candidate:x 1 udp 1 192.0.2.9 1 typ host"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(peer.rejected_candidates().await.len(), 1);
    }

    #[tokio::test]
    async fn connects_after_descriptions_and_candidate() {
        let a = ScriptedPeer::new("a");
        let b = ScriptedPeer::new("b");
        let mut states = a.take_state_changes().unwrap();

        let offer = a.create_offer().await.unwrap();
        a.set_local_description(offer.clone()).await.unwrap();
        b.set_remote_description(offer).await.unwrap();
        let answer = b.create_answer().await.unwrap();
        a.set_remote_description(answer).await.unwrap();
        a.add_ice_candidate(CandidatePayload::new("candidate:b 1 udp 1 192.0.2.2 1 typ host"))
            .await
            .unwrap();

        assert_eq!(states.recv().await, Some(ConnectionState::Connecting));
        assert_eq!(states.recv().await, Some(ConnectionState::Connected));
    }

    #[tokio::test]
    async fn answer_requires_remote_offer() {
        let b = ScriptedPeer::new("b");
        assert!(b.create_answer().await.is_err());
    }
}
