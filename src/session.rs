//! Одна сторона двустороннего звонка.
//!
//! `CallSession` проводит обмен описаниями через запись звонка, после
//! чего одна фоновая задача обрабатывает все события сессии по очереди:
//! уведомления хранилища, локальные кандидаты, состояния движка, таймер
//! grace period и сигнал остановки.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::logger::analyze_candidates;
use crate::peer::facade::PeerConnection;
use crate::peer::fingerprint::short_auth_string;
use crate::peer::types::{CandidatePayload, ConnectionState, SdpType, SessionDescription};
use crate::record::{CallRecord, RecordPatch, Role};
use crate::relay::{CandidateMode, CandidateRelay};
use crate::store::{SignalingStore, StoreError, Subscription};

/// Состояние сессии.
///
/// `Idle → DescriptionExchanged → Connected | Failed`, `Closed` из любого.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    DescriptionExchanged,
    Connected,
    Failed,
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, DescriptionExchanged)
                | (Idle, Failed)
                | (DescriptionExchanged, Connected)
                | (DescriptionExchanged, Failed)
                | (Connected, Failed)
                | (Idle | DescriptionExchanged | Connected | Failed, Closed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub candidate_mode: CandidateMode,
    pub grace_period: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions::from(&Config::default())
    }
}

impl From<&Config> for SessionOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            candidate_mode: cfg.candidate_mode,
            grace_period: cfg.grace_period(),
        }
    }
}

/// Общее между сессией и её фоновой задачей
struct Shared {
    state: watch::Sender<SessionState>,
    remote: Mutex<Option<SessionDescription>>,
}

impl Shared {
    fn transition(&self, call_id: &str, next: SessionState) -> bool {
        self.state.send_if_modified(|cur| {
            if *cur == next {
                return false;
            }
            if !cur.can_transition_to(next) {
                warn!(call_id, from = ?*cur, to = ?next, "rejected session transition");
                return false;
            }
            info!(call_id, from = ?*cur, to = ?next, "session state changed");
            *cur = next;
            true
        })
    }

    fn current(&self) -> SessionState {
        *self.state.borrow()
    }
}

pub struct CallSession {
    store: Arc<dyn SignalingStore>,
    pc: Arc<dyn PeerConnection>,
    options: SessionOptions,
    shared: Arc<Shared>,
    call_id: Option<String>,
    role: Option<Role>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl CallSession {
    /// Сессия в состоянии `Idle`. Движок принадлежит только ей.
    pub fn new(
        store: Arc<dyn SignalingStore>,
        pc: Arc<dyn PeerConnection>,
        options: SessionOptions,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            store,
            pc,
            options,
            shared: Arc::new(Shared {
                state,
                remote: Mutex::new(None),
            }),
            call_id: None,
            role: None,
            shutdown: None,
            task: None,
        }
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.shared.current()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Ждёт `target` или терминального состояния, что наступит раньше
    pub async fn wait_for(&self, target: SessionState, timeout: Duration) -> Result<SessionState> {
        let mut rx = self.watch_state();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|s| *s == target || s.is_terminal())
                .await
                .map(|s| *s)
        })
        .await;
        match waited {
            Ok(Ok(state)) => Ok(state),
            // sender живёт в self, закрыться не может
            Ok(Err(_)) => Ok(self.state()),
            Err(_) => Err(Error::Timeout(target)),
        }
    }

    /// Строка для сверки собеседниками, когда известны оба описания
    pub async fn fingerprint(&self) -> Option<String> {
        let local = self.pc.local_description().await?;
        let remote = self.shared.remote.lock().await.clone()?;
        short_auth_string(&local, &remote)
    }

    /// Сторона A: создаёт запись, публикует offer и ждёт answer
    pub async fn start_call(&mut self) -> Result<String> {
        self.ensure_idle("start_call")?;
        self.role = Some(Role::Caller);

        let call_id = self.store.create_record().await.map_err(|e| self.fail(e.into()))?;
        info!(call_id = %call_id, "call record created");
        self.call_id = Some(call_id.clone());

        let (candidates, states) = self.take_engine_streams()?;

        debug!(call_id = %call_id, "Creating offer...");
        let offer = self.pc.create_offer().await.map_err(|e| self.fail(e))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| self.fail(e))?;

        self.store
            .update_record(&call_id, RecordPatch::offer(offer))
            .await
            .map_err(|e| self.fail(e.into()))?;
        info!(call_id = %call_id, "offer published");

        let subscription = self.store.subscribe(&call_id).await.map_err(|e| self.fail(e.into()))?;
        self.shared.transition(&call_id, SessionState::DescriptionExchanged);

        let snapshot = self.catch_up(&call_id).await;
        self.spawn_driver(call_id.clone(), Role::Caller, subscription, candidates, states, snapshot);
        Ok(call_id)
    }

    /// Сторона B: читает offer из записи, публикует answer
    pub async fn join_call(&mut self, call_id: &str) -> Result<()> {
        self.ensure_idle("join_call")?;

        let record = match self.store.read_record(call_id).await {
            Ok(r) => r,
            // звонка нет: сессия так и не началась
            Err(StoreError::NotFound(id)) => return Err(Error::CallNotFound(id)),
            Err(e) => return Err(self.fail(e.into())),
        };
        self.role = Some(Role::Callee);
        self.call_id = Some(call_id.to_string());

        let (candidates, states) = self.take_engine_streams()?;

        let offer = match record.description(Role::Caller).cloned() {
            Some(offer) if offer.kind == SdpType::Offer => offer,
            Some(other) => {
                return Err(self.fail(Error::Negotiation(format!(
                    "call {call_id} carries a {} in the offer field",
                    other.kind
                ))))
            }
            None => {
                return Err(self.fail(Error::Negotiation(format!(
                    "call {call_id} has no offer yet"
                ))))
            }
        };

        debug!(call_id, "Setting remote description (offer)...");
        self.pc
            .set_remote_description(offer.clone())
            .await
            .map_err(|e| self.fail(e))?;
        *self.shared.remote.lock().await = Some(offer);

        debug!(call_id, "Creating answer...");
        let answer = self.pc.create_answer().await.map_err(|e| self.fail(e))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| self.fail(e))?;

        let stored = self
            .store
            .update_record(call_id, RecordPatch::answer(answer.clone()))
            .await
            .map_err(|e| self.fail(e.into()))?;
        if stored.description(Role::Callee) != Some(&answer) {
            return Err(self.fail(Error::Negotiation(format!("call {call_id} already answered"))));
        }
        info!(call_id, "answer published");

        let subscription = self.store.subscribe(call_id).await.map_err(|e| self.fail(e.into()))?;
        self.shared.transition(call_id, SessionState::DescriptionExchanged);

        let snapshot = self.catch_up(call_id).await.or(Some(stored));
        self.spawn_driver(call_id.to_string(), Role::Callee, subscription, candidates, states, snapshot);
        Ok(())
    }

    /// Отписка, остановка задачи и освобождение движка.
    /// Запись в хранилище не трогается.
    pub async fn close(&mut self) -> Result<()> {
        if self.state() == SessionState::Closed {
            return Ok(());
        }
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!("session task ended abnormally: {e}");
            }
        }
        if let Err(e) = self.pc.close().await {
            warn!("Failed to close peer connection: {e}");
        }
        let id = self.call_id.clone().unwrap_or_default();
        self.shared.transition(&id, SessionState::Closed);
        Ok(())
    }

    fn ensure_idle(&self, op: &'static str) -> Result<()> {
        let state = self.state();
        if state != SessionState::Idle || self.role.is_some() {
            return Err(Error::InvalidState {
                state,
                reason: op,
            });
        }
        Ok(())
    }

    fn fail(&self, e: Error) -> Error {
        let id = self.call_id.as_deref().unwrap_or("-");
        error!(call_id = id, "session failed: {e}");
        self.shared.transition(id, SessionState::Failed);
        e
    }

    #[allow(clippy::type_complexity)]
    fn take_engine_streams(
        &self,
    ) -> Result<(
        mpsc::UnboundedReceiver<CandidatePayload>,
        mpsc::UnboundedReceiver<ConnectionState>,
    )> {
        match (self.pc.take_local_candidates(), self.pc.take_state_changes()) {
            (Some(c), Some(s)) => Ok((c, s)),
            _ => Err(self.fail(Error::InvalidState {
                state: self.state(),
                reason: "peer connection already owned by another session",
            })),
        }
    }

    /// Одно чтение после подписки: то, что записали между публикацией
    /// описания и подпиской, иначе потерялось бы
    async fn catch_up(&self, call_id: &str) -> Option<CallRecord> {
        match self.store.read_record(call_id).await {
            Ok(rec) => Some(rec),
            Err(e) => {
                warn!(call_id, "catch-up read failed: {e}");
                None
            }
        }
    }

    fn spawn_driver(
        &mut self,
        call_id: String,
        role: Role,
        subscription: Subscription,
        candidates: mpsc::UnboundedReceiver<CandidatePayload>,
        states: mpsc::UnboundedReceiver<ConnectionState>,
        snapshot: Option<CallRecord>,
    ) {
        let (tx, rx) = oneshot::channel();
        let driver = Driver {
            relay: CandidateRelay::new(
                call_id.clone(),
                role,
                self.options.candidate_mode,
                self.store.clone(),
            ),
            call_id,
            role,
            pc: self.pc.clone(),
            shared: self.shared.clone(),
            grace_period: self.options.grace_period,
            remote_applied: role == Role::Callee,
            engine_state: ConnectionState::New,
        };
        self.shutdown = Some(tx);
        self.task = Some(tokio::spawn(driver.run(subscription, candidates, states, snapshot, rx)));
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

/// Фоновая часть сессии; владеет relay и всем изменяемым состоянием
struct Driver {
    call_id: String,
    role: Role,
    pc: Arc<dyn PeerConnection>,
    shared: Arc<Shared>,
    relay: CandidateRelay,
    grace_period: Duration,
    remote_applied: bool,
    engine_state: ConnectionState,
}

impl Driver {
    async fn run(
        mut self,
        mut subscription: Subscription,
        mut candidates: mpsc::UnboundedReceiver<CandidatePayload>,
        mut states: mpsc::UnboundedReceiver<ConnectionState>,
        snapshot: Option<CallRecord>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        if let Some(rec) = snapshot {
            if let Flow::Stop = self.on_record(&rec).await {
                subscription.cancel();
                return;
            }
        }

        let grace = sleep(Duration::ZERO);
        tokio::pin!(grace);
        let mut grace_armed = false;
        let mut updates_open = true;
        let mut candidates_open = true;
        let mut states_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    debug!(call_id = %self.call_id, "session shutdown requested");
                    break;
                }
                update = subscription.recv(), if updates_open => match update {
                    Some(update) => {
                        if let Flow::Stop = self.on_record(&update.new).await {
                            break;
                        }
                    }
                    None => {
                        warn!(call_id = %self.call_id, "update stream ended");
                        updates_open = false;
                    }
                },
                cand = candidates.recv(), if candidates_open => match cand {
                    Some(c) => {
                        self.relay.publish(c).await;
                    }
                    None => candidates_open = false,
                },
                st = states.recv(), if states_open => match st {
                    Some(st) => {
                        self.engine_state = st;
                        match st {
                            ConnectionState::Connected => {
                                grace_armed = false;
                                self.shared.transition(&self.call_id, SessionState::Connected);
                                analyze_candidates(self.relay.published());
                            }
                            ConnectionState::Disconnected => {
                                self.pc.dump_selected_pair(&self.call_id, "DISCONNECTED").await;
                                if !grace_armed && self.shared.current() == SessionState::Connected {
                                    warn!(
                                        call_id = %self.call_id,
                                        "connection lost, waiting {} s for recovery",
                                        self.grace_period.as_secs()
                                    );
                                    grace.as_mut().reset(Instant::now() + self.grace_period);
                                    grace_armed = true;
                                }
                            }
                            ConnectionState::Failed => {
                                error!(call_id = %self.call_id, "peer connection failed");
                                self.pc.dump_selected_pair(&self.call_id, "FAILED").await;
                                self.shared.transition(&self.call_id, SessionState::Failed);
                                break;
                            }
                            ConnectionState::Closed => {
                                info!(call_id = %self.call_id, "peer connection closed by engine");
                                self.shared.transition(&self.call_id, SessionState::Closed);
                                break;
                            }
                            ConnectionState::New | ConnectionState::Connecting => {
                                debug!(call_id = %self.call_id, "peer connection state: {:?}", st);
                            }
                        }
                    }
                    None => states_open = false,
                },
                () = &mut grace, if grace_armed => {
                    grace_armed = false;
                    if self.engine_state != ConnectionState::Connected {
                        error!(call_id = %self.call_id, "connection did not recover within grace period");
                        self.shared.transition(&self.call_id, SessionState::Failed);
                        break;
                    }
                }
            }
        }

        subscription.cancel();
        info!(
            call_id = %self.call_id,
            published = self.relay.published().len(),
            publish_failures = self.relay.publish_failures(),
            applied = self.relay.applied(),
            pending = self.relay.pending(),
            "session driver stopped"
        );
    }

    async fn on_record(&mut self, record: &CallRecord) -> Flow {
        if self.role == Role::Caller && !self.remote_applied {
            if let Some(answer) = record.description(Role::Callee) {
                if answer.kind != SdpType::Answer {
                    error!(call_id = %self.call_id, kind = %answer.kind, "answer field holds wrong description type");
                    self.shared.transition(&self.call_id, SessionState::Failed);
                    return Flow::Stop;
                }
                debug!(call_id = %self.call_id, "Setting remote description (answer)...");
                if let Err(e) = self.pc.set_remote_description(answer.clone()).await {
                    error!(call_id = %self.call_id, "Failed to set remote description: {e}");
                    self.shared.transition(&self.call_id, SessionState::Failed);
                    return Flow::Stop;
                }
                self.remote_applied = true;
                *self.shared.remote.lock().await = Some(answer.clone());
                info!(call_id = %self.call_id, "answer applied");

                let flushed = self.relay.flush_pending(self.pc.as_ref()).await;
                if flushed > 0 {
                    debug!(call_id = %self.call_id, flushed, "pending candidates applied");
                }
            }
        }

        self.relay.on_update(self.pc.as_ref(), record).await;
        Flow::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::scripted::ScriptedPeer;
    use crate::store::MemoryStore;

    const WAIT: Duration = Duration::from_secs(5);

    #[test]
    fn transitions_are_guarded() {
        use SessionState::*;
        assert!(Idle.can_transition_to(DescriptionExchanged));
        assert!(DescriptionExchanged.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Closed));
        assert!(!Connected.can_transition_to(DescriptionExchanged));
        assert!(!Idle.can_transition_to(Connected));
        assert!(!Closed.can_transition_to(Idle));
        assert!(!Failed.can_transition_to(Connected));
    }

    #[tokio::test]
    async fn start_call_publishes_offer() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store.clone(), pc.clone(), SessionOptions::default());

        let id = session.start_call().await.unwrap();
        assert_eq!(session.state(), SessionState::DescriptionExchanged);
        assert_eq!(session.role(), Some(Role::Caller));

        let rec = store.read_record(&id).await.unwrap();
        let offer = rec.offer.unwrap();
        assert_eq!(offer.kind, SdpType::Offer);
        assert!(offer.sdp.starts_with("v=0"));
        assert!(rec.answer.is_none());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn start_call_on_offline_store_fails() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store, pc, SessionOptions::default());

        let err = session.start_call().await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn join_unknown_call_never_starts() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("callee"));
        let mut session = CallSession::new(store, pc, SessionOptions::default());

        let err = session.join_call("missing").await.unwrap_err();
        assert!(matches!(err, Error::CallNotFound(id) if id == "missing"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn join_before_offer_fails() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create_record().await.unwrap();
        let pc = Arc::new(ScriptedPeer::new("callee"));
        let mut session = CallSession::new(store.clone(), pc.clone(), SessionOptions::default());

        let err = session.join_call(&id).await.unwrap_err();
        assert!(matches!(err, Error::Negotiation(_)));
        assert_eq!(session.state(), SessionState::Failed);
        assert!(store.read_record(&id).await.unwrap().answer.is_none());
    }

    #[tokio::test]
    async fn malformed_offer_fails_join() {
        let store = Arc::new(MemoryStore::new());
        let id = store.create_record().await.unwrap();
        store
            .update_record(&id, RecordPatch::offer(SessionDescription::offer("garbage")))
            .await
            .unwrap();
        let pc = Arc::new(ScriptedPeer::new("callee"));
        let mut session = CallSession::new(store, pc, SessionOptions::default());

        assert!(matches!(session.join_call(&id).await, Err(Error::Negotiation(_))));
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn session_cannot_start_twice() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store, pc, SessionOptions::default());
        session.start_call().await.unwrap();

        let err = session.start_call().await.unwrap_err();
        assert!(matches!(err, Error::InvalidState { .. }));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn answer_is_applied_once() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store.clone(), pc.clone(), SessionOptions::default());
        let id = session.start_call().await.unwrap();

        let answer = SessionDescription::answer("v=0\r\ns=answer\r\n");
        for _ in 0..4 {
            store
                .update_record(&id, RecordPatch::answer(answer.clone()))
                .await
                .unwrap();
        }
        // ещё одно обновление как маркер того, что всё предыдущее обработано
        let marker = CandidatePayload::new("candidate:m 1 udp 1 192.0.2.77 1 typ host");
        store
            .update_record(&id, RecordPatch::candidate_append(Role::Callee, marker.clone()))
            .await
            .unwrap();
        wait_applied(&pc, &marker).await;

        assert_eq!(pc.remote_description_sets().await, 1);
        assert_eq!(pc.remote_description().await, Some(answer));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn close_stops_processing() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store.clone(), pc.clone(), SessionOptions::default());
        let id = session.start_call().await.unwrap();

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(pc.is_closed().await);
        assert_eq!(store.subscriber_count(&id).await, 0);

        store
            .update_record(&id, RecordPatch::answer(SessionDescription::answer("v=0\r\n")))
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(pc.remote_description_sets().await, 0);

        // повторный close ничего не делает
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn engine_failure_fails_session() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store, pc.clone(), SessionOptions::default());
        let id = session.start_call().await.unwrap();

        pc.emit_state(ConnectionState::Failed).await;
        let state = session.wait_for(SessionState::Failed, WAIT).await.unwrap();
        assert_eq!(state, SessionState::Failed);
        assert_eq!(pc.stats_dumps().await, vec![(id, "FAILED".to_string())]);

        session.close().await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_without_recovery_fails_after_grace() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let options = SessionOptions {
            grace_period: Duration::from_secs(10),
            ..SessionOptions::default()
        };
        let mut session = CallSession::new(store, pc.clone(), options);
        session.start_call().await.unwrap();

        pc.emit_state(ConnectionState::Connected).await;
        session.wait_for(SessionState::Connected, WAIT).await.unwrap();

        pc.emit_state(ConnectionState::Disconnected).await;
        let state = session.wait_for(SessionState::Failed, Duration::from_secs(30)).await.unwrap();
        assert_eq!(state, SessionState::Failed);
        session.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_within_grace_keeps_session_connected() {
        let store = Arc::new(MemoryStore::new());
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let mut session = CallSession::new(store, pc.clone(), SessionOptions::default());
        session.start_call().await.unwrap();

        pc.emit_state(ConnectionState::Connected).await;
        session.wait_for(SessionState::Connected, WAIT).await.unwrap();

        pc.emit_state(ConnectionState::Disconnected).await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        pc.emit_state(ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_secs(20)).await;

        assert_eq!(session.state(), SessionState::Connected);
        session.close().await.unwrap();
    }

    /// Хранилище, где записи собеседника попадают между подпиской и
    /// контрольным чтением: снимок оказывается новее очереди уведомлений
    struct RacingStore {
        inner: MemoryStore,
        on_read: Mutex<Vec<RecordPatch>>,
    }

    #[async_trait::async_trait]
    impl SignalingStore for RacingStore {
        async fn create_record(&self) -> std::result::Result<String, StoreError> {
            self.inner.create_record().await
        }

        async fn read_record(&self, id: &str) -> std::result::Result<CallRecord, StoreError> {
            let writes = std::mem::take(&mut *self.on_read.lock().await);
            for patch in writes {
                self.inner.update_record(id, patch).await?;
            }
            self.inner.read_record(id).await
        }

        async fn update_record(
            &self,
            id: &str,
            patch: RecordPatch,
        ) -> std::result::Result<CallRecord, StoreError> {
            self.inner.update_record(id, patch).await
        }

        async fn subscribe(&self, id: &str) -> std::result::Result<Subscription, StoreError> {
            self.inner.subscribe(id).await
        }
    }

    #[tokio::test]
    async fn catch_up_snapshot_does_not_reapply_slot_candidate() {
        let x = CandidatePayload::new("candidate:x 1 udp 1 192.0.2.10 1 typ host");
        let y = CandidatePayload::new("candidate:y 1 udp 1 192.0.2.11 1 typ host");
        let store = Arc::new(RacingStore {
            inner: MemoryStore::new(),
            on_read: Mutex::new(vec![
                RecordPatch::answer(SessionDescription::answer("v=0\r\ns=answer\r\n")),
                RecordPatch::candidate_slot(Role::Callee, x.clone()),
                RecordPatch::candidate_slot(Role::Callee, y.clone()),
            ]),
        });
        let pc = Arc::new(ScriptedPeer::new("caller"));
        let options = SessionOptions {
            candidate_mode: CandidateMode::SingleSlot,
            ..SessionOptions::default()
        };
        let mut session = CallSession::new(store.clone(), pc.clone(), options);
        let id = session.start_call().await.unwrap();

        let marker = CandidatePayload::new("candidate:z 1 udp 1 192.0.2.12 1 typ host");
        store
            .update_record(&id, RecordPatch::candidate_slot(Role::Callee, marker.clone()))
            .await
            .unwrap();
        wait_applied(&pc, &marker).await;

        // снимок даёт y, очередь потом x и y ещё раз
        assert_eq!(pc.applied_candidates().await, vec![y, x, marker]);
        assert_eq!(pc.remote_description_sets().await, 1);
        session.close().await.unwrap();
    }

    async fn wait_applied(pc: &ScriptedPeer, candidate: &CandidatePayload) {
        for _ in 0..500 {
            if pc.applied_candidates().await.contains(candidate) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("candidate was never applied");
    }
}
