//! Сигнализация двустороннего WebRTC звонка через общую запись в хранилище.
//!
//! Звонящий создаёт запись и публикует offer, собеседник читает её по id
//! и публикует answer, после чего обе стороны обмениваются ICE
//! кандидатами через поля записи, пока движок не сообщит `Connected`.
//!
//! ```no_run
//! use std::sync::Arc;
//! use peercall::{CallSession, Config, MemoryStore, Role, SessionOptions, SessionState, WebRtcPeer};
//!
//! # async fn demo() -> peercall::Result<()> {
//! let cfg = Config::from_env()?;
//! peercall::logger::init(&cfg.logging);
//!
//! let store = Arc::new(MemoryStore::new());
//! let mut caller = CallSession::new(
//!     store.clone(),
//!     Arc::new(WebRtcPeer::new(&cfg, Role::Caller).await?),
//!     SessionOptions::from(&cfg),
//! );
//! let call_id = caller.start_call().await?;
//!
//! let mut callee = CallSession::new(
//!     store.clone(),
//!     Arc::new(WebRtcPeer::new(&cfg, Role::Callee).await?),
//!     SessionOptions::from(&cfg),
//! );
//! callee.join_call(&call_id).await?;
//!
//! caller
//!     .wait_for(SessionState::Connected, std::time::Duration::from_secs(30))
//!     .await?;
//! caller.close().await?;
//! callee.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod logger;
pub mod peer;
pub mod record;
pub mod relay;
pub mod session;
pub mod store;
pub mod utils;

pub use config::Config;
pub use error::{Error, Result};
pub use peer::{PeerConnection, ScriptedPeer, WebRtcPeer};
pub use record::{CallRecord, RecordPatch, RecordUpdate, Role};
pub use relay::{CandidateMode, CandidateRelay};
pub use session::{CallSession, SessionOptions, SessionState};
pub use store::{MemoryStore, SignalingStore, StoreError, Subscription};
