pub mod connection;
pub mod facade;
pub mod fingerprint;
pub mod ice;
pub mod scripted;
pub mod types;

pub use connection::WebRtcPeer;
pub use facade::PeerConnection;
pub use scripted::ScriptedPeer;
pub use types::{CandidatePayload, ConnectionState, SdpType, ServerConfig, SessionDescription};
