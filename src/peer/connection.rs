use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;

use crate::config::Config;
use crate::error::Result;
use crate::logger::dump_selected_pair;
use crate::peer::facade::PeerConnection;
use crate::peer::ice::rtc_config;
use crate::peer::types::{CandidatePayload, ConnectionState, SessionDescription};
use crate::record::Role;

pub const CONTROL_CHANNEL_LABEL: &str = "peercall-control";

/// Движок на `webrtc::RTCPeerConnection`. Принадлежит одной сессии.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    candidates_rx: Mutex<Option<mpsc::UnboundedReceiver<CandidatePayload>>>,
    states_rx: Mutex<Option<mpsc::UnboundedReceiver<ConnectionState>>>,
}

impl WebRtcPeer {
    /// создаём Peer; если `Caller`, то сами делаем data-channel и медиа-секции
    pub async fn new(cfg: &Config, role: Role) -> Result<Self> {
        let mut media = MediaEngine::default();
        media.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media)?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(cfg)).await?);

        let (cand_tx, cand_rx) = mpsc::unbounded_channel();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            match cand {
                Some(c) => match c.to_json() {
                    Ok(init) => {
                        let _ = cand_tx.send(CandidatePayload::from(init));
                    }
                    Err(e) => warn!("Failed to serialize local candidate: {e}"),
                },
                // None означает конец сбора
                None => debug!("ICE candidate gathering completed"),
            }
            Box::pin(async {})
        }));

        pc.on_ice_gathering_state_change(Box::new(move |state| {
            debug!("ICE gathering state changed to: {:?}", state);
            Box::pin(async {})
        }));

        let (state_tx, state_rx) = mpsc::unbounded_channel();
        pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
            info!("Peer connection state changed to: {:?}", st);
            let mapped = match st {
                RTCPeerConnectionState::New => Some(ConnectionState::New),
                RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
                RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
                RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
                RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
                RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
                _ => None,
            };
            if let Some(s) = mapped {
                let _ = state_tx.send(s);
            }
            Box::pin(async {})
        }));

        pc.on_track(Box::new(|track, _receiver, _transceiver| {
            info!(
                "Remote track: kind={} codec={} ssrc={}",
                track.kind(),
                track.codec().capability.mime_type,
                track.ssrc()
            );
            Box::pin(async {})
        }));

        match role {
            Role::Caller => {
                if cfg.media.audio {
                    add_media_section(&pc, RTPCodecType::Audio).await?;
                }
                if cfg.media.video {
                    add_media_section(&pc, RTPCodecType::Video).await?;
                }
                let dc = pc
                    .create_data_channel(CONTROL_CHANNEL_LABEL, Some(RTCDataChannelInit::default()))
                    .await?;
                debug!("Created data channel '{}'", dc.label());
            }
            Role::Callee => {
                pc.on_data_channel(Box::new(|dc: Arc<RTCDataChannel>| {
                    debug!("Remote data channel '{}' opened", dc.label());
                    Box::pin(async {})
                }));
            }
        }

        Ok(Self {
            pc,
            candidates_rx: Mutex::new(Some(cand_rx)),
            states_rx: Mutex::new(Some(state_rx)),
        })
    }
}

async fn add_media_section(pc: &RTCPeerConnection, kind: RTPCodecType) -> Result<()> {
    let init = RTCRtpTransceiverInit {
        direction: RTCRtpTransceiverDirection::Sendrecv,
        send_encodings: vec![],
    };
    pc.add_transceiver_from_kind(kind, Some(init)).await?;
    Ok(())
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn create_offer(&self) -> Result<SessionDescription> {
        Ok(self.pc.create_offer(None).await?.into())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(self.pc.create_answer(None).await?.into())
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_local_description(desc).await?;
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<()> {
        desc.ensure_well_formed()?;
        let desc = RTCSessionDescription::try_from(desc)?;
        self.pc.set_remote_description(desc).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: CandidatePayload) -> Result<()> {
        self.pc.add_ice_candidate(candidate.into()).await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(Into::into)
    }

    fn take_local_candidates(&self) -> Option<mpsc::UnboundedReceiver<CandidatePayload>> {
        self.candidates_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    fn take_state_changes(&self) -> Option<mpsc::UnboundedReceiver<ConnectionState>> {
        self.states_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }

    async fn dump_selected_pair(&self, call_id: &str, moment: &str) {
        dump_selected_pair(&self.pc, call_id, moment).await;
    }
}
