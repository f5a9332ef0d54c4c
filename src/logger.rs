use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use crate::config::LogConfig;
use crate::peer::types::CandidatePayload;

/// Устанавливает глобальный subscriber. `RUST_LOG` важнее фильтра из конфига.
/// Повторный вызов ничего не делает.
pub fn init(cfg: &LogConfig) {
    if !cfg.enabled {
        return;
    }
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.filter.as_str()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, call_id: &str, cand: &CandidatePayload) {
    debug!(
        call_id,
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}

/// Счётчики кандидатов по типам
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateSummary {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
    pub other: usize,
}

pub fn analyze_candidates(candidates: &[CandidatePayload]) -> CandidateSummary {
    let mut summary = CandidateSummary::default();
    for candidate in candidates {
        match candidate.kind() {
            Some("host") => summary.host += 1,
            Some("srflx") => summary.srflx += 1,
            Some("relay") => summary.relay += 1,
            _ => summary.other += 1,
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        summary.host, summary.srflx, summary.relay
    );
    if !candidates.is_empty() && summary.relay == 0 {
        warn!("No TURN relay candidates found, connection through NAT may fail");
    }
    summary
}

/// Быстрый снимок getStats → выбранная (nominated) пара кандидатов
pub async fn dump_selected_pair(pc: &RTCPeerConnection, call_id: &str, moment: &str) {
    let stats = pc.get_stats().await;
    let nominated = stats.reports.into_values().filter_map(|report| match report {
        StatsReportType::CandidatePair(pair) if pair.nominated => Some(pair),
        _ => None,
    });
    for pair in nominated {
        debug!(
            call_id,
            moment,
            local = %pair.local_candidate_id,
            remote = %pair.remote_candidate_id,
            bytes_sent = pair.bytes_sent,
            bytes_received = pair.bytes_received,
            "selected candidate pair: state={:?}",
            pair.state
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_counted_by_type() {
        let list = vec![
            CandidatePayload::new("candidate:1 1 udp 2130706431 10.0.0.2 5000 typ host"),
            CandidatePayload::new("candidate:2 1 udp 1694498815 1.2.3.4 5001 typ srflx raddr 10.0.0.2 rport 5000"),
            CandidatePayload::new("candidate:3 1 udp 16777215 5.6.7.8 5002 typ relay raddr 1.2.3.4 rport 5001"),
            CandidatePayload::new("garbage"),
        ];
        let s = analyze_candidates(&list);
        assert_eq!(s, CandidateSummary { host: 1, srflx: 1, relay: 1, other: 1 });
    }

    #[test]
    fn init_is_idempotent() {
        let cfg = LogConfig {
            enabled: true,
            filter: "peercall=trace".into(),
        };
        init(&cfg);
        init(&cfg);
    }
}
