use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;

use crate::config::Config;
use crate::peer::types::ServerConfig;
use crate::utils::add_ice_url_scheme;

/// Перевод пользовательских серверов в формат движка
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
        })
        .collect()
}

/// Создает конфигурацию для peer connection
pub fn rtc_config(cfg: &Config) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&cfg.ice_servers),
        ice_candidate_pool_size: cfg.ice_candidate_pool_size,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn servers_get_scheme_and_credentials() {
        let servers = vec![ServerConfig {
            id: "t".into(),
            r#type: "turn".into(),
            url: "relay.example.org:3478".into(),
            username: Some("user".into()),
            credential: Some("secret".into()),
        }];
        let out = ice_servers(&servers);
        assert_eq!(out[0].urls, vec!["turn:relay.example.org:3478".to_string()]);
        assert_eq!(out[0].username, "user");
        assert_eq!(out[0].credential, "secret");
    }

    #[test]
    fn rtc_config_carries_pool_size() {
        let cfg = Config::default();
        let rtc = rtc_config(&cfg);
        assert_eq!(rtc.ice_candidate_pool_size, 10);
        assert_eq!(rtc.ice_servers.len(), 2);
    }
}
