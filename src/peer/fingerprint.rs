use sha2::{Digest, Sha256};

use crate::peer::types::SessionDescription;

/// Значение первой строки `a=fingerprint:` из SDP
pub fn dtls_fingerprint(desc: &SessionDescription) -> Option<&str> {
    desc.sdp
        .lines()
        .find_map(|line| line.trim().strip_prefix("a=fingerprint:"))
        .map(str::trim)
}

/// Короткая строка для сверки собеседниками голосом.
///
/// SHA-256 от двух DTLS fingerprint (отсортированных, чтобы обе стороны
/// получили одно и то же), первые 6 байт в hex.
pub fn short_auth_string(a: &SessionDescription, b: &SessionDescription) -> Option<String> {
    let mut fps = [dtls_fingerprint(a)?, dtls_fingerprint(b)?];
    fps.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(fps[0].as_bytes());
    hasher.update(b"\n");
    hasher.update(fps[1].as_bytes());
    let digest = hasher.finalize();
    Some(hex::encode(&digest[..6])) // 48 bits = 12 hex chars
}
