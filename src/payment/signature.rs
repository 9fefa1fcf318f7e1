//! Webhook signatures.
//!
//! Header format: `Holdfast-Signature: t=<unix secs>,v1=<hex>[,v1=<hex>...]`
//! where each `v1` is `HMAC-SHA256(secret, "<t>.<raw body>")`. More than one
//! `v1` appears while the gateway rotates secrets.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "holdfast-signature";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("missing signature header")]
    Missing,
    #[error("malformed signature header")]
    Malformed,
    #[error("signature timestamp outside tolerance")]
    Stale,
    #[error("signature does not match")]
    Mismatch,
    #[error("unusable webhook secret")]
    BadSecret,
}

fn mac_for(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::BadSecret)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}

/// Hex signature of `payload` at `timestamp`.
pub fn sign(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(hex::encode(mac_for(secret, timestamp, payload)?.finalize().into_bytes()))
}

/// Full header value, as the gateway would send it.
pub fn signature_header(secret: &[u8], timestamp: i64, payload: &[u8]) -> Result<String, SignatureError> {
    Ok(format!("t={timestamp},v1={}", sign(secret, timestamp, payload)?))
}

/// Check a webhook delivery. Returns the signed timestamp.
pub fn verify(
    secret: &[u8],
    header: Option<&str>,
    payload: &[u8],
    now_secs: i64,
    tolerance_secs: i64,
) -> Result<i64, SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            return Err(SignatureError::Malformed);
        };
        match key {
            "t" => timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?),
            "v1" => candidates.push(value),
            _ => {}
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if candidates.is_empty() {
        return Err(SignatureError::Malformed);
    }
    if now_secs.abs_diff(timestamp) > tolerance_secs.unsigned_abs() {
        return Err(SignatureError::Stale);
    }

    for candidate in candidates {
        let Ok(bytes) = hex::decode(candidate) else { continue };
        // verify_slice compares in constant time.
        if mac_for(secret, timestamp, payload)?.verify_slice(&bytes).is_ok() {
            return Ok(timestamp);
        }
    }
    Err(SignatureError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"whsec_test";
    const BODY: &[u8] = br#"{"id":"evt_1","type":"checkout.session.completed"}"#;
    const NOW: i64 = 1_767_000_000;

    #[test]
    fn signed_header_verifies() {
        let header = signature_header(SECRET, NOW, BODY).unwrap();
        assert_eq!(verify(SECRET, Some(&header), BODY, NOW + 10, 300), Ok(NOW));
    }

    #[test]
    fn tampered_body_is_rejected() {
        let header = signature_header(SECRET, NOW, BODY).unwrap();
        assert_eq!(
            verify(SECRET, Some(&header), b"{\"id\":\"evt_2\"}", NOW, 300),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let header = signature_header(b"other", NOW, BODY).unwrap();
        assert_eq!(verify(SECRET, Some(&header), BODY, NOW, 300), Err(SignatureError::Mismatch));
    }

    #[test]
    fn old_timestamp_is_stale() {
        let header = signature_header(SECRET, NOW, BODY).unwrap();
        assert_eq!(verify(SECRET, Some(&header), BODY, NOW + 301, 300), Err(SignatureError::Stale));
    }

    #[test]
    fn extreme_timestamps_are_stale() {
        for t in [i64::MIN, i64::MAX] {
            let header = format!("t={t},v1=00");
            assert_eq!(verify(SECRET, Some(&header), BODY, NOW, 300), Err(SignatureError::Stale));
        }
        assert_eq!(
            verify(SECRET, Some("t=-9223372036854775808,v1=00"), BODY, i64::MAX, 300),
            Err(SignatureError::Stale)
        );
    }

    #[test]
    fn any_matching_v1_is_accepted() {
        let good = sign(SECRET, NOW, BODY).unwrap();
        let header = format!("t={NOW},v1=deadbeef,v1=not-hex,v1={good}");
        assert!(verify(SECRET, Some(&header), BODY, NOW, 300).is_ok());
    }

    #[test]
    fn malformed_headers() {
        assert_eq!(verify(SECRET, None, BODY, NOW, 300), Err(SignatureError::Missing));
        assert_eq!(verify(SECRET, Some("garbage"), BODY, NOW, 300), Err(SignatureError::Malformed));
        assert_eq!(verify(SECRET, Some("t=abc,v1=00"), BODY, NOW, 300), Err(SignatureError::Malformed));
        assert_eq!(
            verify(SECRET, Some(&format!("t={NOW}")), BODY, NOW, 300),
            Err(SignatureError::Malformed)
        );
    }
}
