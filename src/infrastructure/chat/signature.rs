use crate::domain::errors::ChatEventError;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const VERSION: &str = "v0";
/// Requests older than this are replays and rejected.
const TIMESTAMP_TOLERANCE_SECS: i64 = 300;

/// Verify the platform's request signature: HMAC-SHA256 over
/// `v0:{timestamp}:{body}` with the signing secret, hex-encoded and
/// prefixed with `v0=`.
pub fn verify_signature(
    signing_secret: &str,
    timestamp: &str,
    body: &str,
    provided: &str,
    now_epoch_secs: i64,
) -> Result<(), ChatEventError> {
    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ChatEventError::StaleTimestamp)?;
    if (now_epoch_secs - ts).abs() > TIMESTAMP_TOLERANCE_SECS {
        return Err(ChatEventError::StaleTimestamp);
    }

    let base = format!("{}:{}:{}", VERSION, timestamp, body);
    let mut mac = HmacSha256::new_from_slice(signing_secret.as_bytes())
        .map_err(|_| ChatEventError::BadSignature)?;
    mac.update(base.as_bytes());
    let expected = format!("{}={}", VERSION, hex::encode(mac.finalize().into_bytes()));

    if constant_time_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(ChatEventError::BadSignature)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, timestamp: &str, body: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("v0:{}:{}", timestamp, body).as_bytes());
        format!("v0={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn test_valid_signature_accepted() {
        let secret = "8f742231b10e8888abcd99yyyzzz85a5";
        let body = "command=%2Ftrade&user_id=U123";
        let ts = "1700000000";
        let sig = sign(secret, ts, body);

        assert!(verify_signature(secret, ts, body, &sig, 1_700_000_100).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let secret = "secret";
        let ts = "1700000000";
        let sig = sign(secret, ts, "original");

        let result = verify_signature(secret, ts, "tampered", &sig, 1_700_000_000);
        assert!(matches!(result, Err(ChatEventError::BadSignature)));
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let secret = "secret";
        let ts = "1700000000";
        let sig = sign(secret, ts, "body");

        let result = verify_signature(secret, ts, "body", &sig, 1_700_000_000 + 301);
        assert!(matches!(result, Err(ChatEventError::StaleTimestamp)));
    }
}
