//! Webhook signature verification.
//!
//! Implements Stripe's documented scheme: the `stripe-signature` header
//! carries `t=<unix seconds>,v1=<hex hmac>[,v1=…]`, and the signature is
//! HMAC-SHA256 over `"{t}.{raw body}"` with the endpoint's signing secret.
//! Verification MUST run on the unparsed request bytes; any re-serialization
//! of the body invalidates the signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{PaymentsError, PaymentsResult};

type HmacSha256 = Hmac<Sha256>;

/// Verify a webhook payload against its signature header.
///
/// `tolerance_secs` bounds the accepted clock skew between the timestamp in
/// the header and `now_unix`; deliveries outside the window are rejected to
/// limit replay.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: i64,
    now_unix: i64,
) -> PaymentsResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value.parse().ok(),
            (Some("v1"), Some(value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("signature header missing timestamp");
        PaymentsError::SignatureInvalid
    })?;

    if candidates.is_empty() {
        tracing::warn!("signature header missing v1 signature");
        return Err(PaymentsError::SignatureInvalid);
    }

    if (now_unix - timestamp).abs() > tolerance_secs {
        tracing::warn!(
            timestamp = timestamp,
            now = now_unix,
            tolerance_secs = tolerance_secs,
            "webhook timestamp outside tolerance window"
        );
        return Err(PaymentsError::SignatureInvalid);
    }

    let expected = compute_signature(payload, timestamp, secret)?;

    // Accept if any presented v1 signature matches, compared in constant time.
    let matched = candidates
        .iter()
        .any(|sig| expected.as_bytes().ct_eq(sig.as_bytes()).into());

    if matched {
        Ok(())
    } else {
        tracing::warn!("webhook signature mismatch");
        Err(PaymentsError::SignatureInvalid)
    }
}

/// Compute the hex v1 signature for a payload and timestamp.
pub(crate) fn compute_signature(
    payload: &[u8],
    timestamp: i64,
    secret: &str,
) -> PaymentsResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| PaymentsError::SignatureInvalid)?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_secret";
    const NOW: i64 = 1_700_000_000;

    fn signed_header(payload: &[u8], timestamp: i64) -> String {
        let sig = compute_signature(payload, timestamp, SECRET).unwrap();
        format!("t={},v1={}", timestamp, sig)
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"payment_intent.succeeded"}"#;
        let header = signed_header(payload, NOW);
        assert!(verify_signature(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let payload = br#"{"id":"evt_1","amount":5000}"#;
        let header = signed_header(payload, NOW);
        let tampered = br#"{"id":"evt_1","amount":9999}"#;
        assert!(matches!(
            verify_signature(tampered, &header, SECRET, 300, NOW),
            Err(PaymentsError::SignatureInvalid)
        ));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let header = signed_header(payload, NOW);
        assert!(verify_signature(payload, &header, "whsec_other", 300, NOW).is_err());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let header = signed_header(payload, NOW - 301);
        assert!(verify_signature(payload, &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn accepts_timestamp_inside_window() {
        let payload = b"{}";
        let header = signed_header(payload, NOW - 299);
        assert!(verify_signature(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn rejects_missing_timestamp() {
        let sig = compute_signature(b"{}", NOW, SECRET).unwrap();
        let header = format!("v1={}", sig);
        assert!(verify_signature(b"{}", &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn rejects_missing_v1() {
        let header = format!("t={}", NOW);
        assert!(verify_signature(b"{}", &header, SECRET, 300, NOW).is_err());
    }

    #[test]
    fn accepts_multiple_v1_when_one_matches() {
        let payload = b"{}";
        let sig = compute_signature(payload, NOW, SECRET).unwrap();
        let header = format!("t={},v1=deadbeef,v1={}", NOW, sig);
        assert!(verify_signature(payload, &header, SECRET, 300, NOW).is_ok());
    }
}
