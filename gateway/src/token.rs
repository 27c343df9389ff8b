//! Short-lived signed tokens for trusted first-party calls.
//!
//! The control-plane site uses these to call into a tenant's API surface
//! without holding that tenant's long-lived key. Format:
//! `base64(payload "." hex(hmac_sha256(payload)))` with a JSON payload of
//! issuer, project id and millisecond expiry. The expiry is short enough
//! that replay exposure is bounded to a few seconds.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub const INTERNAL_ISSUER: &str = "portico-internal";

const TOKEN_LIFETIME_MS: u64 = 5_000;

/// HMAC-SHA256 output length; signatures of any other size are rejected
/// before comparison.
const SIGNATURE_LEN: usize = 32;

#[derive(Serialize, Deserialize)]
struct InternalTokenPayload {
    iss: String,
    #[serde(rename = "projectId")]
    project_id: String,
    exp: u64,
}

fn epoch_ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Mints a token authorizing calls to `project_id` for the next few seconds.
pub fn mint_internal_token(secret: &str, project_id: &str) -> String {
    mint_at(secret, project_id, epoch_ms_now() + TOKEN_LIFETIME_MS)
}

fn mint_at(secret: &str, project_id: &str, exp: u64) -> String {
    let payload = InternalTokenPayload {
        iss: INTERNAL_ISSUER.to_string(),
        project_id: project_id.to_string(),
        exp,
    };
    let payload_str =
        serde_json::to_string(&payload).expect("token payload serialization is infallible");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload_str.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    BASE64.encode(format!("{payload_str}.{signature}"))
}

/// Verifies a token against the expected project. The payload is parsed and
/// re-serialized so the MAC covers a canonical form, and the signature
/// comparison is constant-time.
pub fn verify_internal_token(secret: &str, token: &str, expected_project_id: &str) -> bool {
    let Ok(decoded) = BASE64.decode(token) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    // The payload is JSON and may itself contain dots; the signature never
    // does, so split on the last one.
    let Some((payload_str, signature_hex)) = decoded.rsplit_once('.') else {
        return false;
    };
    let Ok(payload) = serde_json::from_str::<InternalTokenPayload>(payload_str) else {
        return false;
    };
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    if signature.len() != SIGNATURE_LEN {
        return false;
    }

    if payload.exp < epoch_ms_now() {
        return false;
    }
    if payload.iss != INTERNAL_ISSUER {
        return false;
    }
    if payload.project_id != expected_project_id {
        return false;
    }

    let canonical =
        serde_json::to_string(&payload).expect("token payload serialization is infallible");

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(canonical.as_bytes());
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-internal-secret";

    #[test]
    fn minted_tokens_verify() {
        let token = mint_internal_token(SECRET, "acme");
        assert!(verify_internal_token(SECRET, &token, "acme"));
    }

    #[test]
    fn project_mismatch_is_rejected_despite_valid_signature() {
        let token = mint_internal_token(SECRET, "acme");
        assert!(!verify_internal_token(SECRET, &token, "other"));
    }

    #[test]
    fn expired_tokens_are_rejected() {
        let token = mint_at(SECRET, "acme", epoch_ms_now().saturating_sub(1));
        assert!(!verify_internal_token(SECRET, &token, "acme"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = mint_internal_token(SECRET, "acme");
        assert!(!verify_internal_token("other-secret", &token, "acme"));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let token = mint_internal_token(SECRET, "acme");
        let decoded = String::from_utf8(BASE64.decode(&token).unwrap()).unwrap();
        let tampered = decoded.replace("acme", "evil");
        let tampered = BASE64.encode(tampered);
        assert!(!verify_internal_token(SECRET, &tampered, "evil"));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(!verify_internal_token(SECRET, "", "acme"));
        assert!(!verify_internal_token(SECRET, "not-base64!!!", "acme"));
        assert!(!verify_internal_token(SECRET, &BASE64.encode("no separator"), "acme"));
        // Signature of the wrong length
        assert!(!verify_internal_token(
            SECRET,
            &BASE64.encode(r#"{"iss":"portico-internal","projectId":"acme","exp":99999999999999}.abcd"#),
            "acme"
        ));
    }
}
