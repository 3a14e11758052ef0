//! Signed pagination cursors
//!
//! The cursor is an opaque token carrying the last row's sort-key values
//! and id, signed with a process-local secret. The server trusts only the
//! signature; any tamper or decode failure surfaces as `InvalidCursor`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use matforge_common::errors::{AppError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Decoded cursor position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CursorPayload {
    /// Sort-key values of the last returned row, in sort order
    pub keys: Vec<serde_json::Value>,
    /// Id of the last returned row (final tie-break key)
    pub last_id: String,
}

/// Encoder/decoder bound to one process-local secret
pub struct CursorCodec {
    secret: [u8; 32],
}

impl CursorCodec {
    /// Fresh random secret; cursors do not survive process restarts
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self { secret }
    }

    /// Fixed secret, for tests
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    fn sign(&self, data: &[u8]) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(data);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Encode a payload into an opaque signed token
    pub fn encode(&self, payload: &CursorPayload) -> Result<String> {
        let json = serde_json::to_vec(payload)?;
        let body = URL_SAFE_NO_PAD.encode(&json);
        let signature = self.sign(body.as_bytes());
        Ok(format!("{}.{}", body, signature))
    }

    /// Decode and verify a token
    pub fn decode(&self, token: &str) -> Result<CursorPayload> {
        let (body, signature) = token.split_once('.').ok_or(AppError::InvalidCursor)?;

        let expected = self.sign(body.as_bytes());
        // Signature check before any parsing
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(AppError::InvalidCursor);
        }

        let json = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| AppError::InvalidCursor)?;
        serde_json::from_slice(&json).map_err(|_| AppError::InvalidCursor)
    }
}

impl Default for CursorCodec {
    fn default() -> Self {
        Self::new()
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
    use serde_json::json;

    fn payload() -> CursorPayload {
        CursorPayload {
            keys: vec![json!(0.87), json!("Кирпич")],
            last_id: "m-42".to_string(),
        }
    }

    #[test]
    fn test_round_trip() {
        let codec = CursorCodec::new();
        let token = codec.encode(&payload()).unwrap();
        let decoded = codec.decode(&token).unwrap();
        assert_eq!(decoded, payload());

        // encode(decode(c)) is bit-for-bit stable
        let token_again = codec.encode(&decoded).unwrap();
        assert_eq!(token, token_again);
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let codec = CursorCodec::new();
        let token = codec.encode(&payload()).unwrap();

        let mut tampered = token.clone();
        tampered.pop();
        tampered.push('0');
        assert!(matches!(
            codec.decode(&tampered).unwrap_err(),
            AppError::InvalidCursor
        ));
    }

    #[test]
    fn test_tampered_body_rejected() {
        let codec = CursorCodec::new();
        let token = codec.encode(&payload()).unwrap();
        let (_, signature) = token.split_once('.').unwrap();

        let other_body = URL_SAFE_NO_PAD.encode(b"{\"keys\":[],\"last_id\":\"x\"}");
        let forged = format!("{}.{}", other_body, signature);
        assert!(matches!(
            codec.decode(&forged).unwrap_err(),
            AppError::InvalidCursor
        ));
    }

    #[test]
    fn test_foreign_secret_rejected() {
        let a = CursorCodec::with_secret([1u8; 32]);
        let b = CursorCodec::with_secret([2u8; 32]);
        let token = a.encode(&payload()).unwrap();
        assert!(b.decode(&token).is_err());
    }

    #[test]
    fn test_garbage_rejected() {
        let codec = CursorCodec::new();
        assert!(codec.decode("not-a-cursor").is_err());
        assert!(codec.decode("a.b").is_err());
        assert!(codec.decode("").is_err());
    }
}
