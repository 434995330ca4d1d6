//! Confirmation tokens.
//!
//! A quote is bound to its later execute call by a short-lived signed
//! token: base64url(payload JSON) + "." + base64url(HMAC-SHA256). The
//! payload is self-contained; the server only remembers which exact
//! tokens were already consumed, for the life of the process.

use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashSet;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{AgentError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_VERSION: u8 = 1;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenPayload {
    pub version: u8,
    pub agent_id: String,
    pub bundle_id: String,
    pub market_id: String,
    pub side: crate::types::Side,
    pub shares: Decimal,
    pub quoted_cost: Decimal,
    pub max_slippage_bps: u32,
    pub expires_at: DateTime<Utc>,
}

pub struct ConfirmationTokens {
    secret: Vec<u8>,
    ttl: Duration,
    consumed: DashSet<String>,
}

impl ConfirmationTokens {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        Self {
            secret: secret.as_bytes().to_vec(),
            ttl: Duration::seconds(ttl_secs),
            consumed: DashSet::new(),
        }
    }

    fn sign(&self, payload_b64: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        BASE64.encode(mac.finalize().into_bytes())
    }

    /// Stamp version and expiry onto the payload, sign, and serialize.
    pub fn issue(&self, mut payload: TokenPayload) -> Result<(String, DateTime<Utc>)> {
        payload.version = TOKEN_VERSION;
        payload.expires_at = Utc::now() + self.ttl;
        let json = serde_json::to_string(&payload)
            .map_err(|e| AgentError::Internal(format!("token serialization: {}", e)))?;
        let payload_b64 = BASE64.encode(json.as_bytes());
        let signature = self.sign(&payload_b64);
        Ok((format!("{}.{}", payload_b64, signature), payload.expires_at))
    }

    /// Verify signature, one-time use, and freshness; on success the
    /// token is consumed for the remainder of the process lifetime.
    pub fn verify_and_consume(&self, token: &str) -> Result<TokenPayload> {
        let (payload_b64, signature) = token
            .rsplit_once('.')
            .ok_or(AgentError::TokenInvalid)?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts any key length");
        mac.update(payload_b64.as_bytes());
        let provided = BASE64
            .decode(signature)
            .map_err(|_| AgentError::TokenInvalid)?;
        // verify_slice compares in constant time
        if mac.verify_slice(&provided).is_err() {
            return Err(AgentError::TokenInvalid);
        }

        let json = BASE64
            .decode(payload_b64)
            .map_err(|_| AgentError::TokenInvalid)?;
        let payload: TokenPayload =
            serde_json::from_slice(&json).map_err(|_| AgentError::TokenInvalid)?;

        if self.consumed.contains(token) {
            return Err(AgentError::TokenUsed);
        }
        if Utc::now() > payload.expires_at {
            return Err(AgentError::TokenExpired);
        }

        self.consumed.insert(token.to_string());
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Side;
    use rust_decimal_macros::dec;

    fn payload() -> TokenPayload {
        TokenPayload {
            version: 0,
            agent_id: "agent-1".to_string(),
            bundle_id: "b-123".to_string(),
            market_id: "m1".to_string(),
            side: Side::Buy,
            shares: dec!(11),
            quoted_cost: dec!(9.90),
            max_slippage_bps: 40,
            expires_at: Utc::now(),
        }
    }

    #[test]
    fn issue_then_verify_roundtrips_exactly_once() {
        let tokens = ConfirmationTokens::new("secret", 90);
        let (token, expires_at) = tokens.issue(payload()).unwrap();
        assert!(expires_at > Utc::now());

        let verified = tokens.verify_and_consume(&token).unwrap();
        assert_eq!(verified.bundle_id, "b-123");
        assert_eq!(verified.shares, dec!(11));
        assert_eq!(verified.version, TOKEN_VERSION);

        let second = tokens.verify_and_consume(&token).unwrap_err();
        assert_eq!(second.code(), "CONFIRMATION_TOKEN_USED");
    }

    #[test]
    fn expired_token_is_rejected() {
        let tokens = ConfirmationTokens::new("secret", -1);
        let (token, _) = tokens.issue(payload()).unwrap();
        let err = tokens.verify_and_consume(&token).unwrap_err();
        assert_eq!(err.code(), "CONFIRMATION_TOKEN_EXPIRED");
    }

    #[test]
    fn tampered_payload_is_invalid() {
        let tokens = ConfirmationTokens::new("secret", 90);
        let (token, _) = tokens.issue(payload()).unwrap();
        let (payload_b64, signature) = token.rsplit_once('.').unwrap();
        let mut forged_json = String::from_utf8(BASE64.decode(payload_b64).unwrap()).unwrap();
        forged_json = forged_json.replace("\"shares\":\"11\"", "\"shares\":\"999\"");
        let forged = format!("{}.{}", BASE64.encode(forged_json.as_bytes()), signature);
        let err = tokens.verify_and_consume(&forged).unwrap_err();
        assert_eq!(err.code(), "CONFIRMATION_TOKEN_INVALID");
    }

    #[test]
    fn wrong_secret_is_invalid() {
        let issuer = ConfirmationTokens::new("secret-a", 90);
        let verifier = ConfirmationTokens::new("secret-b", 90);
        let (token, _) = issuer.issue(payload()).unwrap();
        let err = verifier.verify_and_consume(&token).unwrap_err();
        assert_eq!(err.code(), "CONFIRMATION_TOKEN_INVALID");
    }
}
