//! Gateway request authorization.
//!
//! Every request carries agent id, key id, timestamp, nonce, and an
//! HMAC-SHA256 signature over the canonical message. Freshness comes
//! from the replay window; single-use nonces inside a retention TTL
//! catch replays of still-fresh requests.

use base64::{engine::general_purpose::URL_SAFE as BASE64, Engine};
use chrono::Utc;
use dashmap::DashMap;
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::config::ApiKey;
use crate::error::{AgentError, Result};
use crate::types::AuthContext;

type HmacSha256 = Hmac<Sha256>;

/// The authenticated fields of an inbound request
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: String,
    pub path: String,
    pub body: String,
    pub agent_id: String,
    pub key_id: String,
    /// Unix seconds
    pub timestamp: i64,
    pub nonce: String,
    pub signature: String,
}

/// Canonical message: method, path, body hash, agent, timestamp, nonce.
fn canonical_message(
    method: &str,
    path: &str,
    body: &str,
    agent_id: &str,
    timestamp: i64,
    nonce: &str,
) -> String {
    let body_hash = {
        let mut hasher = Sha256::new();
        hasher.update(body.as_bytes());
        BASE64.encode(hasher.finalize())
    };
    format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.to_uppercase(),
        path,
        body_hash,
        agent_id,
        timestamp,
        nonce
    )
}

/// Sign a request the way the gateway expects. Used by the agent when
/// calling its own gateway, and by tests.
pub fn sign_request(
    secret: &str,
    method: &str,
    path: &str,
    body: &str,
    agent_id: &str,
    timestamp: i64,
    nonce: &str,
) -> String {
    let message = canonical_message(method, path, body, agent_id, timestamp, nonce);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(message.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

pub struct GatewayAuth {
    keys: HashMap<String, ApiKey>,
    replay_window_secs: i64,
    nonce_ttl_secs: i64,
    /// nonce -> unix seconds first seen
    seen_nonces: DashMap<String, i64>,
}

impl GatewayAuth {
    pub fn new(keys: Vec<ApiKey>, replay_window_secs: i64, nonce_ttl_secs: i64) -> Self {
        Self {
            keys: keys.into_iter().map(|k| (k.key_id.clone(), k)).collect(),
            replay_window_secs,
            nonce_ttl_secs,
            seen_nonces: DashMap::new(),
        }
    }

    /// Drop nonces older than the retention TTL. Called lazily from
    /// verification; there is no background sweeper.
    fn prune_nonces(&self, now: i64) {
        let cutoff = now - self.nonce_ttl_secs;
        self.seen_nonces.retain(|_, seen| *seen > cutoff);
    }

    pub fn verify(&self, request: &SignedRequest) -> Result<AuthContext> {
        // Bootstrap convenience: unsigned mode exists only while no key
        // has ever been configured.
        if self.keys.is_empty() {
            return Ok(AuthContext {
                agent_id: if request.agent_id.is_empty() {
                    "bootstrap".to_string()
                } else {
                    request.agent_id.clone()
                },
                key_id: "bootstrap".to_string(),
            });
        }

        let key = self
            .keys
            .get(&request.key_id)
            .ok_or_else(|| AgentError::AuthInvalid(format!("unknown key '{}'", request.key_id)))?;
        if !key.enabled {
            return Err(AgentError::AuthInvalid(format!(
                "key '{}' is disabled",
                request.key_id
            )));
        }
        if let Some(bound) = &key.agent_id {
            if bound != &request.agent_id {
                return Err(AgentError::AuthInvalid(
                    "key is not bound to the claimed agent".to_string(),
                ));
            }
        }

        let now = Utc::now().timestamp();
        if (now - request.timestamp).abs() > self.replay_window_secs {
            return Err(AgentError::AuthInvalid(
                "timestamp outside the replay window".to_string(),
            ));
        }

        self.prune_nonces(now);
        if self.seen_nonces.contains_key(&request.nonce) {
            return Err(AgentError::AuthReplayDetected);
        }

        let message = canonical_message(
            &request.method,
            &request.path,
            &request.body,
            &request.agent_id,
            request.timestamp,
            &request.nonce,
        );
        let mut mac = HmacSha256::new_from_slice(key.secret.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(message.as_bytes());
        let provided = BASE64
            .decode(&request.signature)
            .map_err(|_| AgentError::AuthInvalid("malformed signature".to_string()))?;
        // verify_slice compares in constant time
        mac.verify_slice(&provided)
            .map_err(|_| AgentError::AuthInvalid("signature mismatch".to_string()))?;

        // Only verified requests burn their nonce
        self.seen_nonces.insert(request.nonce.clone(), now);

        Ok(AuthContext {
            agent_id: request.agent_id.clone(),
            key_id: request.key_id.clone(),
        })
    }
}
