use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ch4tgate_crypto::{
    generate_signing_key, sign_message, signing_key_from_base64, verify_signature,
    verifying_key_from, verifying_key_to_base64, Signature, SigningKey, VerifyingKey,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AuthConfig;

/// The resolved identity of one request. Resolution happens once at the
/// edge; the result is passed explicitly into access control and the rate
/// limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    Verified(String),
}

impl Caller {
    pub fn nick(&self) -> Option<&str> {
        match self {
            Caller::Anonymous => None,
            Caller::Verified(nick) => Some(nick),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenClaims {
    nick: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

/// Signer/verifier pair for bearer tokens:
/// `base64url(claims).base64url(signature)` over ed25519. Minting is not a
/// gateway surface; the signer exists for tests and operator tooling.
#[derive(Clone)]
pub struct TokenKeyring {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl TokenKeyring {
    pub fn from_config(config: &AuthConfig) -> Result<Self> {
        let signing_key = match config.signing_key.as_deref() {
            Some(raw) => signing_key_from_base64(raw)?,
            None => generate_signing_key(),
        };
        let verifying_key = verifying_key_from(&signing_key);
        Ok(Self {
            signing_key,
            verifying_key,
        })
    }

    pub fn verifying_key_base64(&self) -> String {
        verifying_key_to_base64(&self.verifying_key)
    }

    pub fn mint(&self, nick: &str, ttl: Duration) -> Result<String> {
        let issued_at = Utc::now();
        let claims = TokenClaims {
            nick: nick.trim().to_string(),
            issued_at,
            expires_at: issued_at + ttl,
        };
        let payload = serde_json::to_vec(&claims)?;
        let signature = sign_message(&self.signing_key, &payload);

        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        ))
    }

    /// Resolve a bearer token to its verified nickname. Malformed tokens,
    /// bad signatures, and expired claims all collapse to `None`; the
    /// access rules turn that into `auth_required` where it matters.
    pub fn verify(&self, token: &str) -> Option<String> {
        let (payload_b64, signature_b64) = token.split_once('.')?;
        let payload = URL_SAFE_NO_PAD.decode(payload_b64).ok()?;
        let signature_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .ok()?
            .try_into()
            .ok()?;
        let signature = Signature::from_bytes(&signature_bytes);
        verify_signature(&self.verifying_key, &payload, &signature).ok()?;

        let claims: TokenClaims = serde_json::from_slice(&payload).ok()?;
        if claims.expires_at < Utc::now() {
            return None;
        }
        let nick = claims.nick.trim().to_string();
        if nick.is_empty() {
            None
        } else {
            Some(nick)
        }
    }

    pub fn resolve(&self, bearer: Option<&str>) -> Caller {
        match bearer.and_then(|token| self.verify(token)) {
            Some(nick) => Caller::Verified(nick),
            None => Caller::Anonymous,
        }
    }
}

/// Extract the token from an `Authorization: Bearer ...` header value.
pub fn parse_bearer(header: Option<&str>) -> Option<&str> {
    let value = header?.trim();
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
