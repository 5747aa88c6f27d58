//! Ed25519 helpers shared by the ch4tgate token signer and verifier.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::Signer;
use rand::rngs::OsRng;

pub use ed25519_dalek::{Signature, SigningKey, VerifyingKey};

pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn verifying_key_from(signing_key: &SigningKey) -> VerifyingKey {
    signing_key.verifying_key()
}

pub fn sign_message(signing_key: &SigningKey, message: &[u8]) -> Signature {
    signing_key.sign(message)
}

pub fn verify_signature(
    verifying_key: &VerifyingKey,
    message: &[u8],
    signature: &Signature,
) -> Result<()> {
    verifying_key
        .verify_strict(message, signature)
        .map_err(|err| anyhow!(err))
}

/// Decode a 32-byte signing key from its URL-safe base64 form.
pub fn signing_key_from_base64(raw: &str) -> Result<SigningKey> {
    let decoded = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .context("failed to decode signing key from base64 (URL-safe)")?;
    let bytes: [u8; 32] = decoded
        .try_into()
        .map_err(|_| anyhow!("signing key must be 32 bytes"))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Decode a 32-byte verifying key from its URL-safe base64 form.
pub fn verifying_key_from_base64(raw: &str) -> Result<VerifyingKey> {
    let decoded = URL_SAFE_NO_PAD
        .decode(raw.trim())
        .context("failed to decode verifying key from base64 (URL-safe)")?;
    let bytes: [u8; 32] = decoded
        .try_into()
        .map_err(|_| anyhow!("verifying key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes).map_err(|err| anyhow!(err))
}

pub fn verifying_key_to_base64(verifying_key: &VerifyingKey) -> String {
    URL_SAFE_NO_PAD.encode(verifying_key.as_bytes())
}
