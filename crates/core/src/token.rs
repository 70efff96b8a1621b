//! Signed session tokens.
//!
//! ## Token format
//!
//! ```text
//! base64url(claims JSON) "." base64url(signature)
//! ```
//!
//! - Claims: `{"sub": <user id>, "iat": <unix seconds>, "exp": <unix seconds>}`.
//! - Signature: ECDSA P-256 over the encoded claims segment, raw 64 bytes (`r || s`, not DER).
//! - Both segments use URL-safe base64 without padding.
//!
//! Lifetime is fixed when the token is issued: one day, or seven when "remember me" was
//! requested. There is no refresh and no revocation list.

use crate::constants::{EXTENDED_TOKEN_LIFETIME_DAYS, TOKEN_LIFETIME_DAYS};
use crate::models::UserId;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Duration, Utc};
use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use p256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to parse signing key: {0}")]
    KeyParse(String),
    #[error("failed to encode signing key: {0}")]
    KeyEncode(String),
    #[error("failed to serialise claims: {0}")]
    Claims(#[from] serde_json::Error),
}

/// The verified content of a session token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: i64,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn subject(&self) -> UserId {
        UserId(self.sub)
    }
}

/// Result of checking a token. Every failure mode collapses into `Invalid`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TokenVerification {
    Verified(Claims),
    Invalid,
}

pub trait TokenService: Send + Sync {
    fn issue(&self, user_id: UserId, extended_lifetime: bool) -> Result<String, TokenError>;
    fn verify(&self, token: &str) -> TokenVerification;
}

/// [`TokenService`] backed by a P-256 signing key held in memory.
#[derive(Clone, Debug)]
pub struct SignedTokenService {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl SignedTokenService {
    pub fn new(signing_key: SigningKey) -> Self {
        let verifying_key = *signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Service with a freshly generated key. Tokens do not survive a restart.
    pub fn ephemeral() -> Self {
        Self::new(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Load the signing key from a PKCS#8 PEM document.
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self, TokenError> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| TokenError::KeyParse(e.to_string()))?;
        Ok(Self::new(signing_key))
    }

    /// Generate a new key and render it as PKCS#8 PEM, for provisioning.
    pub fn generate_pkcs8_pem() -> Result<String, TokenError> {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let pem = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| TokenError::KeyEncode(e.to_string()))?;
        Ok(pem.to_string())
    }

    pub fn issue_at(
        &self,
        user_id: UserId,
        extended_lifetime: bool,
        now: DateTime<Utc>,
    ) -> Result<String, TokenError> {
        let lifetime_days = if extended_lifetime {
            EXTENDED_TOKEN_LIFETIME_DAYS
        } else {
            TOKEN_LIFETIME_DAYS
        };
        let claims = Claims {
            sub: user_id.0,
            iat: now.timestamp(),
            exp: (now + Duration::days(lifetime_days)).timestamp(),
        };

        let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
        let signature: Signature = self.signing_key.sign(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(signature.to_bytes());

        Ok(format!("{payload}.{signature}"))
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> TokenVerification {
        match self.decode(token) {
            Some(claims) if claims.exp > now.timestamp() => TokenVerification::Verified(claims),
            _ => TokenVerification::Invalid,
        }
    }

    fn decode(&self, token: &str) -> Option<Claims> {
        let (payload, signature) = token.trim().split_once('.')?;

        let signature_bytes = URL_SAFE_NO_PAD.decode(signature).ok()?;
        let signature = Signature::from_slice(&signature_bytes).ok()?;
        self.verifying_key
            .verify(payload.as_bytes(), &signature)
            .ok()?;

        let payload_bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
        serde_json::from_slice(&payload_bytes).ok()
    }
}

impl TokenService for SignedTokenService {
    fn issue(&self, user_id: UserId, extended_lifetime: bool) -> Result<String, TokenError> {
        self.issue_at(user_id, extended_lifetime, Utc::now())
    }

    fn verify(&self, token: &str) -> TokenVerification {
        self.verify_at(token, Utc::now())
    }
}
