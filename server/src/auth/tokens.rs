/// HMAC-signed, expiring tokens.
///
/// Format: `base64url(kind|subject|expiry_unix).hex(hmac_sha256)`.
/// Used for guest chat credentials and for the ticket that proves an email
/// address was verified before registration.
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Guest,
    Verification,
}

impl TokenKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenKind::Guest => "guest",
            TokenKind::Verification => "verify",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("bad token signature")]
    BadSignature,
    #[error("token issued for another purpose")]
    WrongKind,
    #[error("token expired")]
    Expired,
}

/// What a valid token vouches for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedClaim {
    pub subject: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenSigner {
    key: Arc<Vec<u8>>,
}

impl TokenSigner {
    pub fn new(secret: &[u8]) -> Self {
        TokenSigner {
            key: Arc::new(secret.to_vec()),
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length")
    }

    pub fn sign(&self, kind: TokenKind, subject: &str, expires_at: DateTime<Utc>) -> String {
        let payload = format!("{}|{}|{}", kind.as_str(), subject, expires_at.timestamp());
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let signature = mac.finalize().into_bytes();

        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(payload.as_bytes()),
            hex::encode(signature)
        )
    }

    pub fn verify(
        &self,
        kind: TokenKind,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<SignedClaim, TokenError> {
        let (encoded, signature) = token.trim().split_once('.').ok_or(TokenError::Malformed)?;
        let payload = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|_| TokenError::Malformed)?;
        let signature = hex::decode(signature).map_err(|_| TokenError::Malformed)?;

        let mut mac = self.mac();
        mac.update(&payload);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let payload = String::from_utf8(payload).map_err(|_| TokenError::Malformed)?;
        let (token_kind, rest) = payload.split_once('|').ok_or(TokenError::Malformed)?;
        let (subject, expiry) = rest.rsplit_once('|').ok_or(TokenError::Malformed)?;

        if token_kind != kind.as_str() {
            return Err(TokenError::WrongKind);
        }

        let expiry: i64 = expiry.parse().map_err(|_| TokenError::Malformed)?;
        let expires_at = DateTime::from_timestamp(expiry, 0).ok_or(TokenError::Malformed)?;
        if now > expires_at {
            return Err(TokenError::Expired);
        }

        Ok(SignedClaim {
            subject: subject.to_string(),
            expires_at,
        })
    }
}
