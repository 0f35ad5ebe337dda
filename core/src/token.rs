//! Signed access tokens encoded in gate QR codes.
//!
//! Tokens are compact JWS values (`header.payload.signature`, base64url without
//! padding) signed with HMAC-SHA256 under a secret shared with the issuer. This is
//! the standard HS256 JWT format, so tokens minted by any JWT library verify here.
//!
//! # Security Properties
//!
//! - Only `HS256` is accepted; `none` and every other algorithm are rejected
//! - The signature is checked in constant time before the payload is parsed
//! - `exp` is mandatory; `nbf` is honoured when present
//! - The secret lives in a [`SecretString`] and is never formatted or logged
//!
//! # Example
//!
//! ```
//! use gatekeeper_core::token::{AccessClaims, TokenSigner, TokenVerifier};
//! use chrono::{Duration, Utc};
//! use secrecy::SecretString;
//!
//! let secret = SecretString::from("shared-secret");
//! let now = Utc::now();
//!
//! let token = TokenSigner::new(secret.clone())
//!     .sign(&AccessClaims::new("u1", now + Duration::minutes(5)))
//!     .unwrap();
//!
//! let claims = TokenVerifier::new(secret).verify(&token, now).unwrap();
//! assert_eq!(claims.user_id, "u1");
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only signing algorithm accepted.
pub const ALGORITHM: &str = "HS256";

/// Default clock-skew allowance for `exp` and `nbf`.
pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

/// Encoded `{"alg":"HS256","typ":"JWT"}`.
const ENCODED_HEADER: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9";

/// Why a token was refused.
///
/// These details are for logs and tests only; callers outside the pipeline see a
/// generic "invalid credential".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VerificationError {
    /// The token is not a well-formed compact JWS or its claims are unusable.
    #[error("Malformed token: {0}")]
    Malformed(String),

    /// The header names an algorithm other than HS256.
    #[error("Unsupported token algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The signature does not match the shared secret.
    #[error("Invalid token signature")]
    InvalidSignature,

    /// `exp` is in the past (beyond the leeway).
    #[error("Token expired")]
    Expired,

    /// `nbf` is in the future (beyond the leeway).
    #[error("Token not yet valid")]
    NotYetValid,
}

/// Claims carried by an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject the token was issued to.
    pub user_id: String,
    /// Display name of the subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Camera or gate the token is bound to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_id: Option<String>,
    /// Requested action, e.g. `"enter"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    /// Expiry, seconds since the Unix epoch.
    pub exp: i64,
    /// Issue time, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    /// Not-before time, seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<i64>,
}

impl AccessClaims {
    /// Minimal claims for `user_id`, expiring at `expires_at`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            camera_id: None,
            action: None,
            exp: expires_at.timestamp(),
            iat: None,
            nbf: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Bind the token to a camera.
    #[must_use]
    pub fn with_camera(mut self, camera_id: impl Into<String>) -> Self {
        self.camera_id = Some(camera_id.into());
        self
    }

    /// Set the requested action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Set the not-before time.
    #[must_use]
    pub fn not_before(mut self, nbf: DateTime<Utc>) -> Self {
        self.nbf = Some(nbf.timestamp());
        self
    }
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

fn mac_for(secret: &SecretString) -> Result<HmacSha256, VerificationError> {
    // HMAC accepts keys of any length; this only fails for broken crypto backends.
    HmacSha256::new_from_slice(secret.expose_secret().as_bytes())
        .map_err(|_| VerificationError::InvalidSignature)
}

fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, VerificationError> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerificationError::Malformed(format!("{what} is not base64url: {e}")))
}

/// Verifies access tokens against the shared secret.
///
/// Verification is pure: the same token, secret and `now` always give the same
/// answer.
#[derive(Clone)]
pub struct TokenVerifier {
    secret: SecretString,
    leeway_secs: i64,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier")
            .field("secret", &"[REDACTED]")
            .field("leeway_secs", &self.leeway_secs)
            .finish()
    }
}

impl TokenVerifier {
    /// Create a verifier with the default leeway.
    #[must_use]
    pub fn new(secret: SecretString) -> Self {
        Self {
            secret,
            leeway_secs: i64::try_from(DEFAULT_LEEWAY.as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// Set the clock-skew allowance applied to `exp` and `nbf`.
    #[must_use]
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway_secs = i64::try_from(leeway.as_secs()).unwrap_or(i64::MAX);
        self
    }

    /// Verify `token` at time `now` and return its claims.
    ///
    /// # Errors
    ///
    /// - `Malformed`: wrong segment count, bad base64, bad JSON, missing `exp`,
    ///   or an empty `user_id`
    /// - `UnsupportedAlgorithm`: header algorithm is not HS256
    /// - `InvalidSignature`: signature does not match
    /// - `Expired` / `NotYetValid`: outside the validity window
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> Result<AccessClaims, VerificationError> {
        let mut segments = token.trim().split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) = (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) else {
            return Err(VerificationError::Malformed(
                "expected three dot-separated segments".to_string(),
            ));
        };

        let header: Header = serde_json::from_slice(&decode_segment(header_b64, "header")?)
            .map_err(|e| VerificationError::Malformed(format!("header: {e}")))?;
        if header.alg != ALGORITHM {
            return Err(VerificationError::UnsupportedAlgorithm(header.alg));
        }

        let signature = decode_segment(signature_b64, "signature")?;
        let mut mac = mac_for(&self.secret)?;
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| VerificationError::InvalidSignature)?;

        let claims: AccessClaims = serde_json::from_slice(&decode_segment(payload_b64, "payload")?)
            .map_err(|e| VerificationError::Malformed(format!("claims: {e}")))?;

        if claims.user_id.trim().is_empty() {
            return Err(VerificationError::Malformed("empty user_id".to_string()));
        }

        let now_secs = now.timestamp();
        if now_secs > claims.exp.saturating_add(self.leeway_secs) {
            return Err(VerificationError::Expired);
        }
        if let Some(nbf) = claims.nbf {
            if nbf > now_secs.saturating_add(self.leeway_secs) {
                return Err(VerificationError::NotYetValid);
            }
        }

        Ok(claims)
    }
}

/// Issues access tokens in the format [`TokenVerifier`] accepts.
///
/// Used by provisioning tools and tests; the gate itself only verifies.
#[derive(Clone)]
pub struct TokenSigner {
    secret: SecretString,
}

impl TokenSigner {
    /// Create a signer for the shared secret.
    #[must_use]
    pub const fn new(secret: SecretString) -> Self {
        Self { secret }
    }

    /// Sign `claims` into a compact token.
    ///
    /// # Errors
    ///
    /// Returns `Malformed` if the claims cannot be encoded.
    pub fn sign(&self, claims: &AccessClaims) -> Result<String, VerificationError> {
        let payload = serde_json::to_vec(claims)
            .map_err(|e| VerificationError::Malformed(format!("claims: {e}")))?;
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = mac_for(&self.secret)?;
        mac.update(ENCODED_HEADER.as_bytes());
        mac.update(b".");
        mac.update(payload_b64.as_bytes());
        let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

        Ok(format!("{ENCODED_HEADER}.{payload_b64}.{signature_b64}"))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    /// Issued by a stock JWT library with secret `devsecret`, expiring 2030-01-01.
    const LIBRARY_TOKEN: &str = "eyJhbGciOiJIUzI1NiIsInR5cCI6IkpXVCJ9.\
        eyJ1c2VyX2lkIjoidTQyIiwibmFtZSI6IkdyYWNlIiwiYWN0aW9uIjoiZW50ZXIiLCJleHAiOjE4OTM0NTYwMDB9.\
        mePJ3VtN481_XEKGqBe-upNuaE0sZ6gx5kypWwDzfBY";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()
    }

    fn secret() -> SecretString {
        SecretString::from("test-secret")
    }

    fn sign(claims: &AccessClaims) -> String {
        TokenSigner::new(secret()).sign(claims).unwrap()
    }

    #[test]
    fn accepts_library_issued_token() {
        let verifier = TokenVerifier::new(SecretString::from("devsecret"));
        let claims = verifier.verify(LIBRARY_TOKEN, now()).unwrap();

        assert_eq!(claims.user_id, "u42");
        assert_eq!(claims.name.as_deref(), Some("Grace"));
        assert_eq!(claims.action.as_deref(), Some("enter"));
        assert_eq!(claims.camera_id, None);
    }

    #[test]
    fn signed_header_matches_constant() {
        let decoded = URL_SAFE_NO_PAD.decode(ENCODED_HEADER).unwrap();
        assert_eq!(decoded, br#"{"alg":"HS256","typ":"JWT"}"#);
    }

    #[test]
    fn round_trips_optional_claims() {
        let claims = AccessClaims::new("u1", now() + ChronoDuration::minutes(5))
            .with_name("Ada")
            .with_camera("gate-2")
            .with_action("enter");

        let verified = TokenVerifier::new(secret()).verify(&sign(&claims), now()).unwrap();
        assert_eq!(verified, claims);
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = sign(&AccessClaims::new("u1", now() + ChronoDuration::minutes(5)));
        let verifier = TokenVerifier::new(SecretString::from("other-secret"));

        assert_eq!(verifier.verify(&token, now()), Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn rejects_tampered_payload() {
        let token = sign(&AccessClaims::new("u1", now() + ChronoDuration::minutes(5)));
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":"admin","exp":4102444800}"#);
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_payload;
        let forged = parts.join(".");

        let result = TokenVerifier::new(secret()).verify(&forged, now());
        assert_eq!(result, Err(VerificationError::InvalidSignature));
    }

    #[test]
    fn rejects_expired_token() {
        let token = sign(&AccessClaims::new("u1", now() - ChronoDuration::minutes(5)));
        let result = TokenVerifier::new(secret()).verify(&token, now());
        assert_eq!(result, Err(VerificationError::Expired));
    }

    #[test]
    fn leeway_covers_small_clock_skew() {
        let token = sign(&AccessClaims::new("u1", now() - ChronoDuration::seconds(30)));

        assert!(TokenVerifier::new(secret()).verify(&token, now()).is_ok());

        let strict = TokenVerifier::new(secret()).with_leeway(Duration::ZERO);
        assert_eq!(strict.verify(&token, now()), Err(VerificationError::Expired));
    }

    #[test]
    fn rejects_token_used_before_nbf() {
        let claims = AccessClaims::new("u1", now() + ChronoDuration::hours(2))
            .not_before(now() + ChronoDuration::hours(1));
        let result = TokenVerifier::new(secret()).verify(&sign(&claims), now());
        assert_eq!(result, Err(VerificationError::NotYetValid));
    }

    #[test]
    fn rejects_alg_none() {
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":"u1","exp":4102444800}"#);
        let token = format!("{header}.{payload}.");

        let result = TokenVerifier::new(secret()).verify(&token, now());
        assert_eq!(result, Err(VerificationError::UnsupportedAlgorithm("none".to_string())));
    }

    #[test]
    fn rejects_malformed_tokens() {
        let verifier = TokenVerifier::new(secret());

        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.???.***"] {
            assert!(
                matches!(verifier.verify(token, now()), Err(VerificationError::Malformed(_))),
                "token {token:?} should be malformed"
            );
        }
    }

    #[test]
    fn rejects_missing_exp() {
        let payload = URL_SAFE_NO_PAD.encode(br#"{"user_id":"u1"}"#);
        let mut mac = mac_for(&secret()).unwrap();
        mac.update(ENCODED_HEADER.as_bytes());
        mac.update(b".");
        mac.update(payload.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        let token = format!("{ENCODED_HEADER}.{payload}.{signature}");

        let result = TokenVerifier::new(secret()).verify(&token, now());
        assert!(matches!(result, Err(VerificationError::Malformed(_))));
    }

    #[test]
    fn rejects_empty_user_id() {
        let token = sign(&AccessClaims::new("  ", now() + ChronoDuration::minutes(5)));
        let result = TokenVerifier::new(secret()).verify(&token, now());
        assert!(matches!(result, Err(VerificationError::Malformed(_))));
    }

    #[test]
    fn debug_output_redacts_secret() {
        let rendered = format!("{:?}", TokenVerifier::new(secret()));
        assert!(!rendered.contains("test-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
