//! Request credentials: static bearer tokens and short-lived HS256 JWTs.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{JobError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Validity window of a signed token.
pub const TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// How far `nbf` is back-dated to absorb client/server clock drift.
pub const CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Claims embedded in a signed token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
}

/// A compact JWT together with its decoded timing.
#[derive(Debug, Clone)]
pub struct SignedToken {
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SignedToken {
    /// Time left before expiry at `now`; zero once expired.
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Signs HS256 tokens from an access key / secret key pair.
#[derive(Clone)]
pub struct JwtSigner {
    access_key: String,
    secret_key: String,
}

impl std::fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtSigner")
            .field("access_key", &self.access_key)
            .finish_non_exhaustive()
    }
}

impl JwtSigner {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Result<Self> {
        let access_key = access_key.into();
        let secret_key = secret_key.into();
        if access_key.trim().is_empty() || secret_key.trim().is_empty() {
            return Err(JobError::Configuration(
                "access key and secret key must both be non-empty".into(),
            ));
        }
        Ok(Self {
            access_key,
            secret_key,
        })
    }

    /// Parse a compound `ACCESS_KEY:SECRET_KEY` string.
    pub fn from_compound(key: &str) -> Result<Self> {
        if key.trim().is_empty() {
            return Err(JobError::Configuration("API key is empty".into()));
        }
        let (access, secret) = key.split_once(':').ok_or_else(|| {
            JobError::Configuration("API key must be in format ACCESS_KEY:SECRET_KEY".into())
        })?;
        Self::new(access, secret)
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    /// Sign a token issued now.
    pub fn sign(&self) -> Result<SignedToken> {
        self.sign_at(Utc::now())
    }

    /// Sign a token issued at `now`. Same inputs always give the same token.
    pub fn sign_at(&self, now: DateTime<Utc>) -> Result<SignedToken> {
        let iat = now.timestamp();
        let claims = Claims {
            iss: self.access_key.clone(),
            iat,
            exp: iat + TOKEN_TTL.as_secs() as i64,
            nbf: iat - CLOCK_SKEW.as_secs() as i64,
        };

        let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
        let header_b64 = encode_segment(&header)?;
        let claims_b64 = encode_segment(&claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let digest = self.mac(signing_input.as_bytes())?.finalize().into_bytes();
        let signature = URL_SAFE_NO_PAD.encode(digest);

        Ok(SignedToken {
            token: format!("{signing_input}.{signature}"),
            issued_at: timestamp(claims.iat)?,
            expires_at: timestamp(claims.exp)?,
        })
    }

    /// Check signature and validity window of `token` at `now`.
    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Claims> {
        let mut parts = token.split('.');
        let (Some(header_b64), Some(claims_b64), Some(sig_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(JobError::Auth("token is not a three-part JWT".into()));
        };

        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|e| JobError::Auth(format!("invalid signature encoding: {e}")))?;
        self.mac(format!("{header_b64}.{claims_b64}").as_bytes())?
            .verify_slice(&signature)
            .map_err(|_| JobError::Auth("signature mismatch".into()))?;

        let raw = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|e| JobError::Auth(format!("invalid claims encoding: {e}")))?;
        let claims: Claims = serde_json::from_slice(&raw)
            .map_err(|e| JobError::Auth(format!("invalid claims: {e}")))?;

        let ts = now.timestamp();
        if ts < claims.nbf {
            return Err(JobError::Auth("token not yet valid".into()));
        }
        if ts >= claims.exp {
            return Err(JobError::Auth("token expired".into()));
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .map_err(|e| JobError::Auth(format!("invalid signing key: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

fn encode_segment<T: Serialize>(value: &T) -> Result<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| JobError::Auth(format!("failed to encode token segment: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| JobError::Auth(format!("timestamp out of range: {secs}")))
}

/// Authentication presented on every request.
#[derive(Debug, Clone)]
pub enum Credential {
    /// Long-lived opaque bearer token.
    Static(String),
    /// Short-lived token re-signed whenever it runs low.
    Signed {
        signer: JwtSigner,
        token: SignedToken,
    },
}

impl Credential {
    /// Static bearer token; rejects empty tokens.
    pub fn bearer(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(JobError::Configuration("API token is empty".into()));
        }
        Ok(Credential::Static(token))
    }

    /// Signed credential with a freshly issued token.
    pub fn signed(signer: JwtSigner) -> Result<Self> {
        let token = signer.sign()?;
        Ok(Credential::Signed { signer, token })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        match self {
            Credential::Static(_) => true,
            Credential::Signed { token, .. } => now < token.expires_at,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    /// Remaining validity; `None` for credentials that never expire.
    pub fn remaining_validity(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Credential::Static(_) => None,
            Credential::Signed { token, .. } => Some(token.remaining_at(now)),
        }
    }

    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        match self {
            Credential::Static(token) => format!("Bearer {token}"),
            Credential::Signed { token, .. } => format!("Bearer {}", token.token),
        }
    }

    /// Re-sign when less than `min_remaining` validity is left at `now`.
    /// Returns whether a new token was issued.
    pub fn refresh_if_needed_at(
        &mut self,
        min_remaining: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        match self {
            Credential::Static(_) => Ok(false),
            Credential::Signed { signer, token } => {
                let expired = now >= token.expires_at;
                if !expired && token.remaining_at(now) >= min_remaining {
                    return Ok(false);
                }
                *token = signer.sign_at(now)?;
                tracing::debug!(
                    expires_at = %token.expires_at,
                    "Re-signed API token"
                );
                Ok(true)
            }
        }
    }

    pub fn refresh_if_needed(&mut self, min_remaining: Duration) -> Result<bool> {
        self.refresh_if_needed_at(min_remaining, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn signer() -> JwtSigner {
        JwtSigner::new("ak-test", "sk-test").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_compound_key_parsing() {
        let s = JwtSigner::from_compound("ak:sk:with:colons").unwrap();
        assert_eq!(s.access_key(), "ak");

        for bad in ["", "   ", "no-separator", ":sk", "ak:"] {
            let err = JwtSigner::from_compound(bad).unwrap_err();
            assert!(
                matches!(err, JobError::Configuration(_)),
                "{bad:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn test_token_shape_and_claims() {
        let token = signer().sign_at(t0()).unwrap();
        assert_eq!(token.token.split('.').count(), 3);
        assert_eq!(token.issued_at, t0());
        assert_eq!(token.expires_at, t0() + chrono::Duration::minutes(30));

        let header = URL_SAFE_NO_PAD
            .decode(token.token.split('.').next().unwrap())
            .unwrap();
        let header: serde_json::Value = serde_json::from_slice(&header).unwrap();
        assert_eq!(header["alg"], "HS256");
        assert_eq!(header["typ"], "JWT");

        let claims = signer().verify_at(&token.token, t0()).unwrap();
        assert_eq!(claims.iss, "ak-test");
        assert_eq!(claims.nbf, t0().timestamp() - 5);
        assert_eq!(claims.exp, t0().timestamp() + 1800);
    }

    #[test]
    fn test_validity_boundaries() {
        let s = signer();
        let token = s.sign_at(t0()).unwrap();

        assert!(s.verify_at(&token.token, t0()).is_ok());
        // Back-dated nbf tolerates a slightly slow server clock.
        assert!(s.verify_at(&token.token, t0() - chrono::Duration::seconds(5)).is_ok());
        assert!(s.verify_at(&token.token, t0() - chrono::Duration::seconds(6)).is_err());
        assert!(s.verify_at(&token.token, t0() + chrono::Duration::seconds(1799)).is_ok());
        assert!(matches!(
            s.verify_at(&token.token, t0() + chrono::Duration::seconds(1800)),
            Err(JobError::Auth(_))
        ));
    }

    #[test]
    fn test_signing_is_deterministic_and_time_dependent() {
        let s = signer();
        let a = s.sign_at(t0()).unwrap();
        let b = s.sign_at(t0()).unwrap();
        let c = s.sign_at(t0() + chrono::Duration::seconds(1)).unwrap();
        assert_eq!(a.token, b.token);
        assert_ne!(a.token, c.token);
        assert!(c.issued_at >= a.issued_at);
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let s = signer();
        let token = s.sign_at(t0()).unwrap();

        let other = JwtSigner::new("ak-test", "another-secret").unwrap();
        assert!(other.verify_at(&token.token, t0()).is_err());

        let forged = URL_SAFE_NO_PAD.encode(br#"{"iss":"x","iat":0,"exp":9999999999,"nbf":0}"#);
        let mut parts: Vec<&str> = token.token.split('.').collect();
        parts[1] = &forged;
        assert!(s.verify_at(&parts.join("."), t0()).is_err());

        assert!(s.verify_at("only.two", t0()).is_err());
    }

    #[test]
    fn test_static_credential() {
        let mut cred = Credential::bearer("r8_token").unwrap();
        assert_eq!(cred.header_value(), "Bearer r8_token");
        assert!(cred.is_valid());
        assert!(cred.remaining_validity(Utc::now()).is_none());
        assert!(!cred.refresh_if_needed(Duration::from_secs(3600)).unwrap());

        assert!(matches!(
            Credential::bearer(""),
            Err(JobError::Configuration(_))
        ));
    }

    #[test]
    fn test_signed_credential_refresh() {
        let s = signer();
        let mut cred = Credential::Signed {
            token: s.sign_at(t0()).unwrap(),
            signer: s.clone(),
        };
        let first = cred.header_value();

        // Plenty of validity left: no refresh.
        let later = t0() + chrono::Duration::minutes(10);
        assert!(!cred.refresh_if_needed_at(Duration::from_secs(5), later).unwrap());
        assert_eq!(cred.header_value(), first);

        // Less than one poll interval left: re-signed.
        let near_expiry = t0() + chrono::Duration::seconds(1798);
        assert!(cred.is_valid_at(near_expiry));
        assert!(cred.refresh_if_needed_at(Duration::from_secs(5), near_expiry).unwrap());
        assert_ne!(cred.header_value(), first);
        assert_eq!(cred.remaining_validity(near_expiry), Some(TOKEN_TTL));

        // Expired tokens are never presented again.
        let mut expired = Credential::Signed {
            token: s.sign_at(t0()).unwrap(),
            signer: s,
        };
        let past_expiry = t0() + chrono::Duration::hours(1);
        assert!(!expired.is_valid_at(past_expiry));
        assert!(expired.refresh_if_needed_at(Duration::ZERO, past_expiry).unwrap());
        assert!(expired.is_valid_at(past_expiry));
    }

    #[test]
    fn test_signer_debug_hides_secret() {
        let debug = format!("{:?}", signer());
        assert!(debug.contains("ak-test"));
        assert!(!debug.contains("sk-test"));
    }
}
