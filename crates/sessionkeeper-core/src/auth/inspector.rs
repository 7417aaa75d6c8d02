//! Pure decoding of bearer credentials.
//!
//! Credentials are JWTs issued by the backend. Only their shape and claims are
//! inspected here; the signature is verified by the backend on every request,
//! so a credential that fails to decode is simply treated as absent.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

use super::Credential;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Token must have three dot-separated segments, found {0}")]
    SegmentCount(usize),

    #[error("Token signature segment is empty")]
    MissingSignature,

    #[error("Token {segment} is not valid base64url")]
    Base64 { segment: &'static str },

    #[error("Token {segment} is not valid JSON: {message}")]
    Json {
        segment: &'static str,
        message: String,
    },

    #[error("Token expiry is out of range: {0}")]
    ExpiryOutOfRange(i64),
}

/// Claims the session lifecycle cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject_id: String,
    pub expires_at: DateTime<Utc>,
}

impl Claims {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry; negative once expired
    pub fn time_until_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    /// Get minutes remaining until expiry (for display)
    pub fn minutes_until_expiry(&self, now: DateTime<Utc>) -> i64 {
        self.time_until_expiry(now).num_minutes().max(0)
    }
}

#[derive(Deserialize)]
struct Header {
    #[allow(dead_code)]
    alg: String,
}

/// Subject ids are Mongo object ids today, but numeric ids decode too
#[derive(Deserialize)]
#[serde(untagged)]
enum SubjectRepr {
    Text(String),
    Number(i64),
}

/// JWT NumericDate: seconds since the epoch, possibly fractional
#[derive(Deserialize)]
#[serde(untagged)]
enum NumericDate {
    Whole(i64),
    Fractional(f64),
}

impl NumericDate {
    fn to_datetime(&self) -> Result<DateTime<Utc>, DecodeError> {
        let (secs, nanos) = match *self {
            NumericDate::Whole(secs) => (secs, 0),
            NumericDate::Fractional(value) => {
                let secs = value.floor();
                let nanos = ((value - secs) * 1e9) as u32;
                // Saturating cast; out-of-range values are rejected below
                (secs as i64, nanos.min(999_999_999))
            }
        };
        DateTime::<Utc>::from_timestamp(secs, nanos).ok_or(DecodeError::ExpiryOutOfRange(secs))
    }
}

#[derive(Deserialize)]
struct Payload {
    #[serde(alias = "sub")]
    id: SubjectRepr,
    exp: NumericDate,
}

fn decode_segment<T: serde::de::DeserializeOwned>(
    segment: &'static str,
    encoded: &str,
) -> Result<T, DecodeError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|_| DecodeError::Base64 { segment })?;
    serde_json::from_slice(&bytes).map_err(|e| DecodeError::Json {
        segment,
        message: e.to_string(),
    })
}

/// Extract subject and expiry from a credential.
pub fn decode(credential: &Credential) -> Result<Claims, DecodeError> {
    let parts: Vec<&str> = credential.as_str().split('.').collect();
    if parts.len() != 3 {
        return Err(DecodeError::SegmentCount(parts.len()));
    }
    if parts[2].is_empty() {
        return Err(DecodeError::MissingSignature);
    }

    let _header: Header = decode_segment("header", parts[0])?;
    let payload: Payload = decode_segment("payload", parts[1])?;

    let expires_at = payload.exp.to_datetime()?;
    let subject_id = match payload.id {
        SubjectRepr::Text(id) => id,
        SubjectRepr::Number(id) => id.to_string(),
    };

    Ok(Claims {
        subject_id,
        expires_at,
    })
}

/// True when the credential decodes and has not yet expired.
pub fn is_valid(credential: &Credential, now: DateTime<Utc>) -> bool {
    decode(credential)
        .map(|claims| !claims.is_expired(now))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Build an unsigned-but-well-formed token for tests
    pub(crate) fn token_with(payload: serde_json::Value) -> Credential {
        let header = URL_SAFE_NO_PAD.encode(json!({"alg": "HS256", "typ": "JWT"}).to_string());
        let body = URL_SAFE_NO_PAD.encode(payload.to_string());
        Credential::new(format!("{}.{}.c2lnbmF0dXJl", header, body))
    }

    pub(crate) fn token_expiring(subject: &str, expires_at: DateTime<Utc>) -> Credential {
        token_with(json!({"id": subject, "exp": expires_at.timestamp()}))
    }

    #[test]
    fn test_decode_extracts_subject_and_expiry() {
        let claims = decode(&token_with(json!({"id": "64f1c0ffee", "exp": 1_700_000_000})))
            .expect("valid token");
        assert_eq!(claims.subject_id, "64f1c0ffee");
        assert_eq!(claims.expires_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_decode_accepts_fractional_expiry() {
        let claims = decode(&token_with(json!({"id": "u1", "exp": 4_000_000_000.5})))
            .expect("fractional exp is a valid NumericDate");
        assert_eq!(claims.expires_at.timestamp(), 4_000_000_000);
        assert_eq!(claims.expires_at.timestamp_subsec_millis(), 500);

        let before = DateTime::<Utc>::from_timestamp(4_000_000_000, 0).expect("in range");
        assert!(!claims.is_expired(before));
    }

    #[test]
    fn test_decode_rejects_out_of_range_expiry() {
        assert!(matches!(
            decode(&token_with(json!({"id": "u1", "exp": 1e300}))),
            Err(DecodeError::ExpiryOutOfRange(_))
        ));
    }

    #[test]
    fn test_decode_accepts_sub_and_numeric_subject() {
        let claims = decode(&token_with(json!({"sub": 42, "exp": 1_700_000_000})))
            .expect("valid token");
        assert_eq!(claims.subject_id, "42");
    }

    #[test]
    fn test_decode_rejects_malformed_tokens() {
        assert_eq!(decode(&Credential::from("")), Err(DecodeError::SegmentCount(1)));
        assert_eq!(
            decode(&Credential::from("only.two")),
            Err(DecodeError::SegmentCount(2))
        );
        assert!(matches!(
            decode(&Credential::from("!!!.???.sig")),
            Err(DecodeError::Base64 { segment: "header" })
        ));

        let valid = token_with(json!({"id": "u1", "exp": 1_700_000_000}));
        let unsigned = valid.as_str().rsplit_once('.').map(|(head, _)| format!("{}.", head));
        assert_eq!(
            decode(&Credential::new(unsigned.expect("has dots"))),
            Err(DecodeError::MissingSignature)
        );
    }

    #[test]
    fn test_decode_rejects_missing_claims() {
        assert!(matches!(
            decode(&token_with(json!({"id": "u1"}))),
            Err(DecodeError::Json { segment: "payload", .. })
        ));
        assert!(matches!(
            decode(&token_with(json!({"exp": 1_700_000_000}))),
            Err(DecodeError::Json { segment: "payload", .. })
        ));
    }

    #[test]
    fn test_is_valid_boundary() {
        let now = Utc::now();
        let token = token_expiring("u1", now + Duration::seconds(30));
        let expires_at = decode(&token).expect("valid token").expires_at;

        assert!(is_valid(&token, expires_at - Duration::seconds(1)));
        // Expiry instant itself is already invalid
        assert!(!is_valid(&token, expires_at));
        assert!(!is_valid(&token, expires_at + Duration::seconds(1)));
        assert!(!is_valid(&Credential::from("garbage"), now));
    }

    #[test]
    fn test_minutes_until_expiry_clamps_at_zero() {
        let now = Utc::now();
        let claims = Claims {
            subject_id: "u1".to_string(),
            expires_at: now + Duration::minutes(4) + Duration::seconds(30),
        };
        assert_eq!(claims.minutes_until_expiry(now), 4);
        assert_eq!(claims.minutes_until_expiry(now + Duration::hours(1)), 0);
    }
}
