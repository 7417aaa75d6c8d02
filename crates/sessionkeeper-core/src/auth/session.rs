use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{inspector, Credential};

/// Derived view of the current session; computed on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(tag = "state", content = "subjectId", rename_all = "camelCase")]
pub enum SessionState {
    Unauthenticated,
    Authenticated(String),
    Expired,
}

impl SessionState {
    /// Derive the state from the stored credential at `now`.
    ///
    /// A credential that fails to decode counts as no credential at all.
    pub fn derive(credential: Option<&Credential>, now: DateTime<Utc>) -> Self {
        let Some(claims) = credential.and_then(|c| inspector::decode(c).ok()) else {
            return SessionState::Unauthenticated;
        };
        if claims.is_expired(now) {
            SessionState::Expired
        } else {
            SessionState::Authenticated(claims.subject_id)
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    pub fn subject_id(&self) -> Option<&str> {
        match self {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::inspector::tests::token_expiring;
    use chrono::Duration;

    #[test]
    fn test_derive_states() {
        let now = Utc::now();
        let live = token_expiring("reader-1", now + Duration::minutes(10));
        let stale = token_expiring("reader-1", now - Duration::minutes(10));

        assert_eq!(SessionState::derive(None, now), SessionState::Unauthenticated);
        assert_eq!(
            SessionState::derive(Some(&live), now),
            SessionState::Authenticated("reader-1".to_string())
        );
        assert_eq!(SessionState::derive(Some(&stale), now), SessionState::Expired);
        assert_eq!(
            SessionState::derive(Some(&Credential::from("not-a-token")), now),
            SessionState::Unauthenticated
        );
    }

    #[test]
    fn test_subject_id_only_when_authenticated() {
        assert_eq!(
            SessionState::Authenticated("a".to_string()).subject_id(),
            Some("a")
        );
        assert_eq!(SessionState::Expired.subject_id(), None);
        assert!(!SessionState::Expired.is_authenticated());
    }

    #[test]
    fn test_serializes_for_frontend() {
        let json = serde_json::to_value(SessionState::Authenticated("u9".to_string()))
            .expect("serialize");
        assert_eq!(json, serde_json::json!({"state": "authenticated", "subjectId": "u9"}));
    }
}
