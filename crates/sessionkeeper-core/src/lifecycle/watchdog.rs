//! Expiry watchdog: one pending expiry action at a time.
//!
//! The watchdog itself holds no timer. It records which credential it is
//! armed for and when that credential expires; the session driver sleeps
//! until [`ExpiryWatchdog::deadline`] and then calls [`ExpiryWatchdog::fire`].
//! Re-arming replaces the previous arming, so a stale expiry can never act on
//! a credential that was renewed in the meantime.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::auth::{inspector, Credential};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Armed {
    credential: Credential,
    expires_at: DateTime<Utc>,
}

/// Result of re-evaluating the watchdog after a store change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rearm {
    /// No credential, nothing pending
    Disarmed,
    /// One-shot expiry pending at this instant
    Armed(DateTime<Utc>),
    /// Credential already expired or undecodable; clear it now
    ExpireNow,
}

/// Result of the pending expiry timer elapsing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fire {
    /// The armed credential has expired and is still current; clear it
    Expire,
    /// Timer woke early; keep waiting for the same deadline
    NotYet(DateTime<Utc>),
    /// Nothing armed, or the armed credential is no longer current
    Stale,
}

#[derive(Debug, Default)]
pub struct ExpiryWatchdog {
    armed: Option<Armed>,
}

impl ExpiryWatchdog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending expiry and arm against `current`.
    pub fn rearm(&mut self, current: Option<&Credential>, now: DateTime<Utc>) -> Rearm {
        self.armed = None;

        let Some(credential) = current else {
            return Rearm::Disarmed;
        };
        let claims = match inspector::decode(credential) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(error = %e, "Stored credential does not decode");
                return Rearm::ExpireNow;
            }
        };
        if claims.is_expired(now) {
            return Rearm::ExpireNow;
        }

        self.armed = Some(Armed {
            credential: credential.clone(),
            expires_at: claims.expires_at,
        });
        Rearm::Armed(claims.expires_at)
    }

    pub fn disarm(&mut self) {
        self.armed = None;
    }

    /// Called when the pending timer elapses.
    ///
    /// Only expires when the armed credential is still the current one.
    pub fn fire(&mut self, current: Option<&Credential>, now: DateTime<Utc>) -> Fire {
        let Some(armed) = self.armed.as_ref() else {
            return Fire::Stale;
        };
        if current != Some(&armed.credential) {
            self.armed = None;
            return Fire::Stale;
        }
        if now < armed.expires_at {
            return Fire::NotYet(armed.expires_at);
        }
        self.armed = None;
        Fire::Expire
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.armed.as_ref().map(|a| a.expires_at)
    }

    pub fn is_pending(&self) -> bool {
        self.armed.is_some()
    }
}
