//! Activity-gated renewal state machine.
//!
//! Each tick moves `Idle -> Checking` and decides whether to renew. A renewal
//! is requested only when the credential is inside the renewal threshold AND
//! the user has interacted since the previous tick. The HTTP call itself is
//! performed by the session driver; this type only decides and then judges
//! the result against the store's current credential.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::api::ApiError;
use crate::auth::{inspector, Credential, DecodeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewerPhase {
    Idle,
    Checking,
    RenewalInFlight,
}

/// A renewal the driver should send to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenewalRequest {
    /// The credential authorizing the request; also the currency check key
    pub credential: Credential,
    pub subject_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    NoCredential,
    /// Already past expiry; the watchdog owns this credential now
    Expired,
    TooEarly,
    Inactive,
    /// A previous renewal has not completed yet
    InFlight,
    Renew(RenewalRequest),
}

#[derive(Error, Debug)]
pub enum RenewalError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Backend returned an undecodable token: {0}")]
    InvalidToken(#[from] DecodeError),
}

#[derive(Debug)]
pub enum RenewalOutcome {
    /// Install this credential into the store
    Installed(Credential),
    /// The authorizing credential is no longer current; result dropped
    Superseded,
    Failed(RenewalError),
}

#[derive(Debug)]
pub struct ActivityGatedRenewer {
    threshold: chrono::Duration,
    phase: RenewerPhase,
    activity: bool,
}

impl ActivityGatedRenewer {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold: chrono::Duration::from_std(threshold)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            phase: RenewerPhase::Idle,
            activity: false,
        }
    }

    pub fn phase(&self) -> RenewerPhase {
        self.phase
    }

    pub fn activity(&self) -> bool {
        self.activity
    }

    pub fn record_activity(&mut self) {
        self.activity = true;
    }

    /// Run one periodic check. The activity flag is always reset.
    pub fn tick(&mut self, current: Option<&Credential>, now: DateTime<Utc>) -> TickOutcome {
        if self.phase == RenewerPhase::RenewalInFlight {
            self.activity = false;
            return TickOutcome::InFlight;
        }

        self.phase = RenewerPhase::Checking;
        let outcome = self.check(current, now);
        self.activity = false;
        self.phase = match outcome {
            TickOutcome::Renew(_) => RenewerPhase::RenewalInFlight,
            _ => RenewerPhase::Idle,
        };
        outcome
    }

    fn check(&self, current: Option<&Credential>, now: DateTime<Utc>) -> TickOutcome {
        let Some(credential) = current else {
            return TickOutcome::NoCredential;
        };
        let Ok(claims) = inspector::decode(credential) else {
            return TickOutcome::NoCredential;
        };
        if claims.is_expired(now) {
            return TickOutcome::Expired;
        }
        if claims.time_until_expiry(now) >= self.threshold {
            return TickOutcome::TooEarly;
        }
        if !self.activity {
            return TickOutcome::Inactive;
        }
        TickOutcome::Renew(RenewalRequest {
            credential: credential.clone(),
            subject_id: claims.subject_id,
        })
    }

    /// Judge a finished renewal against the store's current credential.
    pub fn complete(
        &mut self,
        request: &RenewalRequest,
        result: Result<Credential, ApiError>,
        current: Option<&Credential>,
    ) -> RenewalOutcome {
        self.phase = RenewerPhase::Idle;

        let renewed = match result {
            Ok(renewed) => renewed,
            Err(e) => return RenewalOutcome::Failed(e.into()),
        };
        if let Err(e) = inspector::decode(&renewed) {
            return RenewalOutcome::Failed(e.into());
        }
        if current != Some(&request.credential) {
            debug!(subject_id = %request.subject_id, "Renewal superseded by a newer store write");
            return RenewalOutcome::Superseded;
        }
        RenewalOutcome::Installed(renewed)
    }

    /// Forget an in-flight renewal whose task died without a result
    pub fn abandon(&mut self) {
        self.phase = RenewerPhase::Idle;
    }
}
