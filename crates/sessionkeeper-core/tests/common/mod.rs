#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use sessionkeeper_core::{ApiError, Credential, EndReason, RenewalBackend, SessionFacade};

/// Whole-second anchor so JWT `exp` claims line up exactly with timers
pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .expect("valid timestamp")
}

pub fn token(subject: &str, expires_at: DateTime<Utc>) -> Credential {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({"id": subject, "exp": expires_at.timestamp()}).to_string(),
    );
    Credential::new(format!("{}.{}.c2lnbmF0dXJl", header, payload))
}

pub fn expiring_in(secs: i64) -> Credential {
    token("reader-1", epoch() + chrono::Duration::seconds(secs))
}

/// Let spawned tasks run without moving time meaningfully
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Backend answering from a queue, optionally held until released
#[derive(Default)]
pub struct ScriptedBackend {
    pub calls: Mutex<Vec<(String, Credential)>>,
    responses: Mutex<VecDeque<Result<Credential, ApiError>>>,
    gate: Option<Arc<Notify>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every request waits for `gate.notify_one()` before answering
    pub fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn respond(&self, response: Result<Credential, ApiError>) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl RenewalBackend for ScriptedBackend {
    async fn refresh_token(
        &self,
        subject_id: &str,
        credential: &Credential,
    ) -> Result<Credential, ApiError> {
        self.calls
            .lock()
            .push((subject_id.to_string(), credential.clone()));
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::InvalidResponse("no scripted response".to_string())))
    }
}

/// Records every session-ended notification
#[derive(Clone, Default)]
pub struct EndedLog {
    count: Arc<AtomicUsize>,
    reasons: Arc<Mutex<Vec<EndReason>>>,
}

impl EndedLog {
    pub fn attach(facade: &SessionFacade) -> Self {
        let log = Self::default();
        let sink = log.clone();
        facade.on_session_ended(move |reason| {
            sink.count.fetch_add(1, Ordering::SeqCst);
            sink.reasons.lock().push(reason);
        });
        log
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn reasons(&self) -> Vec<EndReason> {
        self.reasons.lock().clone()
    }
}
