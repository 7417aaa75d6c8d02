//! Session facade: the single entry point application code uses.
//!
//! The facade owns the credential store, the expiry watchdog and the renewer
//! behind one lock, so every read-then-write (the renewal currency check, the
//! present-to-absent dedup of session-ended notifications) happens in a
//! single critical section. Listener callbacks always run after the lock is
//! released.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, RenewalBackend};
use crate::auth::{
    inspector, Credential, CredentialStore, DecodeError, FileCredentialStore,
    KeyringCredentialStore, SessionState,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StorageBackend};

use super::driver;
use super::renewer::{ActivityGatedRenewer, RenewalOutcome, RenewalRequest, RenewerPhase, TickOutcome};
use super::watchdog::{ExpiryWatchdog, Fire, Rearm};

/// Buffer size for driver commands.
/// Commands only wake the driver, so a full buffer already implies a pending wake-up.
const COMMAND_BUFFER_SIZE: usize = 32;

/// Why a session ended; lets the UI choose between "expired" and "logged out"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    Expired,
    LoggedOut,
}

pub type SessionEndedCallback = Arc<dyn Fn(EndReason) + Send + Sync>;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Credential rejected: {0}")]
    Invalid(#[from] DecodeError),

    #[error("Credential already expired at {0}")]
    AlreadyExpired(DateTime<Utc>),
}

/// Renewal timing, normally taken from [`Config`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub renewal_threshold: Duration,
    pub tick_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            renewal_threshold: config.renewal_threshold(),
            tick_interval: config.tick_interval(),
        }
    }
}

pub(super) enum DriverCommand {
    /// The armed expiry may have changed
    Rearm,
    /// Run a renewal check immediately
    Tick,
}

/// Listeners captured under the lock, notified after it is released
#[must_use]
struct Ended {
    reason: EndReason,
    listeners: Vec<SessionEndedCallback>,
}

impl Ended {
    fn notify(self) {
        info!(reason = ?self.reason, listeners = self.listeners.len(), "Session ended");
        for listener in &self.listeners {
            listener(self.reason);
        }
    }
}

struct Inner {
    store: Box<dyn CredentialStore>,
    watchdog: ExpiryWatchdog,
    renewer: ActivityGatedRenewer,
    listeners: Vec<SessionEndedCallback>,
}

impl Inner {
    /// Clear the store, but only report a transition from present to absent
    fn end_session(&mut self, reason: EndReason) -> Option<Ended> {
        self.store.get()?;
        self.store.clear();
        self.watchdog.disarm();
        Some(Ended {
            reason,
            listeners: self.listeners.clone(),
        })
    }

    fn rearm(&mut self, now: DateTime<Utc>) -> Option<Ended> {
        let current = self.store.get();
        match self.watchdog.rearm(current.as_ref(), now) {
            Rearm::ExpireNow => self.end_session(EndReason::Expired),
            Rearm::Armed(at) => {
                debug!(expires_at = %at, "Expiry watchdog armed");
                None
            }
            Rearm::Disarmed => None,
        }
    }
}

/// State shared between the facade and its driver task
pub(super) struct Shared {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    renewals: watch::Sender<u64>,
}

impl Shared {
    pub(super) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(super) fn expiry_deadline(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().watchdog.deadline()
    }

    fn end_session(&self, reason: EndReason) -> bool {
        let ended = self.inner.lock().end_session(reason);
        match ended {
            Some(ended) => {
                ended.notify();
                true
            }
            None => false,
        }
    }

    pub(super) fn fire_expiry(&self) {
        let now = self.now();
        let ended = {
            let mut inner = self.inner.lock();
            let current = inner.store.get();
            match inner.watchdog.fire(current.as_ref(), now) {
                Fire::Expire => inner.end_session(EndReason::Expired),
                Fire::NotYet(at) => {
                    debug!(expires_at = %at, "Expiry timer woke early");
                    None
                }
                Fire::Stale => {
                    debug!("Expiry timer no longer matches the stored credential");
                    None
                }
            }
        };
        if let Some(ended) = ended {
            ended.notify();
        }
    }

    pub(super) fn tick(&self) -> Option<RenewalRequest> {
        let now = self.now();
        let mut inner = self.inner.lock();
        let current = inner.store.get();
        match inner.renewer.tick(current.as_ref(), now) {
            TickOutcome::Renew(request) => {
                info!(subject_id = %request.subject_id, "Renewing credential");
                Some(request)
            }
            outcome => {
                debug!(?outcome, "Renewal check");
                None
            }
        }
    }

    pub(super) fn complete_renewal(
        &self,
        request: RenewalRequest,
        result: Result<Credential, ApiError>,
    ) {
        let now = self.now();
        let ended = {
            let mut inner = self.inner.lock();
            let current = inner.store.get();
            match inner.renewer.complete(&request, result, current.as_ref()) {
                RenewalOutcome::Installed(renewed) => {
                    inner.store.set(renewed);
                    let ended = inner.rearm(now);
                    self.renewals.send_modify(|count| *count += 1);
                    info!(subject_id = %request.subject_id, "Credential renewed");
                    ended
                }
                RenewalOutcome::Superseded => {
                    debug!("Discarding renewal for a credential that is no longer current");
                    None
                }
                RenewalOutcome::Failed(e) => {
                    warn!(error = %e, "Credential renewal failed; retrying on a later tick");
                    None
                }
            }
        };
        if let Some(ended) = ended {
            ended.notify();
        }
    }

    pub(super) fn abandon_renewal(&self) {
        self.inner.lock().renewer.abandon();
    }
}

/// Session lifecycle manager.
///
/// Must be started inside a tokio runtime. Dropping the facade cancels all
/// timers; [`SessionFacade::shutdown`] additionally waits for the driver.
pub struct SessionFacade {
    shared: Arc<Shared>,
    commands: mpsc::Sender<DriverCommand>,
    cancel: CancellationToken,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl SessionFacade {
    /// Evaluate the stored credential and start the session driver.
    ///
    /// A stale or undecodable credential found in the store is cleared before
    /// this returns, with no timer left pending.
    pub fn start(
        settings: SessionSettings,
        store: Box<dyn CredentialStore>,
        backend: Arc<dyn RenewalBackend>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut inner = Inner {
            store,
            watchdog: ExpiryWatchdog::new(),
            renewer: ActivityGatedRenewer::new(settings.renewal_threshold),
            listeners: Vec::new(),
        };
        // Nobody can be listening yet, so a stale credential is dropped silently
        if inner.rearm(clock.now()).is_some() {
            info!("Discarded expired credential from storage");
        }

        let (renewals, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            inner: Mutex::new(inner),
            clock,
            renewals,
        });
        let (commands, rx) = mpsc::channel(COMMAND_BUFFER_SIZE);
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(driver::run(
            Arc::clone(&shared),
            backend,
            rx,
            cancel.clone(),
            settings.tick_interval,
        ));

        Self {
            shared,
            commands,
            cancel,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Build the store and API client described by `config` and start.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Box<dyn CredentialStore> = match config.storage {
            StorageBackend::File => Box::new(FileCredentialStore::open(config.cache_dir()?)),
            StorageBackend::Keyring => Box::new(
                KeyringCredentialStore::open(&config.keyring_account)
                    .context("Failed to open keychain credential store")?,
            ),
        };
        let backend = ApiClient::new(config.backend_url.clone(), config.request_timeout())?;

        Ok(Self::start(
            SessionSettings::from(config),
            store,
            Arc::new(backend),
            Arc::new(SystemClock),
        ))
    }

    /// True when a decodable, unexpired credential is stored right now
    pub fn is_authenticated(&self) -> bool {
        self.state().is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        let now = self.shared.now();
        let current = self.shared.inner.lock().store.get();
        SessionState::derive(current.as_ref(), now)
    }

    pub fn subject_id(&self) -> Option<String> {
        match self.state() {
            SessionState::Authenticated(id) => Some(id),
            _ => None,
        }
    }

    pub fn credential(&self) -> Option<Credential> {
        self.shared.inner.lock().store.get()
    }

    pub fn time_until_expiry(&self) -> Option<chrono::Duration> {
        let now = self.shared.now();
        let credential = self.credential()?;
        inspector::decode(&credential)
            .ok()
            .map(|claims| claims.time_until_expiry(now))
    }

    /// Register a callback fired once per session end (expiry or logout)
    pub fn on_session_ended<F>(&self, callback: F)
    where
        F: Fn(EndReason) + Send + Sync + 'static,
    {
        self.shared.inner.lock().listeners.push(Arc::new(callback));
    }

    /// Synchronously clear the credential and notify listeners.
    ///
    /// Calling this without a stored credential does nothing.
    pub fn logout(&self) {
        if self.shared.end_session(EndReason::LoggedOut) {
            self.poke(DriverCommand::Rearm);
        } else {
            debug!("Logout without an active session");
        }
    }

    /// Install a freshly issued credential from the login flow.
    pub fn install(&self, credential: Credential) -> Result<(), SessionError> {
        let now = self.shared.now();
        let claims = inspector::decode(&credential)?;
        if claims.is_expired(now) {
            return Err(SessionError::AlreadyExpired(claims.expires_at));
        }

        let ended = {
            let mut inner = self.shared.inner.lock();
            inner.store.set(credential);
            inner.rearm(now)
        };
        self.poke(DriverCommand::Rearm);
        if let Some(ended) = ended {
            // Clock moved past expiry between the check and the rearm
            ended.notify();
            return Err(SessionError::AlreadyExpired(claims.expires_at));
        }
        info!(subject_id = %claims.subject_id, "Credential installed");
        Ok(())
    }

    /// Re-check the stored credential, clearing it if no longer valid.
    pub fn revalidate(&self) -> SessionState {
        let now = self.shared.now();
        let ended = {
            let mut inner = self.shared.inner.lock();
            match inner.store.get() {
                Some(current) if !inspector::is_valid(&current, now) => {
                    inner.end_session(EndReason::Expired)
                }
                _ => None,
            }
        };
        if let Some(ended) = ended {
            ended.notify();
            self.poke(DriverCommand::Rearm);
        }
        self.state()
    }

    /// Mark user interaction (pointer movement, key press)
    pub fn record_activity(&self) {
        self.shared.inner.lock().renewer.record_activity();
    }

    /// Run a renewal check now instead of waiting for the next tick
    pub fn check_now(&self) {
        self.poke(DriverCommand::Tick);
    }

    /// Counter bumped on every installed renewal
    pub fn renewals(&self) -> watch::Receiver<u64> {
        self.shared.renewals.subscribe()
    }

    pub fn renewal_count(&self) -> u64 {
        *self.shared.renewals.borrow()
    }

    pub fn expiry_deadline(&self) -> Option<DateTime<Utc>> {
        self.shared.expiry_deadline()
    }

    pub fn expiry_pending(&self) -> bool {
        self.shared.inner.lock().watchdog.is_pending()
    }

    pub fn renewal_in_flight(&self) -> bool {
        self.shared.inner.lock().renewer.phase() == RenewerPhase::RenewalInFlight
    }

    /// Cancel all timers and wait for the driver to stop.
    ///
    /// An in-flight renewal is left to finish; its result is dropped.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Session driver ended abnormally");
            }
        }
    }

    fn poke(&self, command: DriverCommand) {
        match self.commands.try_send(command) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("Session driver already stopped");
            }
        }
    }
}

impl Drop for SessionFacade {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
