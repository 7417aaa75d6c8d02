//! Session lifecycle: expiry watchdog, activity-gated renewer and the facade
//! that owns them.
//!
//! All timers live in a single driver task spawned by
//! [`SessionFacade::start`]. Facade methods mutate shared state synchronously
//! and poke the driver over a channel so it re-reads the armed expiry.

mod driver;
pub mod facade;
pub mod renewer;
pub mod watchdog;

pub use facade::{EndReason, SessionError, SessionFacade, SessionSettings};
pub use renewer::{ActivityGatedRenewer, RenewalError, RenewalOutcome, RenewerPhase, TickOutcome};
pub use watchdog::ExpiryWatchdog;
