//! Account switching.
//!
//! A switch refreshes the target account's token, applies its device
//! profile and patches the host's state database. When the database is
//! locked (usually because the host is running) the switch is journaled to
//! a single-slot pending file and replayed once on the next start.

mod error;
mod orchestrator;
mod pending;
mod phase;

pub use error::SwitchError;
pub use orchestrator::{
    ExpiryReason, RecoveryOutcome, SwitchOrchestrator, SwitchOutcome, SwitchSettings,
};
pub use pending::{PENDING_SWITCH_FILE, PendingIntentStore, PendingSwitchIntent};
pub use phase::SwitchPhase;
