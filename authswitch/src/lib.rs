//! authswitch library crate.
//!
//! Switches the account the Antigravity editor is signed in with by
//! splicing OAuth credentials into its SQLite state database. When the
//! database is locked the switch is journaled and replayed on next start.

pub mod accounts;
pub mod config;
pub mod credentials;
pub mod device;
pub mod domain;
pub mod error;
pub mod logging;
pub mod selection;
pub mod state_db;
pub mod switch;
pub mod utils;

pub use error::{Error, Result};
