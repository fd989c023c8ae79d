//! sudolikeaboss
//!
//! Fetches a password from the 1Password extension helper so it can be used
//! as a sudo askpass program or piped into other tools.

pub mod channel;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;
pub mod state;
pub mod transport;

pub use client::{Mode, Outcome, Request, execute, run, with_deadline};
pub use config::Config;
pub use error::{Error, Result};
