//! One fetch, start to finish, under a deadline.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use tracing::instrument;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::handshake::{Handshake, HandshakeOutcome, RegistrationPolicy};
use crate::state::{self, Identity};
use crate::transport::{self, Transport};

/// What the user asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Show the item picker and return the chosen password.
    Fetch,
    /// Register this client with the helper.
    Register,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Password(String),
    Registered,
    /// `register` against a helper that already knows this client.
    AlreadyRegistered,
}

#[derive(Debug, Clone)]
pub struct Request {
    pub mode: Mode,
    /// URL sent with `showPopup`.
    pub default_host: String,
    pub auto_register: bool,
}

impl Request {
    pub fn from_config(config: &Config, mode: Mode) -> Self {
        Self {
            mode,
            default_host: config.default_host.clone(),
            auto_register: config.auto_register,
        }
    }

    fn policy(&self) -> RegistrationPolicy {
        match self.mode {
            Mode::Register => RegistrationPolicy::Explicit,
            Mode::Fetch if self.auto_register => RegistrationPolicy::IfNew,
            Mode::Fetch => RegistrationPolicy::Never,
        }
    }
}

/// Run `request` over an open transport. The transport is closed on every path.
#[instrument(skip_all, fields(mode = ?request.mode))]
pub async fn execute(
    mut transport: Box<dyn Transport>,
    identity: &Identity,
    request: &Request,
) -> Result<Outcome> {
    let result = drive(transport.as_mut(), identity, request).await;
    if let Err(e) = transport.close().await {
        warn!("Failed to close transport: {e}");
    }
    result
}

async fn drive(
    transport: &mut dyn Transport,
    identity: &Identity,
    request: &Request,
) -> Result<Outcome> {
    let outcome = Handshake::new(transport, identity)
        .policy(request.policy())
        .run()
        .await?;

    match (outcome, request.mode) {
        (HandshakeOutcome::AlreadyRegistered, _) => Ok(Outcome::AlreadyRegistered),
        (HandshakeOutcome::Established { .. }, Mode::Register) => Ok(Outcome::Registered),
        (
            HandshakeOutcome::Established {
                mut channel,
                registered,
            },
            Mode::Fetch,
        ) => {
            if registered {
                info!("Registered with helper during fetch");
            }
            channel
                .show_popup(&request.default_host)
                .await
                .map(Outcome::Password)
        }
    }
}

/// Run `fut` on its own task and give up after `timeout`.
///
/// On timeout the task is aborted; dropping it closes the socket or kills the
/// helper child.
pub async fn with_deadline<F, T>(timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let mut handle = tokio::spawn(fut);
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => Err(Error::Task(e.to_string())),
        Err(_) => {
            handle.abort();
            warn!("Gave up after {timeout:?}");
            Err(Error::Timeout(timeout))
        }
    }
}

/// Load state, connect, and carry out `mode` within the configured timeout.
#[instrument(skip(config))]
pub async fn run(config: Config, mode: Mode) -> Result<Outcome> {
    config.validate()?;
    let identity = state::load_or_create(&config.state_dir()?)?;
    let request = Request::from_config(&config, mode);

    with_deadline(config.timeout(), async move {
        let transport = transport::connect(&config).await?;
        execute(transport, &identity, &request).await
    })
    .await
}
