//! Mutual authentication with the helper.
//!
//! ```text
//! hello        -> authNew | authBegin
//! authRegister -> authRegistered          (only when registering)
//! authBegin    -> authContinue {cs, m3}   verify m3
//! authVerify   -> welcome                 (encrypted under the new keys)
//! ```
//!
//! Any other reply at any step ends the run. Nothing is retried.

use base64::Engine;
use log::{debug, info, warn};
use tracing::instrument;
use sudolikeaboss_protocol::{
    CAPABILITIES, Command, METHOD_SMA_HMAC256, PROTOCOL_VERSION, Payload, RawResponse,
    ResponseAction, SendAction,
};

use crate::channel::EncryptedChannel;
use crate::crypto::{self, B64, B64_LENIENT, B64_PADDED, CHALLENGE_LEN, SessionKeys};
use crate::error::{Error, Result};
use crate::state::Identity;
use crate::transport::{self, Transport};

/// When to send `authRegister`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RegistrationPolicy {
    /// Never register; an unknown client proceeds straight to `authBegin`.
    #[default]
    Never,
    /// Register if the helper answers `authNew`.
    IfNew,
    /// The user asked to register. A client the helper already knows is
    /// reported as [`HandshakeOutcome::AlreadyRegistered`].
    Explicit,
}

pub enum HandshakeOutcome<'t> {
    Established {
        channel: EncryptedChannel<'t>,
        registered: bool,
    },
    AlreadyRegistered,
}

/// Receives user-facing messages such as the registration code.
pub type Notice = fn(&str);

fn stderr_notice(message: &str) {
    eprintln!("{message}");
}

pub struct Handshake<'a, 't> {
    transport: &'t mut dyn Transport,
    identity: &'a Identity,
    policy: RegistrationPolicy,
    notice: Notice,
}

impl<'a, 't> Handshake<'a, 't> {
    pub fn new(transport: &'t mut dyn Transport, identity: &'a Identity) -> Self {
        Self {
            transport,
            identity,
            policy: RegistrationPolicy::default(),
            notice: stderr_notice,
        }
    }

    pub fn policy(mut self, policy: RegistrationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn notice(mut self, notice: Notice) -> Self {
        self.notice = notice;
        self
    }

    #[instrument(skip_all, fields(client = %self.identity.client_id(), policy = ?self.policy))]
    pub async fn run(mut self) -> Result<HandshakeOutcome<'t>> {
        let hello = self.hello().await?;
        let mut registered = false;

        match (&hello.action, self.policy) {
            (ResponseAction::AuthBegin, RegistrationPolicy::Explicit) => {
                info!("Helper already knows client {}", self.identity.client_id());
                return Ok(HandshakeOutcome::AlreadyRegistered);
            }
            (ResponseAction::AuthBegin, _) => {}
            (ResponseAction::AuthNew, RegistrationPolicy::Never) => {
                warn!(
                    "Helper does not know client {}; run `sudolikeaboss register` first",
                    self.identity.client_id()
                );
            }
            (ResponseAction::AuthNew, _) => {
                let payload = hello
                    .handshake_payload()
                    .map_err(Error::decode("authNew payload"))?;
                self.register(payload.code.as_deref()).await?;
                registered = true;
            }
            (other, _) => {
                return Err(Error::UnexpectedResponse {
                    step: "hello",
                    expected: "authNew or authBegin",
                    actual: other.to_string(),
                });
            }
        }

        let (m3, m4) = self.authenticate().await?;
        let welcome = self.verify(&m4).await?;

        let keys = SessionKeys::derive(self.identity.secret(), &m3, &m4)?;
        let channel = EncryptedChannel::new(self.transport, keys);
        // First use of the new keys: a bad welcome means bad keys.
        channel.open_response(welcome)?;
        info!("Session established with helper");

        Ok(HandshakeOutcome::Established {
            channel,
            registered,
        })
    }

    fn command(&self, action: SendAction, payload: Payload) -> Command {
        Command::new(
            action,
            Payload {
                ext_id: Some(self.identity.client_id().to_string()),
                method: Some(METHOD_SMA_HMAC256.to_string()),
                ..payload
            },
        )
    }

    async fn send(&mut self, command: Command) -> Result<RawResponse> {
        transport::exchange(&mut *self.transport, &command).await
    }

    async fn hello(&mut self) -> Result<RawResponse> {
        let command = Command::new(
            SendAction::Hello,
            Payload {
                version: Some(PROTOCOL_VERSION.to_string()),
                ext_id: Some(self.identity.client_id().to_string()),
                capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                ..Payload::default()
            },
        );
        self.send(command).await
    }

    async fn register(&mut self, code: Option<&str>) -> Result<()> {
        if let Some(code) = code {
            (self.notice)(&format!(
                "The 1password helper will request registration of code: {code}"
            ));
            (self.notice)("To complete registration. You must accept that code from the helper.");
        }

        let command = self.command(
            SendAction::AuthRegister,
            Payload {
                secret: Some(B64_PADDED.encode(self.identity.secret())),
                ..Payload::default()
            },
        );
        let response = self.send(command).await?;
        expect(&response, "authRegister", ResponseAction::AuthRegistered, "authRegistered")?;
        info!("Registered client {}", self.identity.client_id());
        Ok(())
    }

    /// `authBegin` and M3 verification. Returns `(m3, m4)`.
    async fn authenticate(&mut self) -> Result<(Vec<u8>, [u8; crypto::MAC_LEN])> {
        let cc = crypto::random_bytes::<CHALLENGE_LEN>()?;
        let command = self.command(
            SendAction::AuthBegin,
            Payload {
                cc: Some(B64_PADDED.encode(cc)),
                ..Payload::default()
            },
        );
        let response = self.send(command).await?;
        expect(&response, "authBegin", ResponseAction::AuthContinue, "authContinue")?;

        let payload = response
            .handshake_payload()
            .map_err(Error::decode("authContinue payload"))?;
        let cs = decode_field("cs", payload.cs.as_deref())?;
        let m3 = decode_field("m3", payload.m3.as_deref())?;

        crypto::verify_m3(self.identity.secret(), &cs, &cc, &m3)?;
        debug!("M3 verified");

        let m4 = crypto::generate_m4(self.identity.secret(), &m3)?;
        Ok((m3, m4))
    }

    async fn verify(&mut self, m4: &[u8]) -> Result<RawResponse> {
        let command = self.command(
            SendAction::AuthVerify,
            Payload {
                m4: Some(B64.encode(m4)),
                ..Payload::default()
            },
        );
        let response = self.send(command).await?;
        expect(&response, "authVerify", ResponseAction::Welcome, "welcome")?;
        Ok(response)
    }
}

fn expect(
    response: &RawResponse,
    step: &'static str,
    action: ResponseAction,
    expected: &'static str,
) -> Result<()> {
    if response.action == action {
        return Ok(());
    }
    Err(Error::UnexpectedResponse {
        step,
        expected,
        actual: response.action.to_string(),
    })
}

fn decode_field(field: &'static str, value: Option<&str>) -> Result<Vec<u8>> {
    let value = value.ok_or(Error::MissingField {
        step: "authContinue",
        field,
    })?;
    B64_LENIENT
        .decode(value.as_bytes())
        .map_err(Error::base64(field))
}
