//! Wire types for the 1Password extension helper protocol.
//!
//! Every message on the wire is a JSON envelope:
//!
//! ```text
//! {"action": "<tag>", "version": "<protocol version>", "payload": {...}}
//! ```
//!
//! Commands carry a sparse [`Payload`] whose unset fields are omitted. Responses
//! are parsed in two stages: first the envelope (`action`, `version`) with the
//! payload kept as raw JSON, then the payload in the shape that matches the
//! current protocol phase. The caller knows the phase from protocol state; the
//! payload is never sniffed to guess it.
//!
//! This crate does no I/O and no cryptography. It only names the messages.

pub mod actions;
pub mod envelope;
pub mod item;

pub use actions::{ResponseAction, SendAction};
pub use envelope::{
    ALG_AEAD_CBCHMAC_256, CAPABILITIES, Command, EncryptedPayload, HandshakePayload,
    METHOD_SMA_HMAC256, PROTOCOL_VERSION, Payload, Phase, PhasePayload, RawResponse, Response,
};
pub use item::{FillItemPayload, Item, ItemError, LoginItem, PasswordItem, password_from_response};
