//! Authenticated encryption for everything after the handshake.
//!
//! Outgoing payloads are serialized, PKCS#7 padded and AES-256-CBC encrypted
//! under a fresh IV. The tag is HMAC-SHA256 over the base64 *text* of the IV
//! followed by the base64 text of the ciphertext, which is what the helper
//! computes. Incoming envelopes are verified before any decryption happens.

use base64::Engine;
use log::debug;
use serde_json::Value;
use sudolikeaboss_protocol::{
    ALG_AEAD_CBCHMAC_256, Command, EncryptedPayload, Payload, RawResponse, ResponseAction,
    SendAction, password_from_response,
};
use zeroize::Zeroizing;

use crate::crypto::{self, B64, B64_LENIENT, IV_LEN, SessionKeys};
use crate::error::{Error, Result};
use crate::transport::{self, Transport, TransportError};

/// Seals and opens encrypted envelopes with one session's keys.
#[derive(Debug)]
pub struct SessionCipher {
    keys: SessionKeys,
}

impl SessionCipher {
    pub fn new(keys: SessionKeys) -> Self {
        Self { keys }
    }

    /// Encrypt `plaintext` under a fresh random IV.
    pub fn seal(&self, plaintext: &[u8]) -> Result<EncryptedPayload> {
        let iv = crypto::random_bytes::<IV_LEN>()?;
        self.seal_with_iv(&iv, plaintext)
    }

    pub fn seal_with_iv(&self, iv: &[u8; IV_LEN], plaintext: &[u8]) -> Result<EncryptedPayload> {
        let data = crypto::encrypt(self.keys.encryption_key(), iv, plaintext)?;
        let iv = B64.encode(iv);
        let data = B64.encode(data);
        let hmac = crypto::hmac_sha256(self.keys.hmac_key(), &[iv.as_bytes(), data.as_bytes()])?;
        Ok(EncryptedPayload {
            iv,
            data,
            hmac: B64.encode(hmac),
            alg: Some(ALG_AEAD_CBCHMAC_256.to_string()),
        })
    }

    /// Verify and decrypt an envelope.
    ///
    /// The tag is checked over the IV and data strings exactly as received;
    /// nothing is decrypted unless it matches.
    pub fn open(&self, payload: &EncryptedPayload) -> Result<Zeroizing<Vec<u8>>> {
        let iv = B64_LENIENT
            .decode(payload.iv.as_bytes())
            .map_err(Error::base64("iv"))?;
        let data = B64_LENIENT
            .decode(payload.data.as_bytes())
            .map_err(Error::base64("data"))?;
        let tag = B64_LENIENT
            .decode(payload.hmac.as_bytes())
            .map_err(Error::base64("hmac"))?;

        crypto::verify_hmac_sha256(
            self.keys.hmac_key(),
            &[payload.iv.as_bytes(), payload.data.as_bytes()],
            &tag,
        )?;

        if iv.len() != IV_LEN {
            return Err(Error::Cipher(format!(
                "IV is {} bytes, expected {IV_LEN}",
                iv.len()
            )));
        }
        let plaintext = crypto::decrypt(self.keys.encryption_key(), &iv, &data)?;
        Ok(Zeroizing::new(plaintext))
    }
}

/// A transport plus session keys: every payload in either direction is sealed.
///
/// The keys are wiped when the channel is dropped.
pub struct EncryptedChannel<'t> {
    transport: &'t mut dyn Transport,
    cipher: SessionCipher,
}

impl<'t> EncryptedChannel<'t> {
    pub fn new(transport: &'t mut dyn Transport, keys: SessionKeys) -> Self {
        Self {
            transport,
            cipher: SessionCipher::new(keys),
        }
    }

    pub fn cipher(&self) -> &SessionCipher {
        &self.cipher
    }

    /// Replace an encrypted response payload with its decrypted JSON.
    pub fn open_response(&self, response: RawResponse) -> Result<RawResponse> {
        let envelope = response
            .encrypted_payload()
            .map_err(Error::decode("encrypted payload"))?;
        let plaintext = self.cipher.open(&envelope)?;
        let payload = if plaintext.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&plaintext).map_err(Error::decode("decrypted payload"))?
        };
        debug!("Decrypted {} payload", response.action);
        Ok(response.with_payload(payload))
    }

    /// Encrypt `command`'s payload, send it, and decrypt the reply.
    pub async fn send_command(&mut self, command: Command) -> Result<RawResponse> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&command.payload).map_err(TransportError::Encode)?,
        );
        let sealed = self.cipher.seal(&plaintext)?;
        let step = command.action.as_str();
        let command = Command {
            payload: Payload::from(sealed),
            ..command
        };

        let response = transport::exchange(&mut *self.transport, &command).await?;
        if response.action == ResponseAction::AuthFail {
            return Err(Error::UnexpectedResponse {
                step,
                expected: "an encrypted response",
                actual: response.action.to_string(),
            });
        }
        self.open_response(response)
    }

    /// Ask the helper to show its item picker for `url` and return the chosen password.
    pub async fn show_popup(&mut self, url: &str) -> Result<String> {
        let mut payload = Payload {
            url: Some(url.to_string()),
            ..Payload::default()
        };
        payload
            .options
            .insert("source".to_string(), "toolbar-button".to_string());

        let response = self
            .send_command(Command::new(SendAction::ShowPopup, payload))
            .await?;
        Ok(password_from_response(&response)?)
    }
}
