//! Command and response envelopes.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::actions::{ResponseAction, SendAction};

/// Protocol version the helper expects on every command.
pub const PROTOCOL_VERSION: &str = "4.6.2.90";

/// Authentication method name used throughout the handshake.
pub const METHOD_SMA_HMAC256: &str = "auth-sma-hmac256";

/// Algorithm tag of the encrypted envelope.
pub const ALG_AEAD_CBCHMAC_256: &str = "aead-cbchmac-256";

/// Capabilities declared in `hello`.
pub const CAPABILITIES: [&str; 2] = [METHOD_SMA_HMAC256, ALG_AEAD_CBCHMAC_256];

// ============================================================================
// Commands
// ============================================================================

/// A command sent to the helper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub action: SendAction,
    pub version: String,
    pub payload: Payload,
}

impl Command {
    /// Build a command stamped with [`PROTOCOL_VERSION`].
    pub fn new(action: SendAction, payload: Payload) -> Self {
        Self {
            action,
            version: PROTOCOL_VERSION.to_string(),
            payload,
        }
    }

    /// Serialize to compact JSON, as sent on the wire.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Sparse command payload.
///
/// Each action fills in a handful of fields; everything left unset is omitted
/// from the JSON rather than sent as `null`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs: Option<String>,
    #[serde(rename = "M3", default, skip_serializing_if = "Option::is_none")]
    pub m3: Option<String>,
    #[serde(rename = "M4", default, skip_serializing_if = "Option::is_none")]
    pub m4: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iv: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

// ============================================================================
// Responses
// ============================================================================

/// A response envelope with its payload in shape `P`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response<P> {
    pub action: ResponseAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub payload: P,
}

/// First-stage parse: envelope known, payload still raw JSON.
pub type RawResponse = Response<Value>;

/// Which shape a response payload has, decided by protocol state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before session keys exist.
    Plaintext,
    /// After the handshake; the payload is an [`EncryptedPayload`].
    Encrypted,
}

/// Second-stage parse of a raw payload.
#[derive(Debug, Clone, PartialEq)]
pub enum PhasePayload {
    Plaintext(HandshakePayload),
    Encrypted(EncryptedPayload),
}

impl Response<Value> {
    /// Parse the envelope, keeping the payload unparsed.
    ///
    /// A missing `payload` member is kept as `null`.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            action: ResponseAction,
            #[serde(default)]
            version: Option<String>,
            #[serde(default)]
            payload: Value,
        }

        let envelope: Envelope = serde_json::from_slice(bytes)?;
        Ok(Self {
            action: envelope.action,
            version: envelope.version,
            payload: envelope.payload,
        })
    }

    /// Interpret the payload in the shape that `phase` dictates.
    pub fn interpret(&self, phase: Phase) -> serde_json::Result<PhasePayload> {
        match phase {
            Phase::Plaintext => self.handshake_payload().map(PhasePayload::Plaintext),
            Phase::Encrypted => self.encrypted_payload().map(PhasePayload::Encrypted),
        }
    }

    /// Plaintext handshake payload. An absent payload reads as all fields unset.
    pub fn handshake_payload(&self) -> serde_json::Result<HandshakePayload> {
        if self.payload.is_null() {
            return Ok(HandshakePayload::default());
        }
        self.payload_as()
    }

    /// Encrypted envelope payload.
    pub fn encrypted_payload(&self) -> serde_json::Result<EncryptedPayload> {
        self.payload_as()
    }

    /// Re-parse the raw payload as `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.payload)
    }

    /// Replace the payload, keeping the envelope.
    pub fn with_payload(self, payload: Value) -> Self {
        Self { payload, ..self }
    }
}

/// Handshake-phase payload fields sent by the helper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandshakePayload {
    /// Registration code shown by the helper on `authNew`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub m3: Option<String>,
}

/// Encrypted envelope: base64 IV, ciphertext and HMAC tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPayload {
    pub iv: String,
    pub data: String,
    pub hmac: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
}

impl From<EncryptedPayload> for Payload {
    fn from(sealed: EncryptedPayload) -> Self {
        Payload {
            alg: sealed.alg,
            iv: Some(sealed.iv),
            data: Some(sealed.data),
            hmac: Some(sealed.hmac),
            ..Payload::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_omits_unset_fields() {
        let cmd = Command::new(
            SendAction::Hello,
            Payload {
                version: Some(PROTOCOL_VERSION.to_string()),
                ext_id: Some("ext-1".to_string()),
                capabilities: CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                ..Payload::default()
            },
        );

        let json = cmd.to_json().unwrap();
        assert!(json.contains("\"action\":\"hello\""));
        assert!(json.contains("\"version\":\"4.6.2.90\""));
        assert!(json.contains("\"extId\":\"ext-1\""));
        assert!(json.contains("\"capabilities\":[\"auth-sma-hmac256\",\"aead-cbchmac-256\"]"));
        assert!(!json.contains("null"));
        assert!(!json.contains("\"cc\""));
        assert!(!json.contains("\"options\""));
    }

    #[test]
    fn test_transcript_fields_use_upper_case_names() {
        let payload = Payload {
            m3: Some("a".to_string()),
            m4: Some("b".to_string()),
            ..Payload::default()
        };
        let json = serde_json::to_string(&payload).unwrap();
        assert_eq!(json, r#"{"M3":"a","M4":"b"}"#);
    }

    #[test]
    fn test_raw_response_keeps_payload() {
        let raw = RawResponse::from_slice(
            br#"{"action":"authContinue","version":"1","payload":{"cs":"abc","m3":"def","extra":1}}"#,
        )
        .unwrap();
        assert_eq!(raw.action, ResponseAction::AuthContinue);
        assert_eq!(raw.version.as_deref(), Some("1"));

        let PhasePayload::Plaintext(handshake) = raw.interpret(Phase::Plaintext).unwrap() else {
            panic!("expected plaintext payload");
        };
        assert_eq!(handshake.cs.as_deref(), Some("abc"));
        assert_eq!(handshake.m3.as_deref(), Some("def"));
        assert!(handshake.code.is_none());
    }

    #[test]
    fn test_missing_payload_reads_as_empty_handshake() {
        let raw = RawResponse::from_slice(br#"{"action":"authBegin"}"#).unwrap();
        assert!(raw.payload.is_null());
        assert_eq!(raw.handshake_payload().unwrap(), HandshakePayload::default());
        assert!(raw.encrypted_payload().is_err());
    }

    #[test]
    fn test_encrypted_payload_becomes_command_payload() {
        let sealed = EncryptedPayload {
            iv: "iv".to_string(),
            data: "data".to_string(),
            hmac: "tag".to_string(),
            alg: Some(ALG_AEAD_CBCHMAC_256.to_string()),
        };
        let json = serde_json::to_string(&Payload::from(sealed)).unwrap();
        assert_eq!(
            json,
            r#"{"alg":"aead-cbchmac-256","iv":"iv","data":"data","hmac":"tag"}"#
        );
    }
}
