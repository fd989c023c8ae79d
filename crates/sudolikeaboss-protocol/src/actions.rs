//! Action tags carried in the `action` field of every envelope.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Actions this client sends to the helper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SendAction {
    Hello,
    AuthRegister,
    AuthBegin,
    AuthVerify,
    ShowPopup,
}

impl SendAction {
    pub fn as_str(self) -> &'static str {
        match self {
            SendAction::Hello => "hello",
            SendAction::AuthRegister => "authRegister",
            SendAction::AuthBegin => "authBegin",
            SendAction::AuthVerify => "authVerify",
            SendAction::ShowPopup => "showPopup",
        }
    }
}

impl fmt::Display for SendAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Actions the helper answers with.
///
/// Tags outside the known vocabulary are preserved in [`ResponseAction::Other`]
/// so protocol errors can name exactly what the peer sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResponseAction {
    Welcome,
    AuthNew,
    AuthBegin,
    AuthRegistered,
    AuthContinue,
    AuthFail,
    FillItem,
    /// Seen in the extension sources, never expected by this client.
    ResetConnection,
    /// Seen in the extension sources, never expected by this client.
    HangUp,
    Other(String),
}

impl ResponseAction {
    pub fn as_str(&self) -> &str {
        match self {
            ResponseAction::Welcome => "welcome",
            ResponseAction::AuthNew => "authNew",
            ResponseAction::AuthBegin => "authBegin",
            ResponseAction::AuthRegistered => "authRegistered",
            ResponseAction::AuthContinue => "authContinue",
            ResponseAction::AuthFail => "authFail",
            ResponseAction::FillItem => "fillItem",
            ResponseAction::ResetConnection => "resetConnection",
            ResponseAction::HangUp => "hangUp",
            ResponseAction::Other(tag) => tag,
        }
    }
}

impl From<String> for ResponseAction {
    fn from(tag: String) -> Self {
        match tag.as_str() {
            "welcome" => ResponseAction::Welcome,
            "authNew" => ResponseAction::AuthNew,
            "authBegin" => ResponseAction::AuthBegin,
            "authRegistered" => ResponseAction::AuthRegistered,
            "authContinue" => ResponseAction::AuthContinue,
            "authFail" => ResponseAction::AuthFail,
            "fillItem" => ResponseAction::FillItem,
            "resetConnection" => ResponseAction::ResetConnection,
            "hangUp" => ResponseAction::HangUp,
            _ => ResponseAction::Other(tag),
        }
    }
}

impl From<ResponseAction> for String {
    fn from(action: ResponseAction) -> Self {
        match action {
            ResponseAction::Other(tag) => tag,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for ResponseAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_action_serializes_camel_case() {
        let json = serde_json::to_string(&SendAction::AuthRegister).unwrap();
        assert_eq!(json, "\"authRegister\"");
        assert_eq!(SendAction::ShowPopup.to_string(), "showPopup");
    }

    #[test]
    fn test_unknown_response_action_is_preserved() {
        let action: ResponseAction = serde_json::from_str("\"somethingNew\"").unwrap();
        assert_eq!(action, ResponseAction::Other("somethingNew".to_string()));
        assert_eq!(serde_json::to_string(&action).unwrap(), "\"somethingNew\"");
    }

    #[test]
    fn test_known_response_actions_parse() {
        let action: ResponseAction = serde_json::from_str("\"authContinue\"").unwrap();
        assert_eq!(action, ResponseAction::AuthContinue);
        let action: ResponseAction = serde_json::from_str("\"hangUp\"").unwrap();
        assert_eq!(action, ResponseAction::HangUp);
    }
}
