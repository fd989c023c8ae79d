//! Decrypted `fillItem` responses and password extraction.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::actions::ResponseAction;
use crate::envelope::Response;

const FILL_LOGIN: &str = "fillLogin";
const FILL_PASSWORD: &str = "fillPassword";
const PASSWORD_DESIGNATION: &str = "password";

/// Errors extracting a password from a fill response.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The outer response is not a `fillItem`.
    #[error("response action \"{0}\" does not have a password")]
    NotAFillResponse(String),

    /// The inner payload action names an item kind we do not model.
    #[error("payload action \"{0}\" is not supported")]
    UnsupportedAction(String),

    #[error("fill response carries no item")]
    MissingItem,

    #[error("no password found in the item")]
    NoPassword,

    #[error("malformed fill payload: {0}")]
    Payload(#[source] serde_json::Error),

    #[error("malformed {kind} item: {source}")]
    Malformed {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Payload of a decrypted `fillItem` response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillItemPayload {
    /// Inner action selecting the item shape (`fillLogin`, `fillPassword`).
    pub action: String,
    #[serde(default)]
    pub item: Option<Value>,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub open_in_tab_mode: Option<String>,
}

/// A stored credential in one of the shapes the helper fills.
#[derive(Debug, Clone)]
pub enum Item {
    Login(LoginItem),
    Password(PasswordItem),
}

impl Item {
    /// Select the item shape from the inner action tag and parse it.
    pub fn from_fill(payload: FillItemPayload) -> Result<Self, ItemError> {
        match payload.action.as_str() {
            FILL_LOGIN => {
                let item = payload.item.ok_or(ItemError::MissingItem)?;
                serde_json::from_value(item)
                    .map(Item::Login)
                    .map_err(|source| ItemError::Malformed {
                        kind: "login",
                        source,
                    })
            }
            FILL_PASSWORD => {
                let item = payload.item.ok_or(ItemError::MissingItem)?;
                serde_json::from_value(item)
                    .map(Item::Password)
                    .map_err(|source| ItemError::Malformed {
                        kind: "password",
                        source,
                    })
            }
            other => Err(ItemError::UnsupportedAction(other.to_string())),
        }
    }

    pub fn password(&self) -> Result<&str, ItemError> {
        match self {
            Item::Login(login) => login.password(),
            Item::Password(item) => Ok(&item.secure_contents.password),
        }
    }
}

/// Login item: the password is one entry in a list of form fields.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginItem {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub naked_domains: Vec<String>,
    #[serde(default)]
    pub overview: Value,
    #[serde(default)]
    pub secure_contents: LoginSecureContents,
}

impl LoginItem {
    /// Value of the first field designated `password`.
    pub fn password(&self) -> Result<&str, ItemError> {
        self.secure_contents
            .fields
            .iter()
            .find(|field| field.designation.as_deref() == Some(PASSWORD_DESIGNATION))
            .and_then(|field| field.value.as_deref())
            .ok_or(ItemError::NoPassword)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginSecureContents {
    #[serde(default)]
    pub html_form: Value,
    #[serde(default)]
    pub fields: Vec<LoginField>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginField {
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub designation: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: Option<String>,
}

/// Password item: a single password field.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordItem {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub overview: Value,
    pub secure_contents: PasswordSecureContents,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PasswordSecureContents {
    pub password: String,
}

/// Extract the password from a decrypted `showPopup` answer.
pub fn password_from_response(response: &Response<Value>) -> Result<String, ItemError> {
    if response.action != ResponseAction::FillItem {
        return Err(ItemError::NotAFillResponse(response.action.to_string()));
    }
    let payload = FillItemPayload::deserialize(&response.payload).map_err(ItemError::Payload)?;
    let item = Item::from_fill(payload)?;
    item.password().map(str::to_string)
}
