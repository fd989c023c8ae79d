//! A scripted 1Password helper for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;

use sudolikeaboss::channel::SessionCipher;
use sudolikeaboss::crypto::{self, B64, B64_LENIENT, SessionKeys};
use sudolikeaboss::state::Identity;
use sudolikeaboss::transport::{Transport, TransportError};
use sudolikeaboss_protocol::{Command, EncryptedPayload, SendAction};

pub const PASSWORD: &str = "secret123";
pub const ORIGIN: &str = "resource://onepassword-at-agilebits-dot-com";
const CS: [u8; 16] = *b"server-challenge";

/// How the helper behaves.
#[derive(Debug, Clone)]
pub struct Behavior {
    pub knows_client: bool,
    /// Never answer anything.
    pub silent: bool,
    /// Send an M3 computed with the wrong secret.
    pub bad_m3: bool,
    /// Action answered to `hello` instead of authBegin/authNew.
    pub hello_override: Option<&'static str>,
    pub item: Value,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            knows_client: true,
            silent: false,
            bad_m3: false,
            hello_override: None,
            item: login_item(PASSWORD),
        }
    }
}

pub fn login_item(password: &str) -> Value {
    json!({
        "action": "fillLogin",
        "openInTabMode": "NewTab",
        "item": {
            "uuid": "item-uuid",
            "overview": {"title": "sudo", "url": "sudolikeaboss://local"},
            "secureContents": {
                "fields": [
                    {"value": "me", "designation": "username", "name": "user", "type": "T"},
                    {"value": password, "designation": "password", "name": "pass", "type": "P"}
                ]
            }
        }
    })
}

/// Helper side of the protocol.
pub struct MockHelper {
    secret: Vec<u8>,
    pub behavior: Behavior,
    m3: Vec<u8>,
    keys: Option<SessionKeys>,
    pub sent: Vec<Command>,
    pub popup_url: Option<String>,
    pub registered_secret: Option<String>,
    replies: VecDeque<Value>,
}

impl MockHelper {
    pub fn new(identity: &Identity, behavior: Behavior) -> Self {
        Self {
            secret: identity.secret().to_vec(),
            behavior,
            m3: Vec::new(),
            keys: None,
            sent: Vec::new(),
            popup_url: None,
            registered_secret: None,
            replies: VecDeque::new(),
        }
    }

    fn seal(&self, payload: &Value) -> Value {
        let keys = self.keys.clone().expect("session keys before encrypted reply");
        let sealed = SessionCipher::new(keys)
            .seal(payload.to_string().as_bytes())
            .unwrap();
        serde_json::to_value(sealed).unwrap()
    }

    /// The helper's reply to `command`, or `None` when silent.
    pub fn answer(&mut self, command: &Command) -> Option<Value> {
        self.sent.push(command.clone());
        if self.behavior.silent {
            return None;
        }

        let reply = match command.action {
            SendAction::Hello => match self.behavior.hello_override {
                Some(action) => json!({"action": action, "payload": {}}),
                None if self.behavior.knows_client => json!({"action": "authBegin"}),
                None => json!({"action": "authNew", "payload": {"code": "R2D2"}}),
            },
            SendAction::AuthRegister => {
                self.registered_secret = command.payload.secret.clone();
                self.behavior.knows_client = true;
                json!({"action": "authRegistered", "payload": {}})
            }
            SendAction::AuthBegin => {
                let cc = B64_LENIENT
                    .decode(command.payload.cc.as_deref().unwrap())
                    .unwrap();
                let secret = if self.behavior.bad_m3 {
                    vec![0xee; self.secret.len()]
                } else {
                    self.secret.clone()
                };
                self.m3 = crypto::generate_m3(&secret, &CS, &cc).unwrap().to_vec();
                json!({
                    "action": "authContinue",
                    "version": "4.6.2.90",
                    "payload": {"method": "auth-sma-hmac256", "cs": B64.encode(CS), "m3": B64.encode(&self.m3)}
                })
            }
            SendAction::AuthVerify => {
                let m4 = B64_LENIENT
                    .decode(command.payload.m4.as_deref().unwrap())
                    .unwrap();
                self.keys = Some(SessionKeys::derive(&self.secret, &self.m3, &m4).unwrap());
                json!({"action": "welcome", "payload": self.seal(&json!({"alg": "aead-cbchmac-256"}))})
            }
            SendAction::ShowPopup => {
                let envelope = EncryptedPayload {
                    iv: command.payload.iv.clone().unwrap(),
                    data: command.payload.data.clone().unwrap(),
                    hmac: command.payload.hmac.clone().unwrap(),
                    alg: command.payload.alg.clone(),
                };
                let keys = self.keys.clone().unwrap();
                let inner: Value =
                    serde_json::from_slice(&SessionCipher::new(keys).open(&envelope).unwrap())
                        .unwrap();
                self.popup_url = inner["url"].as_str().map(str::to_string);
                json!({"action": "fillItem", "payload": self.seal(&self.behavior.item.clone())})
            }
        };
        Some(reply)
    }
}

#[async_trait]
impl Transport for MockHelper {
    async fn send(&mut self, command: &Command) -> Result<(), TransportError> {
        if let Some(reply) = self.answer(command) {
            self.replies.push_back(reply);
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>, TransportError> {
        if self.behavior.silent {
            std::future::pending::<()>().await;
        }
        self.replies
            .pop_front()
            .map(|reply| reply.to_string().into_bytes())
            .ok_or(TransportError::Closed)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Serve `helper` on a websocket at 127.0.0.1, one connection.
///
/// Upgrades are refused with 403 unless the request carries [`ORIGIN`].
pub async fn serve_websocket(mut helper: MockHelper) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let check_origin = |request: &Request, response: Response| {
            let origin = request.headers().get("origin").and_then(|v| v.to_str().ok());
            if origin == Some(ORIGIN) {
                Ok(response)
            } else {
                let mut denied = ErrorResponse::new(Some("origin not allowed".to_string()));
                *denied.status_mut() = StatusCode::FORBIDDEN;
                Err(denied)
            }
        };
        let Ok(mut ws) = tokio_tungstenite::accept_hdr_async(stream, check_origin).await else {
            return;
        };

        while let Some(Ok(message)) = ws.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let command: Command = serde_json::from_str(text.as_str()).unwrap();
            if let Some(reply) = helper.answer(&command) {
                if ws.send(Message::Text(reply.to_string().into())).await.is_err() {
                    break;
                }
            }
        }
    });

    addr
}
