//! Wire types for the subscription backend and incoming push messages.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

use crate::error::{NotificationError, NotificationResult};

/// Title used when a push message carries none.
pub const DEFAULT_NOTICE_TITLE: &str = "Notifica Giardino";

/// Key material of a platform subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionKeys {
    pub p256dh: String,
    pub auth: String,
}

/// A platform push subscription, serialized the way the backend expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSubscription {
    pub endpoint: String,
    pub expiration_time: Option<i64>,
    pub keys: SubscriptionKeys,
}

/// Backend answer carrying the application server (VAPID) public key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyResponse {
    pub public_key: String,
}

/// Body of an unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsubscribeRequest<'a> {
    pub endpoint: &'a str,
}

/// Decode a base64url application server key. Padding is optional.
pub fn decode_public_key(key: &str) -> NotificationResult<Vec<u8>> {
    let trimmed = key.trim().trim_end_matches('=');
    if trimmed.is_empty() {
        return Err(NotificationError::KeyDecode("empty key".into()));
    }
    URL_SAFE_NO_PAD
        .decode(trimmed)
        .map_err(|e| NotificationError::KeyDecode(e.to_string()))
}

/// Payload of an incoming push message. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PushMessage {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A notification ready to be shown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: String,
    pub body: String,
    /// Opened when the notice is activated.
    pub url: Option<String>,
}

impl From<PushMessage> for Notice {
    fn from(msg: PushMessage) -> Self {
        let non_empty = |s: Option<String>| s.filter(|s| !s.is_empty());
        Notice {
            title: non_empty(msg.title).unwrap_or_else(|| DEFAULT_NOTICE_TITLE.to_owned()),
            body: msg.body.unwrap_or_default(),
            url: non_empty(msg.url),
        }
    }
}

/// Render raw push data. An empty payload yields the default notice.
pub fn render_push(data: &[u8]) -> Result<Notice, serde_json::Error> {
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(PushMessage::default().into());
    }
    let msg: PushMessage = serde_json::from_slice(data)?;
    Ok(msg.into())
}
