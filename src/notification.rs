//! Notification content and the per-protocol payload bodies built from it.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Sound name requested when a notification should play a sound.
const DEFAULT_SOUND: &str = "default";

/// A single notification to deliver. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    /// Correlation identifier, echoed back by the binary gateway on error.
    pub id: u32,
    /// Alert title.
    pub title: String,
    /// Alert body.
    pub body: String,
    /// Whether the device should play the default sound.
    #[serde(default)]
    pub sound: bool,
    /// Badge count shown on the app icon.
    #[serde(default)]
    pub badge: u32,
    /// Extra key/values forwarded verbatim to the device.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl Notification {
    /// Create a notification with sound on, no badge and no extra data.
    pub fn new(id: u32, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            sound: true,
            badge: 0,
            extra: Map::new(),
        }
    }

    /// Set the badge count.
    pub fn with_badge(mut self, badge: u32) -> Self {
        self.badge = badge;
        self
    }

    /// Toggle the sound flag.
    pub fn with_sound(mut self, sound: bool) -> Self {
        self.sound = sound;
        self
    }

    /// Attach one extra key/value.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// `aps` body for the binary gateway: the alert is the plain body text.
    pub fn legacy_payload(&self) -> Value {
        let mut aps = Map::new();
        aps.insert("alert".into(), Value::String(self.body.clone()));
        self.insert_common(&mut aps);
        json!({ "aps": aps })
    }

    /// `aps` body for the provider API: the alert carries title and body.
    pub fn apns_payload(&self) -> Value {
        let mut aps = Map::new();
        aps.insert(
            "alert".into(),
            json!({ "title": self.title, "body": self.body }),
        );
        self.insert_common(&mut aps);
        json!({ "aps": aps })
    }

    /// `data` object for the broadcast protocol.
    ///
    /// Extra data is merged first so the notification fields always win.
    pub fn broadcast_data(&self) -> Value {
        let mut data = self.extra.clone();
        data.insert("title".into(), Value::String(self.title.clone()));
        data.insert("message".into(), Value::String(self.body.clone()));
        data.insert("notify".into(), json!(u8::from(self.sound)));
        Value::Object(data)
    }

    fn insert_common(&self, aps: &mut Map<String, Value>) {
        if self.sound {
            aps.insert("sound".into(), Value::String(DEFAULT_SOUND.into()));
        }
        aps.insert("badge".into(), json!(self.badge));
        if !self.extra.is_empty() {
            aps.insert("data".into(), Value::Object(self.extra.clone()));
        }
    }
}
