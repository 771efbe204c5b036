use serde_json::{Map, Value, json};

/// Largest payload the gateway accepts for regular notifications.
pub const DEFAULT_MAXIMUM_PAYLOAD_SIZE: usize = 4096;

const ELLIPSIS: char = '\u{2026}';

/// Builds the JSON payload of a notification.
///
/// Only the fields that were set appear in the output, so an untouched builder
/// produces `{"aps":{}}`.
#[derive(Debug, Clone, Default)]
pub struct ApnsPayloadBuilder {
    alert_title: Option<String>,
    alert_body: Option<String>,
    badge: Option<u32>,
    sound: Option<String>,
    category: Option<String>,
    thread_id: Option<String>,
    content_available: bool,
    mutable_content: bool,
    custom: Map<String, Value>,
}

impl ApnsPayloadBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_alert_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.alert_title = Some(title.into());
        self
    }

    pub fn set_alert_body(&mut self, body: impl Into<String>) -> &mut Self {
        self.alert_body = Some(body.into());
        self
    }

    pub const fn set_badge(&mut self, badge: u32) -> &mut Self {
        self.badge = Some(badge);
        self
    }

    pub fn set_sound(&mut self, sound: impl Into<String>) -> &mut Self {
        self.sound = Some(sound.into());
        self
    }

    pub fn set_category(&mut self, category: impl Into<String>) -> &mut Self {
        self.category = Some(category.into());
        self
    }

    pub fn set_thread_id(&mut self, thread_id: impl Into<String>) -> &mut Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub const fn set_content_available(&mut self, content_available: bool) -> &mut Self {
        self.content_available = content_available;
        self
    }

    pub const fn set_mutable_content(&mut self, mutable_content: bool) -> &mut Self {
        self.mutable_content = mutable_content;
        self
    }

    /// Adds a top-level property next to `aps`. A property named `aps` is ignored.
    pub fn add_custom_property(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let key = key.into();
        if key != "aps" {
            self.custom.insert(key, value.into());
        }
        self
    }

    #[must_use]
    pub fn build(&self) -> String {
        self.render(self.alert_body.as_deref())
    }

    /// Builds the payload, shortening the alert body until the result fits in
    /// `max_length` bytes. If even an empty body does not fit, the untruncated
    /// payload is returned and the size check at submission time rejects it.
    #[must_use]
    pub fn build_with_max_length(&self, max_length: usize) -> String {
        let full = self.build();
        let Some(body) = self.alert_body.as_deref() else {
            return full;
        };
        if full.len() <= max_length {
            return full;
        }

        let chars: Vec<char> = body.chars().collect();
        let truncated = |keep: usize| -> String {
            let mut s: String = chars[..keep].iter().collect();
            s.push(ELLIPSIS);
            s
        };

        if self.render(Some(&truncated(0))).len() > max_length {
            return full;
        }

        // Largest prefix that still fits.
        let (mut lo, mut hi) = (0, chars.len());
        while lo < hi {
            let mid = (lo + hi).div_ceil(2);
            if self.render(Some(&truncated(mid))).len() <= max_length {
                lo = mid;
            } else {
                hi = mid - 1;
            }
        }

        self.render(Some(&truncated(lo)))
    }

    fn render(&self, alert_body: Option<&str>) -> String {
        let mut aps = Map::new();

        let mut alert = Map::new();
        if let Some(title) = &self.alert_title {
            alert.insert("title".to_string(), json!(title));
        }
        if let Some(body) = alert_body {
            alert.insert("body".to_string(), json!(body));
        }
        if !alert.is_empty() {
            aps.insert("alert".to_string(), Value::Object(alert));
        }

        if let Some(badge) = self.badge {
            aps.insert("badge".to_string(), json!(badge));
        }
        if let Some(sound) = &self.sound {
            aps.insert("sound".to_string(), json!(sound));
        }
        if let Some(category) = &self.category {
            aps.insert("category".to_string(), json!(category));
        }
        if let Some(thread_id) = &self.thread_id {
            aps.insert("thread-id".to_string(), json!(thread_id));
        }
        if self.content_available {
            aps.insert("content-available".to_string(), json!(1));
        }
        if self.mutable_content {
            aps.insert("mutable-content".to_string(), json!(1));
        }

        let mut root = self.custom.clone();
        root.insert("aps".to_string(), Value::Object(aps));
        Value::Object(root).to_string()
    }
}
