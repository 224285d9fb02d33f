use std::time::Duration;

use serde::{de::Deserializer, Deserialize, Serialize};

use crate::HashMap;

/// Producer session configuration. `brokers` is the only interpreted field;
/// `options` is passed through verbatim to the broker client, which rejects
/// unrecognized or malformed keys itself.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProducerConfig {
    /// Bootstrap broker address list, e.g. "localhost:9092".
    pub brokers: String,
    /// Optional client identifier, set on the client before `options`.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client options, passed through as-is. Keys starting with '#' are
    /// treated as commented out and skipped.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Upper bound for one offloaded poll call.
    #[serde(default = "ProducerConfig::poll_timeout_default", deserialize_with = "deserialize_duration")]
    pub poll_timeout: Duration,
    /// Upper bound for one flush step; close re-invokes flush with this
    /// timeout until the client reports no work in flight.
    #[serde(default = "ProducerConfig::flush_timeout_default", deserialize_with = "deserialize_duration")]
    pub flush_timeout: Duration,
}

impl ProducerConfig {
    pub fn new<B: Into<String>>(brokers: B) -> Self {
        Self {
            brokers: brokers.into(),
            client_id: None,
            options: HashMap::default(),
            poll_timeout: Self::poll_timeout_default(),
            flush_timeout: Self::flush_timeout_default(),
        }
    }

    pub fn client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn option<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn poll_timeout(mut self, poll_timeout: Duration) -> Self {
        self.poll_timeout = poll_timeout;
        self
    }

    pub fn flush_timeout(mut self, flush_timeout: Duration) -> Self {
        self.flush_timeout = flush_timeout;
        self
    }

    fn poll_timeout_default() -> Duration {
        Duration::from_millis(1000)
    }

    fn flush_timeout_default() -> Duration {
        Duration::from_millis(1000)
    }
}

/// Deserialize Duration from a human-readable string, "500ms", "2s", "1m".
/// A bare number is taken as milliseconds.
fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

fn to_duration(text: &str) -> Duration {
    let text = text.trim();
    let (num, scale) = if let Some(num) = text.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = text.strip_suffix('s') {
        (num, 1000)
    } else if let Some(num) = text.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = text.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        (text, 1)
    };
    Duration::from_millis(num.trim().parse::<u64>().unwrap_or(0) * scale)
}
