//! Best-effort analytics events.
//!
//! Torrent lifecycle milestones ("Added", "Metadata received", "Serving",
//! "Finished", "Removed") are posted to a Mixpanel-style endpoint. Delivery
//! is fire-and-forget: events never block the coordinator and failures are
//! swallowed after a debug log.

use std::sync::Arc;

use crate::config::AnalyticsConfig;
use crate::swarm::InfoHash;

/// Cloneable handle to the analytics sink.
///
/// A sink built without a token is disabled and only logs events at debug
/// level.
#[derive(Clone)]
pub struct EventSink {
    inner: Option<Arc<SinkInner>>,
}

struct SinkInner {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl EventSink {
    /// Creates a sink from configuration; disabled when no token is set.
    pub fn new(config: &AnalyticsConfig) -> Self {
        let inner = config.token.as_ref().map(|token| {
            Arc::new(SinkInner {
                client: reqwest::Client::new(),
                endpoint: config.endpoint.clone(),
                token: token.clone(),
            })
        });
        Self { inner }
    }

    /// Creates a sink that drops every event.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Records a lifecycle event for a torrent.
    ///
    /// `tag` is the opaque per-torrent analytics payload supplied by the
    /// client; it is attached verbatim when non-empty.
    pub fn track(&self, event: &str, info_hash: InfoHash, name: &str, tag: &str) {
        let Some(inner) = &self.inner else {
            tracing::debug!("analytics disabled, dropping event {event} for {info_hash}");
            return;
        };

        let mut properties = serde_json::json!({
            "token": inner.token,
            "Magnet InfoHash": info_hash.to_string(),
            "Magnet Name": name,
        });
        if !tag.is_empty() {
            properties["client_data"] = serde_json::Value::String(tag.to_string());
        }
        let payload = serde_json::json!({
            "event": event,
            "properties": properties,
        });
        let data = data_encoding::BASE64.encode(payload.to_string().as_bytes());

        let inner = Arc::clone(inner);
        let event = event.to_string();
        tokio::spawn(async move {
            let result = inner
                .client
                .post(&inner.endpoint)
                .form(&[("data", data)])
                .send()
                .await;
            if let Err(e) = result {
                tracing::debug!("analytics event {event} not delivered: {e}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_sink_swallows_events() {
        let sink = EventSink::disabled();
        // Must not panic or spawn anything that outlives the call.
        sink.track("Added", InfoHash::new([1u8; 20]), "test", "");
    }

    #[test]
    fn sink_without_token_is_disabled() {
        let sink = EventSink::new(&AnalyticsConfig::default());
        assert!(sink.inner.is_none());
    }
}
