// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! WebSub plumbing for context streams
//!
//! - [`HubClient`] subscribes this node's callback to a hub topic
//! - [`parse_self_link`] extracts the topic from a delivery's `Link` header
//! - [`DeliveryBody`] is the JSON shape of a content delivery

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{info, warn};

pub const MODE_SUBSCRIBE: &str = "subscribe";

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("hub {hub} unreachable: {source}")]
    Transport {
        hub: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("hub {hub} rejected subscription to {topic} with HTTP {status}")]
    Rejected {
        hub: String,
        topic: String,
        status: u16,
    },
}

/// Subscription request sent to a hub
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionRequest {
    #[serde(rename = "hub.mode")]
    pub mode: String,
    #[serde(rename = "hub.topic")]
    pub topic: String,
    #[serde(rename = "hub.callback")]
    pub callback: String,
}

/// Query parameters of a verification request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct VerificationQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
    #[serde(rename = "hub.topic")]
    pub topic: Option<String>,
}

/// Body of a content delivery
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryBody {
    #[serde(rename = "hub.payload")]
    pub payload: Option<DeliveryPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPayload {
    #[serde(default)]
    pub graph_serialized: String,
    #[serde(default)]
    pub timestamp_ms: i64,
}

fn self_link_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<([^>]*)>\s*;\s*rel\s*=\s*"?self"?"#).ok())
        .as_ref()
}

/// Target of the `rel="self"` entry in a `Link` header value
pub fn parse_self_link(header: &str) -> Option<String> {
    let re = self_link_regex()?;
    header
        .split(',')
        .find_map(|entry| re.captures(entry.trim()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|topic| !topic.is_empty())
}

#[derive(Clone)]
pub struct HubClient {
    client: reqwest::Client,
}

const HUB_TIMEOUT: Duration = Duration::from_secs(10);

impl HubClient {
    pub fn new() -> Self {
        Self::with_timeout(HUB_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build hub HTTP client, subscriptions have no timeout");
                reqwest::Client::new()
            });
        Self { client }
    }

    /// Ask `hub` to deliver `topic` updates to `callback`
    pub async fn subscribe(&self, hub: &str, topic: &str, callback: &str) -> Result<(), HubError> {
        let request = SubscriptionRequest {
            mode: MODE_SUBSCRIBE.to_string(),
            topic: topic.to_string(),
            callback: callback.to_string(),
        };

        let response = self
            .client
            .post(hub)
            .json(&request)
            .send()
            .await
            .map_err(|source| HubError::Transport {
                hub: hub.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(hub, topic, status = status.as_u16(), "Hub rejected subscription");
            return Err(HubError::Rejected {
                hub: hub.to_string(),
                topic: topic.to_string(),
                status: status.as_u16(),
            });
        }

        info!(hub, topic, callback, "Subscribed to context stream");
        Ok(())
    }
}

impl Default for HubClient {
    fn default() -> Self {
        Self::new()
    }
}
