// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Context Stream
//!
//! Named, timestamped, append-only channel of graph updates.
//!
//! Consumers registered at time T only see updates put after T; there is no
//! replay. Updates reach each consumer in arrival order even when timestamps
//! regress.
//!
//! Each consumer is identified (normally by the domain URI that owns the
//! membership engine) and a stream accepts one registration per consumer id.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use url::Url;

use crate::domain::errors::AccessError;
use crate::domain::rdf::Graph;

/// One delivered update
#[derive(Debug, Clone)]
pub struct StreamUpdate {
    pub stream_uri: String,
    pub graph: Arc<Graph>,
    pub timestamp_ms: i64,
}

/// Static description of a stream
#[derive(Debug, Clone, Serialize)]
pub struct ContextStreamDescriptor {
    pub stream_uri: String,
    pub stream_name: String,
    pub ontology_url: Option<String>,
    pub assertion_types: Vec<String>,
}

#[derive(Default)]
struct StreamState {
    last_update_timestamp: Option<i64>,
    consumers: Vec<(String, mpsc::UnboundedSender<StreamUpdate>)>,
    degraded: Option<String>,
}

/// Shared handle to a context stream
#[derive(Clone)]
pub struct ContextStream {
    descriptor: Arc<ContextStreamDescriptor>,
    state: Arc<Mutex<StreamState>>,
}

impl ContextStream {
    pub fn new(
        stream_uri: impl Into<String>,
        ontology_url: Option<String>,
        assertion_types: Vec<String>,
    ) -> Self {
        let stream_uri = stream_uri.into();
        let stream_name = stream_name_from_uri(&stream_uri);
        Self {
            descriptor: Arc::new(ContextStreamDescriptor {
                stream_uri,
                stream_name,
                ontology_url,
                assertion_types,
            }),
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    pub fn uri(&self) -> &str {
        &self.descriptor.stream_uri
    }

    pub fn name(&self) -> &str {
        &self.descriptor.stream_name
    }

    pub fn descriptor(&self) -> &ContextStreamDescriptor {
        &self.descriptor
    }

    pub fn last_update_timestamp(&self) -> Option<i64> {
        self.state.lock().last_update_timestamp
    }

    /// Append an update and deliver it to every live consumer.
    ///
    /// Returns the number of consumers that received it. Consumers whose
    /// receiver was dropped are pruned.
    pub fn put(&self, graph: Graph, timestamp_ms: i64) -> usize {
        let update = StreamUpdate {
            stream_uri: self.descriptor.stream_uri.clone(),
            graph: Arc::new(graph),
            timestamp_ms,
        };

        let mut state = self.state.lock();
        if let Some(previous) = state.last_update_timestamp {
            if timestamp_ms < previous {
                debug!(
                    stream = %self.descriptor.stream_uri,
                    previous,
                    timestamp_ms,
                    "Out-of-order stream update delivered in arrival order"
                );
            }
        }
        state.last_update_timestamp = Some(timestamp_ms);
        state
            .consumers
            .retain(|(_, sender)| sender.send(update.clone()).is_ok());

        metrics::counter!(
            "ctxguard_stream_updates_total",
            "stream" => self.descriptor.stream_name.clone()
        )
        .increment(1);

        state.consumers.len()
    }

    /// Register a consumer; each consumer id may be registered once
    pub fn subscribe(
        &self,
        consumer_id: impl Into<String>,
    ) -> Result<mpsc::UnboundedReceiver<StreamUpdate>, AccessError> {
        let consumer_id = consumer_id.into();
        let mut state = self.state.lock();
        state.consumers.retain(|(_, sender)| !sender.is_closed());
        if state.consumers.iter().any(|(id, _)| id == &consumer_id) {
            return Err(AccessError::internal(format!(
                "{} is already consuming stream {}",
                consumer_id, self.descriptor.stream_uri
            )));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.consumers.push((consumer_id, tx));
        Ok(rx)
    }

    pub fn unsubscribe(&self, consumer_id: &str) {
        self.state.lock().consumers.retain(|(id, _)| id != consumer_id);
    }

    pub fn consumer_count(&self) -> usize {
        self.state.lock().consumers.len()
    }

    /// Flag the stream as not receiving external updates
    pub fn mark_degraded(&self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(stream = %self.descriptor.stream_uri, reason = %reason, "Context stream degraded");
        self.state.lock().degraded = Some(reason);
    }

    pub fn degraded_reason(&self) -> Option<String> {
        self.state.lock().degraded.clone()
    }
}

impl std::fmt::Debug for ContextStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStream")
            .field("uri", &self.descriptor.stream_uri)
            .field("name", &self.descriptor.stream_name)
            .finish()
    }
}

/// Short name of a stream: last path segment, the host if there is no path,
/// otherwise `"unnamed"`
pub fn stream_name_from_uri(stream_uri: &str) -> String {
    let Ok(url) = Url::parse(stream_uri) else {
        return "unnamed".to_string();
    };
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();
    if let Some(last) = segments.last() {
        return (*last).to_string();
    }
    url.host_str()
        .map(str::to_string)
        .unwrap_or_else(|| "unnamed".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rdf::Term;

    const LOCATED_AT: &str = "http://example.org/environments/upb_hmas/ctxmgmt/streams/LocatedAt";

    fn sample_graph() -> Graph {
        let mut graph = Graph::new();
        graph.add(
            Term::iri("http://example.org/a"),
            Term::iri("http://example.org/p"),
            Term::iri("http://example.org/b"),
        );
        graph
    }

    #[test]
    fn test_stream_name_from_uri() {
        assert_eq!(stream_name_from_uri(LOCATED_AT), "LocatedAt");
        assert_eq!(stream_name_from_uri("http://example.org/streams/Temp/"), "Temp");
        assert_eq!(stream_name_from_uri("http://sensors.example.org"), "sensors.example.org");
        assert_eq!(stream_name_from_uri("not a uri"), "unnamed");
    }

    #[tokio::test]
    async fn test_put_updates_timestamp_and_delivers() {
        let stream = ContextStream::new(LOCATED_AT, None, vec![]);
        let mut rx = stream.subscribe("domain-a").unwrap();

        assert_eq!(stream.put(sample_graph(), 1000), 1);
        assert_eq!(stream.last_update_timestamp(), Some(1000));

        let update = rx.recv().await.unwrap();
        assert_eq!(update.timestamp_ms, 1000);
        assert_eq!(update.stream_uri, LOCATED_AT);
        assert_eq!(update.graph.len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_order_delivered_in_arrival_order() {
        let stream = ContextStream::new(LOCATED_AT, None, vec![]);
        let mut rx = stream.subscribe("domain-a").unwrap();

        stream.put(sample_graph(), 2000);
        stream.put(sample_graph(), 1000);

        assert_eq!(rx.recv().await.unwrap().timestamp_ms, 2000);
        assert_eq!(rx.recv().await.unwrap().timestamp_ms, 1000);
        assert_eq!(stream.last_update_timestamp(), Some(1000));
    }

    #[test]
    fn test_late_subscriber_sees_no_history() {
        let stream = ContextStream::new(LOCATED_AT, None, vec![]);
        stream.put(sample_graph(), 1000);

        let mut rx = stream.subscribe("domain-a").unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_one_registration_per_consumer() {
        let stream = ContextStream::new(LOCATED_AT, None, vec![]);
        let _rx = stream.subscribe("domain-a").unwrap();
        assert!(stream.subscribe("domain-a").is_err());
        assert!(stream.subscribe("domain-b").is_ok());
    }

    #[test]
    fn test_dropped_consumers_are_pruned() {
        let stream = ContextStream::new(LOCATED_AT, None, vec![]);
        let rx = stream.subscribe("domain-a").unwrap();
        drop(rx);
        assert_eq!(stream.put(sample_graph(), 1), 0);
        assert_eq!(stream.consumer_count(), 0);
    }
}
