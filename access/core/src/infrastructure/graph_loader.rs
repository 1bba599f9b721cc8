// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Graph Loader - reads Turtle documents from files or HTTP(S) URLs
//!
//! Used at startup for static context, profiled context and policy documents.
//! Never called on the request path.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::errors::AccessError;
use crate::domain::rdf::Graph;
use crate::infrastructure::turtle::{parse_turtle, TURTLE_MEDIA_TYPE};

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to fetch {location}: {source}")]
    Http {
        location: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{location} answered HTTP {status}")]
    Status { location: String, status: u16 },

    #[error("{location}: {message}")]
    Parse { location: String, message: String },
}

impl From<LoadError> for AccessError {
    fn from(err: LoadError) -> Self {
        match err {
            LoadError::Parse { .. } => AccessError::malformed(err.to_string()),
            LoadError::Status { status: 404, .. } => AccessError::not_found(err.to_string()),
            other => AccessError::internal(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct GraphLoader {
    client: reqwest::Client,
}

impl GraphLoader {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build loader HTTP client, fetches have no timeout");
                reqwest::Client::new()
            });
        Self { client }
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch the raw document at `location`
    pub async fn read_document(&self, location: &str) -> Result<String, LoadError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            debug!(location, "Fetching document over HTTP");
            let response = self
                .client
                .get(location)
                .header(reqwest::header::ACCEPT, TURTLE_MEDIA_TYPE)
                .send()
                .await
                .map_err(|source| LoadError::Http {
                    location: location.to_string(),
                    source,
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(LoadError::Status {
                    location: location.to_string(),
                    status: status.as_u16(),
                });
            }
            response.text().await.map_err(|source| LoadError::Http {
                location: location.to_string(),
                source,
            })
        } else {
            let path = location.strip_prefix("file://").unwrap_or(location);
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| LoadError::Io {
                    location: location.to_string(),
                    source,
                })
        }
    }

    /// Fetch and parse a Turtle document
    pub async fn load_graph(&self, location: &str) -> Result<Graph, LoadError> {
        let text = self.read_document(location).await?;
        let graph = parse_turtle(&text).map_err(|e| LoadError::Parse {
            location: location.to_string(),
            message: e.to_string(),
        })?;
        info!(location, triples = graph.len(), "Loaded graph");
        Ok(graph)
    }
}

impl Default for GraphLoader {
    fn default() -> Self {
        Self::new()
    }
}
