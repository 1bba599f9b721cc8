// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Stream Generators - local producers of context stream updates
//!
//! Generators are selected by name from [`StreamGeneratorRegistry`]; each
//! name maps to a factory function. `located-at` is built in.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::context_stream::ContextStream;
use crate::domain::rdf::{Graph, Term};
use crate::domain::service_config::GeneratorConfig;
use crate::domain::vocab::{annotation, consert, ex, rdf, xsd};

#[derive(Debug, thiserror::Error)]
pub enum GeneratorError {
    #[error("unknown stream generator '{0}'")]
    Unknown(String),

    #[error("generator '{kind}': {reason}")]
    InvalidOption { kind: String, reason: String },
}

/// Produces one update graph per tick
pub trait StreamGenerator: Send + 'static {
    fn generate(&mut self, timestamp_ms: i64) -> Graph;
}

pub type GeneratorFactory = fn(&GeneratorConfig) -> Result<Box<dyn StreamGenerator>, GeneratorError>;

pub struct StreamGeneratorRegistry {
    factories: HashMap<String, GeneratorFactory>,
}

impl StreamGeneratorRegistry {
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in generators
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register(LocatedAtGenerator::KIND, LocatedAtGenerator::from_config);
        registry
    }

    pub fn register(&mut self, kind: &str, factory: GeneratorFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn create(&self, config: &GeneratorConfig) -> Result<Box<dyn StreamGenerator>, GeneratorError> {
        let factory = self
            .factories
            .get(&config.kind)
            .ok_or_else(|| GeneratorError::Unknown(config.kind.clone()))?;
        factory(config)
    }
}

impl Default for StreamGeneratorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Emits a `LocatedAt` assertion for one agent and place, stamped with the tick time
pub struct LocatedAtGenerator {
    agent: String,
    location: String,
}

impl LocatedAtGenerator {
    pub const KIND: &'static str = "located-at";

    pub fn new(agent: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            location: location.into(),
        }
    }

    fn from_config(config: &GeneratorConfig) -> Result<Box<dyn StreamGenerator>, GeneratorError> {
        let option = |key: &str, default: &str| -> Result<String, GeneratorError> {
            let value = config
                .options
                .get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string());
            if url::Url::parse(&value).is_err() {
                return Err(GeneratorError::InvalidOption {
                    kind: Self::KIND.to_string(),
                    reason: format!("{} must be an absolute IRI, got '{}'", key, value),
                });
            }
            Ok(value)
        };
        Ok(Box::new(Self::new(
            option("agent", "http://example.org/alexAgent")?,
            option("location", "http://example.org/lab308")?,
        )))
    }
}

impl StreamGenerator for LocatedAtGenerator {
    fn generate(&mut self, timestamp_ms: i64) -> Graph {
        let assertion = Term::blank(format!("locatedAt{}", Uuid::new_v4().simple()));
        let stamp = Term::blank(format!("stamp{}", Uuid::new_v4().simple()));

        let mut graph = Graph::new();
        graph.add(assertion.clone(), rdf::TYPE, ex::LOCATED_AT);
        graph.add(assertion.clone(), consert::ASSERTION_SUBJECT, Term::iri(&self.agent));
        graph.add(assertion.clone(), consert::ASSERTION_OBJECT, Term::iri(&self.location));
        graph.add(assertion, annotation::HAS_ANNOTATION, stamp.clone());
        graph.add(stamp.clone(), rdf::TYPE, annotation::NUMERIC_TIMESTAMP_ANNOTATION);
        graph.add(
            stamp,
            annotation::HAS_VALUE,
            Term::typed(timestamp_ms.to_string(), xsd::LONG),
        );
        graph
    }
}

/// Put one generated update into `stream` every `interval` until cancelled
pub fn spawn_generator(
    stream: ContextStream,
    mut generator: Box<dyn StreamGenerator>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(stream = %stream.uri(), interval_ms = interval.as_millis() as u64, "Stream generator started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let now = chrono::Utc::now().timestamp_millis();
                    let delivered = stream.put(generator.generate(now), now);
                    debug!(stream = %stream.uri(), delivered, "Generated stream update");
                }
            }
        }
        info!(stream = %stream.uri(), "Stream generator stopped");
    })
}
