// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Context Management Service
//!
//! Actor at [`ServiceAddress::ContextManagement`]. It owns:
//!
//! - the static and profiled context graphs (read-only after startup)
//! - the context streams fed by WebSub deliveries and local generators
//! - the context domains and their membership stores
//! - the policy index: resource IRI to access-condition shapes
//!
//! ## Context-based validation
//!
//! For every `ValidateContextBasedAccess` request a fresh validation graph is
//! assembled from static ∪ profiled ∪ the memberships of every domain the
//! resource's shapes name. The shapes get the placeholder requester replaced by
//! the real one, and the graph is dropped when the request completes.
//!
//! | Situation | Outcome |
//! |-----------|---------|
//! | resource not in the policy index | allow |
//! | indexed, but no shapes found | allow, or deny when failing closed |
//! | shapes conform | allow |
//! | constraint violation | `Unauthorized` with the violation messages |
//! | unknown or failed domain, invalid shapes | `Internal` (deny) |
//!
//! Validation runs off the mailbox loop so stream deliveries keep flowing.
//!
//! [`ServiceAddress::ContextManagement`]: crate::infrastructure::message_bus::ServiceAddress

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::authorization::{AccessType, ContextBasedAuthorization};
use crate::domain::context_domain::{domain_uri_from_group, ContextDomain};
use crate::domain::context_stream::ContextStream;
use crate::domain::errors::{AccessError, AccessResult};
use crate::domain::events::AccessControlEvent;
use crate::domain::rdf::{Graph, Term};
use crate::domain::shapes::{self, extract_shapes, referenced_domain_groups};
use crate::domain::vocab::{cashmere, rdf};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::message_bus::{BusHandler, BusMessage, BusReply, Handled};
use crate::infrastructure::turtle::parse_turtle;

// ============================================================================
// Policy index
// ============================================================================

/// Access conditions of one protected resource
#[derive(Debug, Clone)]
pub struct PolicyEntry {
    /// Where the conditions were read from
    pub document: String,
    /// `None` when the policy references no shapes that could be found
    pub shapes: Option<Arc<Graph>>,
    /// Rules whose conditions the shapes hold; empty when indexed without rules
    pub rules: Vec<ContextBasedAuthorization>,
}

impl PolicyEntry {
    /// Shapes a request needing `access_type` must satisfy.
    ///
    /// Only the conditions of rules that can grant the access apply. Without
    /// an access type, or without indexed rules, every shape applies.
    pub fn shapes_for(&self, access_type: Option<AccessType>) -> Option<Arc<Graph>> {
        let shapes = self.shapes.as_ref()?;
        let Some(access_type) = access_type.filter(|_| !self.rules.is_empty()) else {
            return Some(shapes.clone());
        };
        let roots: Vec<Term> = self
            .rules
            .iter()
            .filter(|rule| rule.satisfies(access_type))
            .filter_map(|rule| rule.access_condition_shape.clone())
            .collect();
        let scoped = extract_shapes(shapes, &roots);
        (!scoped.is_empty()).then(|| Arc::new(scoped))
    }
}

/// Resource IRI to access-condition shapes, built once at startup
#[derive(Debug, Clone, Default)]
pub struct PolicyIndex {
    entries: HashMap<String, PolicyEntry>,
}

impl PolicyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, resource_uri: impl Into<String>, document: impl Into<String>, shapes: Option<Graph>) {
        self.entries.insert(
            resource_uri.into(),
            PolicyEntry {
                document: document.into(),
                shapes: shapes.filter(|g| !g.is_empty()).map(Arc::new),
                rules: Vec::new(),
            },
        );
    }

    /// Index the shapes referenced by `rules` out of their policy document
    pub fn index_policy(
        &mut self,
        resource_uri: &str,
        document: &str,
        policy: &Graph,
        rules: &[ContextBasedAuthorization],
    ) {
        let roots: Vec<Term> = rules
            .iter()
            .filter_map(|rule| rule.access_condition_shape.clone())
            .collect();
        let shapes = extract_shapes(policy, &roots);
        if shapes.is_empty() {
            warn!(
                resource = resource_uri,
                document,
                "Policy references no access-condition shapes"
            );
        }
        self.insert(resource_uri, document, Some(shapes));
        if let Some(entry) = self.entries.get_mut(resource_uri) {
            entry.rules = rules.to_vec();
        }
    }

    pub fn get(&self, resource_uri: &str) -> Option<&PolicyEntry> {
        self.entries.get(resource_uri)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resources(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

// ============================================================================
// Profiled context projection
// ============================================================================

/// Instances of `assertion_type`, their triples, and one hop of triples about
/// the nodes they reference (annotations)
pub fn profiled_projection(profiled: &Graph, assertion_type: &str) -> Graph {
    let mut out = Graph::new();
    for instance in profiled.instances_of(assertion_type) {
        let described = profiled.describe(&instance);
        for triple in described.iter() {
            if triple.has_predicate(rdf::TYPE) || triple.object.is_literal() {
                continue;
            }
            out.merge(&profiled.describe(&triple.object));
        }
        out.merge(&described);
    }
    out
}

// ============================================================================
// Service
// ============================================================================

pub struct ContextManagementService {
    static_context: Arc<Graph>,
    profiled_context: Arc<Graph>,
    streams: HashMap<String, ContextStream>,
    domains: HashMap<String, ContextDomain>,
    policies: PolicyIndex,
    fail_closed_on_missing_shapes: bool,
    events: Option<EventBus>,
}

impl ContextManagementService {
    pub fn new(static_context: Graph, profiled_context: Graph) -> Self {
        Self {
            static_context: Arc::new(static_context),
            profiled_context: Arc::new(profiled_context),
            streams: HashMap::new(),
            domains: HashMap::new(),
            policies: PolicyIndex::new(),
            fail_closed_on_missing_shapes: false,
            events: None,
        }
    }

    pub fn with_streams(mut self, streams: impl IntoIterator<Item = ContextStream>) -> Self {
        for stream in streams {
            self.streams.insert(stream.uri().to_string(), stream);
        }
        self
    }

    pub fn with_domains(mut self, domains: impl IntoIterator<Item = ContextDomain>) -> Self {
        for domain in domains {
            self.domains.insert(domain.domain_uri().to_string(), domain);
        }
        self
    }

    pub fn with_policies(mut self, policies: PolicyIndex) -> Self {
        self.policies = policies;
        self
    }

    pub fn fail_closed_on_missing_shapes(mut self, fail_closed: bool) -> Self {
        self.fail_closed_on_missing_shapes = fail_closed;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn stream_update(&self, stream_uri: &str, serialized_graph: &str, timestamp_ms: i64) -> AccessResult<BusReply> {
        let stream = self
            .streams
            .get(stream_uri)
            .ok_or_else(|| AccessError::not_found(format!("unknown context stream {}", stream_uri)))?;

        let graph = parse_turtle(serialized_graph)?;
        if graph.is_empty() {
            return Err(AccessError::malformed("stream update carries an empty graph"));
        }

        let triple_count = graph.len();
        let consumers = stream.put(graph, timestamp_ms);
        debug!(stream = stream_uri, triple_count, consumers, timestamp_ms, "Stream update accepted");

        if let Some(events) = &self.events {
            events.publish(AccessControlEvent::StreamUpdated {
                stream_uri: stream_uri.to_string(),
                triple_count,
                timestamp_ms,
                received_at: Utc::now(),
            });
        }
        Ok(BusReply::Accepted)
    }

    fn verify_domain_membership(&self, group_uri: &str, agent: &str) -> AccessResult<BusReply> {
        let domain_uri = domain_uri_from_group(group_uri);
        let Some(domain) = self.domains.get(&domain_uri) else {
            debug!(group = group_uri, "Group is not a context domain group");
            return Ok(BusReply::Flag(false));
        };
        let state = domain.state();
        if !state.is_serving() {
            warn!(domain = %domain_uri, state = %state, "Membership asked of a domain that is not serving");
            return Ok(BusReply::Flag(false));
        }
        Ok(BusReply::Flag(domain.verify_membership(agent)))
    }

    /// Snapshot the inputs of one validation so it can run off the mailbox
    fn access_check(&self, requester: String, resource_uri: String, access_type: Option<AccessType>) -> AccessCheck {
        let entry = self.policies.get(&resource_uri);
        let shapes = entry.and_then(|e| e.shapes_for(access_type));
        let domains = shapes
            .as_deref()
            .map(referenced_domain_groups)
            .unwrap_or_default()
            .into_iter()
            .map(|group| {
                let domain = self.domains.get(&domain_uri_from_group(&group)).cloned();
                (group, domain)
            })
            .collect();

        AccessCheck {
            requester,
            resource_uri,
            document: entry.map(|e| e.document.clone()),
            shapes,
            domains,
            static_context: self.static_context.clone(),
            profiled_context: self.profiled_context.clone(),
            fail_closed_on_missing_shapes: self.fail_closed_on_missing_shapes,
        }
    }
}

#[async_trait]
impl BusHandler for ContextManagementService {
    async fn handle(&mut self, message: BusMessage) -> Handled {
        match message {
            BusMessage::GetStaticContext => Handled::Ready(Ok(BusReply::Graph((*self.static_context).clone()))),
            BusMessage::GetProfiledContext { assertion_type } => {
                let graph = match assertion_type {
                    Some(t) => profiled_projection(&self.profiled_context, &t),
                    None => (*self.profiled_context).clone(),
                };
                Handled::Ready(Ok(BusReply::Graph(graph)))
            }
            BusMessage::ContextStreamUpdate {
                stream_uri,
                serialized_graph,
                timestamp_ms,
            } => self.stream_update(&stream_uri, &serialized_graph, timestamp_ms).into(),
            BusMessage::VerifyContextStreamSubscription { topic } => {
                Handled::Ready(Ok(BusReply::Flag(self.streams.contains_key(&topic))))
            }
            BusMessage::VerifyDomainMembership { group_uri, agent } => {
                self.verify_domain_membership(&group_uri, &agent).into()
            }
            BusMessage::ValidateContextBasedAccess {
                requester,
                resource_uri,
                access_type,
            } => {
                let check = self.access_check(requester, resource_uri, access_type);
                Handled::Deferred(Box::pin(async move { check.run() }))
            }
            other => Handled::Ready(Err(AccessError::malformed(format!(
                "context management does not handle {}",
                other.name()
            )))),
        }
    }

    async fn shutdown(&mut self) {
        info!(
            streams = self.streams.len(),
            domains = self.domains.len(),
            "Context management service shutting down"
        );
    }
}

// ============================================================================
// Request-scoped validation
// ============================================================================

struct AccessCheck {
    requester: String,
    resource_uri: String,
    /// Policy document, `None` when the resource has no context policy
    document: Option<String>,
    /// Shapes that apply to this request
    shapes: Option<Arc<Graph>>,
    /// Every group the shapes name, with its domain if one exists
    domains: Vec<(String, Option<ContextDomain>)>,
    static_context: Arc<Graph>,
    profiled_context: Arc<Graph>,
    fail_closed_on_missing_shapes: bool,
}

impl AccessCheck {
    fn run(self) -> AccessResult<BusReply> {
        let Some(document) = &self.document else {
            debug!(resource = %self.resource_uri, "No context policy, access allowed");
            return Ok(BusReply::Accepted);
        };

        let Some(shapes) = &self.shapes else {
            if self.fail_closed_on_missing_shapes {
                warn!(
                    resource = %self.resource_uri,
                    %document,
                    "Policy has no access-condition shapes, denying"
                );
                return Err(AccessError::unauthorized(format!(
                    "policy {} has no access-condition shapes",
                    document
                )));
            }
            warn!(
                resource = %self.resource_uri,
                %document,
                "Policy has no access-condition shapes, allowing"
            );
            return Ok(BusReply::Accepted);
        };

        let requester = Term::iri(&self.requester);
        let shapes = shapes.substitute_object(&Term::iri(cashmere::ACCESS_REQUESTER), &requester);

        let mut data = self.static_context.union(&self.profiled_context);
        for (group, domain) in &self.domains {
            let Some(domain) = domain else {
                return Err(AccessError::internal(format!(
                    "access condition names unknown context domain group {}",
                    group
                )));
            };
            let state = domain.state();
            if !state.is_serving() {
                return Err(AccessError::internal(format!(
                    "context domain {} is {}",
                    domain.domain_uri(),
                    state
                )));
            }
            data.extend(domain.get_membership_statements(None));
        }
        data.merge(&shapes);

        let report = shapes::validate(&data, &shapes).map_err(|e| {
            warn!(resource = %self.resource_uri, error = %e, "Access-condition shapes are invalid");
            AccessError::internal(e.to_string())
        })?;

        if report.conforms {
            debug!(resource = %self.resource_uri, requester = %self.requester, "Access conditions satisfied");
            Ok(BusReply::Accepted)
        } else {
            let summary = report.summary();
            debug!(
                resource = %self.resource_uri,
                requester = %self.requester,
                violations = report.results.len(),
                reason = %summary,
                "Access conditions violated"
            );
            Err(AccessError::unauthorized(summary))
        }
    }
}
