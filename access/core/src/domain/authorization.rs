// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Context-Based Authorization Rules
//!
//! A [`ContextBasedAuthorization`] grants one or more [`AccessType`]s on a
//! resource to an entity, optionally conditioned on an access-condition shape
//! that the requester's context must satisfy.
//!
//! Rules are never mutated in place. To change a rule, remove it and add the
//! replacement (see `AuthorizationRegistry::replace_authorizations`).
//!
//! ## Graph form
//!
//! ```text
//! <rule> a cashmere:ContextBasedAuthorization ;
//!     acl:accessTo <resource> ;
//!     acl:mode acl:Write, acl:Append ;
//!     acl:agent cashmere:accessRequester ;
//!     cashmere:hasAccessCondition <shape> .
//! ```
//!
//! Resources may also point at their rules with `cashmere:hasAccessAuthorization`
//! or `cashmere:hasControlAuthorization`, in which case `acl:accessTo` is optional.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

use crate::domain::errors::AccessError;
use crate::domain::rdf::{Graph, Term};
use crate::domain::vocab::{acl, cashmere, rdf, AUTH_INSTANCES_NS};

/// Web Access Control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Read,
    Write,
    Append,
    Control,
}

impl AccessType {
    pub fn iri(&self) -> &'static str {
        match self {
            AccessType::Read => acl::READ,
            AccessType::Write => acl::WRITE,
            AccessType::Append => acl::APPEND,
            AccessType::Control => acl::CONTROL,
        }
    }

    pub fn from_iri(iri: &str) -> Option<Self> {
        match iri {
            acl::READ => Some(AccessType::Read),
            acl::WRITE => Some(AccessType::Write),
            acl::APPEND => Some(AccessType::Append),
            acl::CONTROL => Some(AccessType::Control),
            _ => None,
        }
    }

    /// Access type required by an HTTP method
    pub fn for_method(method: &str) -> Self {
        match method {
            "GET" | "HEAD" => AccessType::Read,
            _ => AccessType::Write,
        }
    }
}

impl fmt::Display for AccessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessType::Read => "Read",
            AccessType::Write => "Write",
            AccessType::Append => "Append",
            AccessType::Control => "Control",
        };
        f.write_str(name)
    }
}

/// How the authorized entity of a rule is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizedEntityType {
    /// A single agent IRI (or the `accessRequester` placeholder)
    Agent,
    /// A class of agents, e.g. `foaf:Agent`
    AgentClass,
    /// A group of agents, e.g. a context domain group
    AgentGroup,
}

impl AuthorizedEntityType {
    pub fn predicate(&self) -> &'static str {
        match self {
            AuthorizedEntityType::Agent => acl::AGENT,
            AuthorizedEntityType::AgentClass => acl::AGENT_CLASS,
            AuthorizedEntityType::AgentGroup => acl::AGENT_GROUP,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBasedAuthorization {
    /// Rule node IRI; not part of rule identity
    pub id: String,
    pub resource_uri: String,
    pub access_types: BTreeSet<AccessType>,
    pub entity_type: AuthorizedEntityType,
    pub entity_uri: String,
    pub access_condition_shape: Option<Term>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
}

impl PartialEq for ContextBasedAuthorization {
    fn eq(&self, other: &Self) -> bool {
        self.resource_uri == other.resource_uri
            && self.access_types == other.access_types
            && self.entity_type == other.entity_type
            && self.access_condition_shape == other.access_condition_shape
    }
}

impl Eq for ContextBasedAuthorization {}

impl ContextBasedAuthorization {
    /// Create a rule; fails if `access_types` is empty
    pub fn new(
        resource_uri: impl Into<String>,
        access_types: impl IntoIterator<Item = AccessType>,
        entity_type: AuthorizedEntityType,
        entity_uri: impl Into<String>,
        access_condition_shape: Option<Term>,
    ) -> Result<Self, AccessError> {
        let resource_uri = resource_uri.into();
        let access_types: BTreeSet<AccessType> = access_types.into_iter().collect();
        if access_types.is_empty() {
            return Err(AccessError::malformed(format!(
                "authorization for {} lists no access modes",
                resource_uri
            )));
        }
        Ok(Self {
            id: mint_rule_iri(),
            resource_uri,
            access_types,
            entity_type,
            entity_uri: entity_uri.into(),
            access_condition_shape,
            resource_name: None,
            entity_name: None,
        })
    }

    /// Rule granting `access_types` to whoever satisfies `shape`
    pub fn for_requester(
        resource_uri: impl Into<String>,
        access_types: impl IntoIterator<Item = AccessType>,
        shape: Option<Term>,
    ) -> Result<Self, AccessError> {
        Self::new(
            resource_uri,
            access_types,
            AuthorizedEntityType::Agent,
            cashmere::ACCESS_REQUESTER,
            shape,
        )
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn grants(&self, access_type: AccessType) -> bool {
        self.access_types.contains(&access_type)
    }

    /// Whether the rule can authorize a request needing `access_type`; Append
    /// also satisfies Write
    pub fn satisfies(&self, access_type: AccessType) -> bool {
        self.grants(access_type) || (access_type == AccessType::Write && self.grants(AccessType::Append))
    }

    /// Whether the rule's entity covers `requester`.
    ///
    /// Group membership cannot be decided here; `AgentGroup` rules return
    /// `None` so the caller can ask the owner of the group.
    pub fn covers_requester(&self, requester: &str) -> Option<bool> {
        match self.entity_type {
            AuthorizedEntityType::Agent => Some(
                self.entity_uri == cashmere::ACCESS_REQUESTER || self.entity_uri == requester,
            ),
            AuthorizedEntityType::AgentClass => Some(
                self.entity_uri == crate::domain::vocab::foaf::AGENT
                    || (self.entity_uri == acl::AUTHENTICATED_AGENT && !requester.is_empty()),
            ),
            AuthorizedEntityType::AgentGroup => None,
        }
    }

    /// Graph form of this rule
    pub fn to_graph(&self) -> Graph {
        let node = Term::iri(&self.id);
        let mut graph = Graph::new();
        graph.add(node.clone(), rdf::TYPE, cashmere::CONTEXT_BASED_AUTHORIZATION);
        graph.add(node.clone(), acl::ACCESS_TO, Term::iri(&self.resource_uri));
        graph.add(
            Term::iri(&self.resource_uri),
            cashmere::HAS_ACCESS_AUTHORIZATION,
            node.clone(),
        );
        for access_type in &self.access_types {
            graph.add(node.clone(), acl::MODE, access_type.iri());
        }
        graph.add(
            node.clone(),
            self.entity_type.predicate(),
            Term::iri(&self.entity_uri),
        );
        if let Some(shape) = &self.access_condition_shape {
            graph.add(node, cashmere::HAS_ACCESS_CONDITION, shape.clone());
        }
        graph
    }

    /// Read every rule declared in a policy graph.
    ///
    /// A rule node with several `cashmere:hasAccessCondition` values yields one
    /// rule per condition.
    pub fn from_graph(graph: &Graph) -> Result<Vec<Self>, AccessError> {
        let mut nodes: BTreeSet<Term> = graph
            .instances_of(cashmere::CONTEXT_BASED_AUTHORIZATION)
            .into_iter()
            .collect();
        for link in [
            cashmere::HAS_ACCESS_AUTHORIZATION,
            cashmere::HAS_CONTROL_AUTHORIZATION,
        ] {
            let link = Term::iri(link);
            nodes.extend(graph.matching(None, Some(&link), None).map(|t| t.object.clone()));
        }

        let mut rules = Vec::new();
        for node in nodes {
            rules.extend(Self::rules_for_node(graph, &node)?);
        }
        Ok(rules)
    }

    fn rules_for_node(graph: &Graph, node: &Term) -> Result<Vec<Self>, AccessError> {
        let resource = match graph.object(node, acl::ACCESS_TO) {
            Some(term) => term.clone(),
            None => {
                let owner = graph
                    .subjects(cashmere::HAS_ACCESS_AUTHORIZATION, node)
                    .chain(graph.subjects(cashmere::HAS_CONTROL_AUTHORIZATION, node))
                    .next()
                    .cloned();
                owner.ok_or_else(|| {
                    AccessError::malformed(format!("authorization {} has no acl:accessTo", node))
                })?
            }
        };
        let resource_uri = resource
            .as_iri()
            .ok_or_else(|| AccessError::malformed(format!("authorization {} targets a non-IRI", node)))?
            .to_string();

        let mut access_types = BTreeSet::new();
        for mode in graph.objects(node, acl::MODE) {
            let access_type = mode
                .as_iri()
                .and_then(AccessType::from_iri)
                .ok_or_else(|| AccessError::malformed(format!("unknown access mode {}", mode)))?;
            access_types.insert(access_type);
        }
        let controls = graph
            .subjects(cashmere::HAS_CONTROL_AUTHORIZATION, node)
            .next()
            .is_some();
        if controls {
            access_types.insert(AccessType::Control);
        }

        let (entity_type, entity_uri) = [
            AuthorizedEntityType::Agent,
            AuthorizedEntityType::AgentClass,
            AuthorizedEntityType::AgentGroup,
        ]
        .into_iter()
        .find_map(|kind| {
            graph
                .object(node, kind.predicate())
                .and_then(|t| t.as_iri())
                .map(|iri| (kind, iri.to_string()))
        })
        .unwrap_or((
            AuthorizedEntityType::Agent,
            cashmere::ACCESS_REQUESTER.to_string(),
        ));

        let id = match node {
            Term::Iri(iri) => iri.clone(),
            _ => mint_rule_iri(),
        };
        let conditions: Vec<Term> = graph
            .objects(node, cashmere::HAS_ACCESS_CONDITION)
            .cloned()
            .collect();

        let build = |shape: Option<Term>| {
            Self::new(
                resource_uri.clone(),
                access_types.iter().copied(),
                entity_type,
                entity_uri.clone(),
                shape,
            )
            .map(|rule| rule.with_id(id.clone()))
        };

        if conditions.is_empty() {
            return Ok(vec![build(None)?]);
        }
        conditions.into_iter().map(|shape| build(Some(shape))).collect()
    }
}

/// Fresh IRI for a rule that was not given one
pub fn mint_rule_iri() -> String {
    format!("{}node-{}", AUTH_INSTANCES_NS, Uuid::new_v4().simple())
}

/// Graph holding every rule in `rules`
pub fn rules_to_graph<'a>(rules: impl IntoIterator<Item = &'a ContextBasedAuthorization>) -> Graph {
    let mut graph = Graph::new();
    for rule in rules {
        graph.merge(&rule.to_graph());
    }
    graph
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOOR: &str = "http://localhost:8080/workspaces/lab/artifacts/door";
    const SHAPE: &str = "http://example.org/policies#LabMemberShape";

    #[test]
    fn test_empty_access_types_rejected() {
        let result = ContextBasedAuthorization::for_requester(DOOR, [], None);
        assert!(matches!(result, Err(AccessError::Malformed(_))));
    }

    #[test]
    fn test_equality_ignores_id_and_entity_uri() {
        let a = ContextBasedAuthorization::for_requester(
            DOOR,
            [AccessType::Write],
            Some(Term::iri(SHAPE)),
        )
        .unwrap();
        let mut b = a.clone().with_id("http://example.org/other");
        b.entity_uri = "http://example.org/alice".to_string();
        assert_eq!(a, b);

        let c = ContextBasedAuthorization::for_requester(DOOR, [AccessType::Read], Some(Term::iri(SHAPE)))
            .unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_graph_roundtrip_preserves_rule() {
        let rule = ContextBasedAuthorization::for_requester(
            DOOR,
            [AccessType::Write, AccessType::Append],
            Some(Term::iri(SHAPE)),
        )
        .unwrap();

        let parsed = ContextBasedAuthorization::from_graph(&rule.to_graph()).unwrap();
        assert_eq!(parsed, vec![rule.clone()]);
        assert_eq!(parsed[0].id, rule.id);
    }

    #[test]
    fn test_one_rule_per_access_condition() {
        let node = Term::iri("http://example.org/policies#doorAuth");
        let mut graph = Graph::new();
        graph.add(node.clone(), rdf::TYPE, cashmere::CONTEXT_BASED_AUTHORIZATION);
        graph.add(node.clone(), acl::ACCESS_TO, Term::iri(DOOR));
        graph.add(node.clone(), acl::MODE, acl::WRITE);
        graph.add(node.clone(), cashmere::HAS_ACCESS_CONDITION, Term::iri(SHAPE));
        graph.add(
            node,
            cashmere::HAS_ACCESS_CONDITION,
            Term::iri("http://example.org/policies#Other"),
        );

        let rules = ContextBasedAuthorization::from_graph(&graph).unwrap();
        assert_eq!(rules.len(), 2);
        assert!(rules.iter().all(|r| r.entity_uri == cashmere::ACCESS_REQUESTER));
    }

    #[test]
    fn test_control_link_without_access_to() {
        let node = Term::blank("auth");
        let mut graph = Graph::new();
        graph.add(Term::iri(DOOR), cashmere::HAS_CONTROL_AUTHORIZATION, node.clone());
        graph.add(node, acl::AGENT_CLASS, crate::domain::vocab::foaf::AGENT);

        let rules = ContextBasedAuthorization::from_graph(&graph).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].resource_uri, DOOR);
        assert!(rules[0].grants(AccessType::Control));
        assert_eq!(rules[0].entity_type, AuthorizedEntityType::AgentClass);
        assert_eq!(rules[0].covers_requester("http://example.org/anyone"), Some(true));
    }

    #[test]
    fn test_unknown_mode_is_malformed() {
        let node = Term::iri("http://example.org/policies#bad");
        let mut graph = Graph::new();
        graph.add(node.clone(), rdf::TYPE, cashmere::CONTEXT_BASED_AUTHORIZATION);
        graph.add(node.clone(), acl::ACCESS_TO, Term::iri(DOOR));
        graph.add(node, acl::MODE, "http://www.w3.org/ns/auth/acl#Fly");

        assert!(matches!(
            ContextBasedAuthorization::from_graph(&graph),
            Err(AccessError::Malformed(_))
        ));
    }

    #[test]
    fn test_access_type_for_method() {
        assert_eq!(AccessType::for_method("GET"), AccessType::Read);
        assert_eq!(AccessType::for_method("HEAD"), AccessType::Read);
        assert_eq!(AccessType::for_method("OPTIONS"), AccessType::Write);
        assert_eq!(AccessType::for_method("POST"), AccessType::Write);
        assert_eq!(AccessType::for_method("DELETE"), AccessType::Write);
    }
}
