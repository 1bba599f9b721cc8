// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Context Domain
//!
//! A context domain is a named scope whose group membership is inferred from
//! live context streams. The facts live in a private [`MembershipStore`] that
//! holds only `(entity, cashmere:memberIn, <domain>/group)` triples.
//!
//! ## Lifecycle
//!
//! ```text
//! Uninitialized ──start──▶ Running ──shutdown──▶ Stopped
//!        │                    │
//!        │                    └─ hub subscription failed ─▶ Degraded (still serving)
//!        └─ bad rules / missing streams ─▶ Failed(reason)
//! ```
//!
//! A `Failed` domain never answers membership questions; the validation path
//! treats it as a denial.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::domain::rdf::{Graph, Term, Triple};
use crate::domain::vocab::cashmere;

const GROUP_SUFFIX: &str = "/group";

/// Group IRI of a domain
pub fn group_uri_from_domain(domain_uri: &str) -> String {
    format!("{}{}", domain_uri, GROUP_SUFFIX)
}

/// Domain IRI of a group; groups without the suffix are returned unchanged
pub fn domain_uri_from_group(group_uri: &str) -> String {
    group_uri
        .strip_suffix(GROUP_SUFFIX)
        .unwrap_or(group_uri)
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum DomainState {
    Uninitialized,
    Running,
    /// Running, but at least one input stream is not receiving updates
    Degraded(String),
    Failed(String),
    Stopped,
}

impl DomainState {
    /// Whether membership answers from this domain may be trusted
    pub fn is_serving(&self) -> bool {
        matches!(self, DomainState::Running | DomainState::Degraded(_))
    }
}

impl fmt::Display for DomainState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomainState::Uninitialized => f.write_str("uninitialized"),
            DomainState::Running => f.write_str("running"),
            DomainState::Degraded(reason) => write!(f, "degraded ({})", reason),
            DomainState::Failed(reason) => write!(f, "failed ({})", reason),
            DomainState::Stopped => f.write_str("stopped"),
        }
    }
}

/// Outcome of offering a triple to a membership store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipInsert {
    Inserted,
    Duplicate,
    /// Not a `memberIn` fact for this domain's group
    Rejected,
}

/// Append-only set of membership facts for one group
#[derive(Clone)]
pub struct MembershipStore {
    group: Term,
    facts: Arc<RwLock<Graph>>,
}

impl MembershipStore {
    pub fn new(group_uri: &str) -> Self {
        Self {
            group: Term::iri(group_uri),
            facts: Arc::new(RwLock::new(Graph::new())),
        }
    }

    /// Insert a fact if it is a `memberIn` triple for this group and not yet present
    pub fn offer(&self, triple: &Triple) -> MembershipInsert {
        if !triple.has_predicate(cashmere::MEMBER_IN) || triple.object != self.group {
            return MembershipInsert::Rejected;
        }
        if self.facts.read().contains(triple) {
            return MembershipInsert::Duplicate;
        }
        if self.facts.write().insert(triple.clone()) {
            MembershipInsert::Inserted
        } else {
            MembershipInsert::Duplicate
        }
    }

    pub fn contains_member(&self, entity: &Term) -> bool {
        let triple = Triple::new(entity.clone(), cashmere::MEMBER_IN, self.group.clone());
        self.facts.read().contains(&triple)
    }

    pub fn statements(&self, entity: Option<&Term>) -> Vec<Triple> {
        let facts = self.facts.read();
        facts
            .matching(entity, None, None)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.facts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.read().is_empty()
    }
}

/// Static configuration and live state of one context domain
#[derive(Clone)]
pub struct ContextDomain {
    domain_uri: String,
    group_uri: String,
    required_streams: Vec<String>,
    rule_ids: Vec<String>,
    state: Arc<RwLock<DomainState>>,
    store: MembershipStore,
}

impl ContextDomain {
    pub fn new(domain_uri: impl Into<String>, required_streams: Vec<String>) -> Self {
        let domain_uri = domain_uri.into();
        let group_uri = group_uri_from_domain(&domain_uri);
        let store = MembershipStore::new(&group_uri);
        Self {
            domain_uri,
            group_uri,
            required_streams,
            rule_ids: Vec::new(),
            state: Arc::new(RwLock::new(DomainState::Uninitialized)),
            store,
        }
    }

    pub fn domain_uri(&self) -> &str {
        &self.domain_uri
    }

    pub fn domain_group_uri(&self) -> &str {
        &self.group_uri
    }

    pub fn required_streams(&self) -> &[String] {
        &self.required_streams
    }

    pub fn rule_ids(&self) -> &[String] {
        &self.rule_ids
    }

    pub fn set_rule_ids(&mut self, ids: Vec<String>) {
        self.rule_ids = ids;
    }

    pub fn state(&self) -> DomainState {
        self.state.read().clone()
    }

    pub fn set_state(&self, state: DomainState) {
        *self.state.write() = state;
    }

    /// Handle used by the membership engine to write facts
    pub fn store(&self) -> &MembershipStore {
        &self.store
    }

    /// Exact-match lookup of `(entity, memberIn, group)`
    pub fn verify_membership(&self, entity_uri: &str) -> bool {
        self.store.contains_member(&Term::iri(entity_uri))
    }

    /// All membership facts, or only those about `entity_uri`
    pub fn get_membership_statements(&self, entity_uri: Option<&str>) -> Vec<Triple> {
        let entity = entity_uri.map(Term::iri);
        self.store.statements(entity.as_ref())
    }
}

impl fmt::Debug for ContextDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextDomain")
            .field("domain_uri", &self.domain_uri)
            .field("state", &self.state())
            .field("members", &self.store.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOMAIN: &str = "http://example.org/domains/lab308";

    fn member(entity: &str) -> Triple {
        Triple::new(
            Term::iri(entity),
            cashmere::MEMBER_IN,
            Term::iri(group_uri_from_domain(DOMAIN)),
        )
    }

    #[test]
    fn test_group_roundtrip() {
        let group = "http://example.org/domains/lab308/group";
        assert_eq!(group_uri_from_domain(&domain_uri_from_group(group)), group);
        assert_eq!(domain_uri_from_group(group), DOMAIN);
    }

    #[test]
    fn test_offer_deduplicates() {
        let domain = ContextDomain::new(DOMAIN, vec![]);
        let fact = member("http://example.org/alice");

        assert_eq!(domain.store().offer(&fact), MembershipInsert::Inserted);
        assert_eq!(domain.store().offer(&fact), MembershipInsert::Duplicate);
        assert_eq!(domain.get_membership_statements(None).len(), 1);
    }

    #[test]
    fn test_offer_rejects_other_predicates_and_groups() {
        let domain = ContextDomain::new(DOMAIN, vec![]);
        let wrong_predicate = Triple::new(
            Term::iri("http://example.org/alice"),
            "http://example.org/locatedIn",
            Term::iri(group_uri_from_domain(DOMAIN)),
        );
        let wrong_group = Triple::new(
            Term::iri("http://example.org/alice"),
            cashmere::MEMBER_IN,
            Term::iri("http://example.org/domains/other/group"),
        );

        assert_eq!(domain.store().offer(&wrong_predicate), MembershipInsert::Rejected);
        assert_eq!(domain.store().offer(&wrong_group), MembershipInsert::Rejected);
        assert!(domain.store().is_empty());
    }

    #[test]
    fn test_verify_membership_exact_match() {
        let domain = ContextDomain::new(DOMAIN, vec![]);
        domain.store().offer(&member("http://example.org/alice"));

        assert!(domain.verify_membership("http://example.org/alice"));
        assert!(!domain.verify_membership("http://example.org/alice/"));
        assert!(!domain.verify_membership("http://example.org/bob"));
    }

    #[test]
    fn test_statements_filtered_by_entity() {
        let domain = ContextDomain::new(DOMAIN, vec![]);
        domain.store().offer(&member("http://example.org/alice"));
        domain.store().offer(&member("http://example.org/bob"));

        let alice = domain.get_membership_statements(Some("http://example.org/alice"));
        assert_eq!(alice, vec![member("http://example.org/alice")]);
        assert_eq!(domain.get_membership_statements(None).len(), 2);
    }

    #[test]
    fn test_state_serving() {
        assert!(DomainState::Running.is_serving());
        assert!(DomainState::Degraded("hub down".into()).is_serving());
        assert!(!DomainState::Failed("bad rule".into()).is_serving());
        assert!(!DomainState::Uninitialized.is_serving());
    }
}
