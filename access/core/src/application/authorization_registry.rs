// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Authorization Registry
//!
//! Index from resource IRI to the ordered list of rules protecting it.
//!
//! - A resource with no rules is public and never appears as a key.
//! - All rules of a resource are OR-combined.
//! - Every mutation happens under one write lock, so concurrent adds are
//!   never lost.
//!
//! The registry is constructed explicitly and shared through `Arc`; there is
//! no process-global instance.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

use crate::domain::authorization::{AccessType, ContextBasedAuthorization};
use crate::domain::events::AccessControlEvent;
use crate::infrastructure::event_bus::EventBus;

/// Suffix of a resource's authorization document
pub const WAC_SUFFIX: &str = "/wac";

#[derive(Default)]
pub struct AuthorizationRegistry {
    rules: RwLock<HashMap<String, Vec<ContextBasedAuthorization>>>,
    events: Option<EventBus>,
}

impl AuthorizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_bus(events: EventBus) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            events: Some(events),
        }
    }

    /// Append a rule to the resource's list, creating the list if needed
    pub fn add_authorization(&self, resource_uri: &str, rule: ContextBasedAuthorization) {
        let rule_id = rule.id.clone();
        self.rules
            .write()
            .entry(resource_uri.to_string())
            .or_default()
            .push(rule);
        debug!(resource = resource_uri, rule = %rule_id, "Authorization added");

        self.publish(AccessControlEvent::AuthorizationAdded {
            resource_uri: resource_uri.to_string(),
            rule_id,
            added_at: Utc::now(),
        });
    }

    /// Remove the first rule equal to `rule`; drops the key when the list empties.
    ///
    /// Returns whether a rule was removed.
    pub fn remove_authorization(&self, resource_uri: &str, rule: &ContextBasedAuthorization) -> bool {
        let (removed, now_public) = {
            let mut rules = self.rules.write();
            let Some(list) = rules.get_mut(resource_uri) else {
                return false;
            };
            let removed = match list.iter().position(|r| r == rule) {
                Some(index) => Some(list.remove(index)),
                None => None,
            };
            let now_public = list.is_empty();
            if now_public {
                rules.remove(resource_uri);
            }
            (removed, now_public)
        };

        let Some(removed) = removed else {
            return false;
        };
        debug!(resource = resource_uri, rule = %removed.id, now_public, "Authorization removed");
        self.publish(AccessControlEvent::AuthorizationRemoved {
            resource_uri: resource_uri.to_string(),
            rule_id: removed.id,
            resource_unprotected: now_public,
            removed_at: Utc::now(),
        });
        true
    }

    /// Swap every rule of a resource at once; an empty list makes it public
    pub fn replace_authorizations(&self, resource_uri: &str, rules: Vec<ContextBasedAuthorization>) {
        let mut map = self.rules.write();
        if rules.is_empty() {
            map.remove(resource_uri);
        } else {
            map.insert(resource_uri.to_string(), rules);
        }
    }

    /// Forget a resource entirely, e.g. when it is deleted
    pub fn remove_resource(&self, resource_uri: &str) -> usize {
        self.rules
            .write()
            .remove(resource_uri)
            .map_or(0, |rules| rules.len())
    }

    pub fn has_access_authorization(&self, resource_uri: &str, access_type: AccessType) -> bool {
        self.rules
            .read()
            .get(resource_uri)
            .is_some_and(|rules| rules.iter().any(|r| r.grants(access_type)))
    }

    pub fn is_read_protected(&self, resource_uri: &str) -> bool {
        self.has_access_authorization(resource_uri, AccessType::Read)
    }

    /// Write or Append present
    pub fn is_write_protected(&self, resource_uri: &str) -> bool {
        self.has_access_authorization(resource_uri, AccessType::Write)
            || self.has_access_authorization(resource_uri, AccessType::Append)
    }

    pub fn is_control_protected(&self, resource_uri: &str) -> bool {
        self.has_access_authorization(resource_uri, AccessType::Control)
    }

    /// Whether a request needing `access_type` must be checked
    pub fn is_protected_for(&self, resource_uri: &str, access_type: AccessType) -> bool {
        match access_type {
            AccessType::Read => self.is_read_protected(resource_uri),
            AccessType::Write | AccessType::Append => self.is_write_protected(resource_uri),
            AccessType::Control => self.is_control_protected(resource_uri),
        }
    }

    pub fn get_authorisation_document_uri(&self, resource_uri: &str) -> Option<String> {
        self.rules
            .read()
            .contains_key(resource_uri)
            .then(|| format!("{}{}", resource_uri, WAC_SUFFIX))
    }

    /// Snapshot of a resource's rules in evaluation order
    pub fn authorizations(&self, resource_uri: &str) -> Vec<ContextBasedAuthorization> {
        self.rules
            .read()
            .get(resource_uri)
            .cloned()
            .unwrap_or_default()
    }

    pub fn protected_resources(&self) -> Vec<String> {
        let mut resources: Vec<String> = self.rules.read().keys().cloned().collect();
        resources.sort();
        resources
    }

    fn publish(&self, event: AccessControlEvent) {
        if let Some(events) = &self.events {
            events.publish(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rdf::Term;
    use std::sync::Arc;

    const DOOR: &str = "http://localhost:8080/workspaces/lab/artifacts/door";

    fn rule(types: &[AccessType], shape: &str) -> ContextBasedAuthorization {
        ContextBasedAuthorization::for_requester(DOOR, types.iter().copied(), Some(Term::iri(shape))).unwrap()
    }

    #[test]
    fn test_unregistered_resource_is_public() {
        let registry = AuthorizationRegistry::new();
        assert!(!registry.is_write_protected(DOOR));
        assert!(!registry.is_read_protected(DOOR));
        assert_eq!(registry.get_authorisation_document_uri(DOOR), None);
    }

    #[test]
    fn test_add_then_remove() {
        let registry = AuthorizationRegistry::new();
        let r = rule(&[AccessType::Write], "http://example.org/S");

        registry.add_authorization(DOOR, r.clone());
        assert!(registry.has_access_authorization(DOOR, AccessType::Write));
        assert!(!registry.has_access_authorization(DOOR, AccessType::Read));
        assert_eq!(
            registry.get_authorisation_document_uri(DOOR),
            Some(format!("{}/wac", DOOR))
        );

        assert!(registry.remove_authorization(DOOR, &r));
        assert!(!registry.has_access_authorization(DOOR, AccessType::Write));
        assert_eq!(registry.get_authorisation_document_uri(DOOR), None);
        assert!(registry.protected_resources().is_empty());
    }

    #[test]
    fn test_remove_keeps_other_rules() {
        let registry = AuthorizationRegistry::new();
        let write = rule(&[AccessType::Write], "http://example.org/S");
        let read = rule(&[AccessType::Read], "http://example.org/S");
        registry.add_authorization(DOOR, write.clone());
        registry.add_authorization(DOOR, read);

        registry.remove_authorization(DOOR, &write);
        assert!(registry.is_read_protected(DOOR));
        assert!(!registry.is_write_protected(DOOR));
        assert_eq!(registry.authorizations(DOOR).len(), 1);
    }

    #[test]
    fn test_remove_unknown_rule_is_noop() {
        let registry = AuthorizationRegistry::new();
        assert!(!registry.remove_authorization(DOOR, &rule(&[AccessType::Write], "http://example.org/S")));
    }

    #[test]
    fn test_append_counts_as_write_protection() {
        let registry = AuthorizationRegistry::new();
        registry.add_authorization(DOOR, rule(&[AccessType::Append], "http://example.org/S"));
        assert!(registry.is_write_protected(DOOR));
        assert!(registry.is_protected_for(DOOR, AccessType::Write));
        assert!(!registry.is_control_protected(DOOR));
    }

    #[test]
    fn test_replace_with_empty_makes_public() {
        let registry = AuthorizationRegistry::new();
        registry.add_authorization(DOOR, rule(&[AccessType::Write], "http://example.org/S"));
        registry.replace_authorizations(DOOR, vec![]);
        assert_eq!(registry.get_authorisation_document_uri(DOOR), None);
    }

    #[test]
    fn test_remove_resource() {
        let registry = AuthorizationRegistry::new();
        registry.add_authorization(DOOR, rule(&[AccessType::Write], "http://example.org/S"));
        registry.add_authorization(DOOR, rule(&[AccessType::Read], "http://example.org/S"));
        assert_eq!(registry.remove_resource(DOOR), 2);
        assert!(!registry.is_read_protected(DOOR));
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        let registry = Arc::new(AuthorizationRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        registry.add_authorization(
                            DOOR,
                            rule(&[AccessType::Write], &format!("http://example.org/S{}-{}", i, j)),
                        );
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.authorizations(DOOR).len(), 400);
    }

    #[tokio::test]
    async fn test_events_published() {
        let events = EventBus::new(10);
        let mut rx = events.subscribe();
        let registry = AuthorizationRegistry::with_event_bus(events);
        let r = rule(&[AccessType::Write], "http://example.org/S");

        registry.add_authorization(DOOR, r.clone());
        registry.remove_authorization(DOOR, &r);

        assert!(matches!(rx.recv().await.unwrap(), AccessControlEvent::AuthorizationAdded { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            AccessControlEvent::AuthorizationRemoved { resource_unprotected: true, .. }
        ));
    }
}
