// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Web Access Control Service
//!
//! Actor at `ServiceAddress::WebAccessControl`. Decides `AuthorizeAccess`
//! requests against the [`AuthorizationRegistry`] and serves the Turtle
//! authorization document of a resource.
//!
//! A request is allowed when some rule of the resource grants the access type,
//! the rule's entity covers the requester, and the context management service
//! accepts the requester's context. Group entities are resolved by asking the
//! context management service for domain membership.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::authorization_registry::AuthorizationRegistry;
use crate::domain::authorization::{rules_to_graph, AccessType, ContextBasedAuthorization};
use crate::domain::errors::{AccessError, AccessResult};
use crate::domain::events::AccessControlEvent;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::message_bus::{
    BusHandler, BusMessage, BusReply, Handled, MessageBus, ServiceAddress,
};
use crate::infrastructure::turtle::to_turtle;

pub struct WebAccessControlService {
    registry: Arc<AuthorizationRegistry>,
    bus: MessageBus,
    events: Option<EventBus>,
}

impl WebAccessControlService {
    pub fn new(registry: Arc<AuthorizationRegistry>, bus: MessageBus) -> Self {
        Self {
            registry,
            bus,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    fn authorize(&self, resource_uri: String, requester: Option<String>, access_type: AccessType) -> Handled {
        if !self.registry.is_protected_for(&resource_uri, access_type) {
            let decision = Decision::new(resource_uri, requester, access_type, self.events.clone());
            return Handled::Ready(decision.record(Ok(BusReply::Accepted)));
        }

        let Some(requester) = requester.filter(|r| !r.is_empty()) else {
            let decision = Decision::new(resource_uri, None, access_type, self.events.clone());
            return Handled::Ready(decision.record(Err(AccessError::unauthorized(
                "protected resource requires a requester identity",
            ))));
        };

        let candidates: Vec<ContextBasedAuthorization> = self
            .registry
            .authorizations(&resource_uri)
            .into_iter()
            .filter(|rule| rule.satisfies(access_type))
            .collect();

        let bus = self.bus.clone();
        let decision = Decision::new(
            resource_uri.clone(),
            Some(requester.clone()),
            access_type,
            self.events.clone(),
        );
        Handled::Deferred(Box::pin(async move {
            let outcome = async {
                if !entity_matches(&bus, &candidates, &requester).await? {
                    return Err(AccessError::unauthorized(format!(
                        "no rule grants {} on {} to {}",
                        access_type, resource_uri, requester
                    )));
                }
                bus.request(
                    ServiceAddress::ContextManagement,
                    BusMessage::ValidateContextBasedAccess {
                        requester: requester.clone(),
                        resource_uri: resource_uri.clone(),
                        access_type: Some(access_type),
                    },
                )
                .await
                .map_err(AccessError::from)?;
                Ok(BusReply::Accepted)
            }
            .await;
            decision.record(outcome)
        }))
    }

    fn wac_document(&self, resource_uri: &str) -> AccessResult<BusReply> {
        let rules = self.registry.authorizations(resource_uri);
        if rules.is_empty() {
            return Err(AccessError::not_found(format!(
                "{} has no authorization document",
                resource_uri
            )));
        }
        Ok(BusReply::Document(to_turtle(&rules_to_graph(&rules))))
    }
}

/// Whether any candidate rule's entity covers the requester
async fn entity_matches(
    bus: &MessageBus,
    candidates: &[ContextBasedAuthorization],
    requester: &str,
) -> AccessResult<bool> {
    for rule in candidates {
        match rule.covers_requester(requester) {
            Some(true) => return Ok(true),
            Some(false) => continue,
            None => {
                let reply = bus
                    .request(
                        ServiceAddress::ContextManagement,
                        BusMessage::VerifyDomainMembership {
                            group_uri: rule.entity_uri.clone(),
                            agent: requester.to_string(),
                        },
                    )
                    .await
                    .map_err(AccessError::from)?;
                if matches!(reply, BusReply::Flag(true)) {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Logs, counts and publishes one access decision
struct Decision {
    resource_uri: String,
    requester: Option<String>,
    access_type: AccessType,
    events: Option<EventBus>,
}

impl Decision {
    fn new(
        resource_uri: String,
        requester: Option<String>,
        access_type: AccessType,
        events: Option<EventBus>,
    ) -> Self {
        Self {
            resource_uri,
            requester,
            access_type,
            events,
        }
    }

    fn record(self, outcome: AccessResult<BusReply>) -> AccessResult<BusReply> {
        let allowed = outcome.is_ok();
        let reason = outcome.as_ref().err().map(|e| e.message().to_string());
        if allowed {
            info!(
                resource = %self.resource_uri,
                requester = self.requester.as_deref().unwrap_or("-"),
                access = %self.access_type,
                "Access allowed"
            );
        } else {
            warn!(
                resource = %self.resource_uri,
                requester = self.requester.as_deref().unwrap_or("-"),
                access = %self.access_type,
                reason = reason.as_deref().unwrap_or(""),
                "Access denied"
            );
        }
        metrics::counter!(
            "ctxguard_access_decisions_total",
            "decision" => if allowed { "allow" } else { "deny" }
        )
        .increment(1);

        if let Some(events) = &self.events {
            events.publish(AccessControlEvent::AccessDecided {
                resource_uri: self.resource_uri,
                requester: self.requester,
                access_type: self.access_type,
                allowed,
                reason,
                decided_at: Utc::now(),
            });
        }
        outcome
    }
}

#[async_trait]
impl BusHandler for WebAccessControlService {
    async fn handle(&mut self, message: BusMessage) -> Handled {
        match message {
            BusMessage::AuthorizeAccess {
                resource_uri,
                requester,
                access_type,
            } => self.authorize(resource_uri, requester, access_type),
            BusMessage::GetWacResource { resource_uri } => Handled::Ready(self.wac_document(&resource_uri)),
            BusMessage::AddAuthorization { rule } => {
                let resource_uri = rule.resource_uri.clone();
                self.registry.add_authorization(&resource_uri, rule);
                Handled::Ready(Ok(BusReply::Accepted))
            }
            BusMessage::RemoveAuthorization { rule } => {
                let resource_uri = rule.resource_uri.clone();
                if self.registry.remove_authorization(&resource_uri, &rule) {
                    Handled::Ready(Ok(BusReply::Accepted))
                } else {
                    debug!(resource = %resource_uri, rule = %rule.id, "No matching authorization to remove");
                    Handled::Ready(Err(AccessError::not_found(format!(
                        "no matching authorization on {}",
                        resource_uri
                    ))))
                }
            }
            other => Handled::Ready(Err(AccessError::malformed(format!(
                "web access control does not handle {}",
                other.name()
            )))),
        }
    }
}
