// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::authorization::AccessType;
use crate::domain::context_domain::DomainState;

/// Access-control domain events
///
/// Published on the event bus after the fact; nothing in the decision path
/// depends on a subscriber being present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AccessControlEvent {
    AuthorizationAdded {
        resource_uri: String,
        rule_id: String,
        added_at: DateTime<Utc>,
    },
    AuthorizationRemoved {
        resource_uri: String,
        rule_id: String,
        /// Whether the resource became public as a result
        resource_unprotected: bool,
        removed_at: DateTime<Utc>,
    },
    StreamUpdated {
        stream_uri: String,
        triple_count: usize,
        timestamp_ms: i64,
        received_at: DateTime<Utc>,
    },
    MembershipInferred {
        domain_uri: String,
        entity: String,
        rule_id: String,
        inferred_at: DateTime<Utc>,
    },
    DomainStateChanged {
        domain_uri: String,
        state: DomainState,
        changed_at: DateTime<Utc>,
    },
    AccessDecided {
        resource_uri: String,
        requester: Option<String>,
        access_type: AccessType,
        allowed: bool,
        reason: Option<String>,
        decided_at: DateTime<Utc>,
    },
}

impl AccessControlEvent {
    /// Resource or domain the event concerns
    pub fn subject(&self) -> &str {
        match self {
            AccessControlEvent::AuthorizationAdded { resource_uri, .. }
            | AccessControlEvent::AuthorizationRemoved { resource_uri, .. }
            | AccessControlEvent::AccessDecided { resource_uri, .. } => resource_uri,
            AccessControlEvent::StreamUpdated { stream_uri, .. } => stream_uri,
            AccessControlEvent::MembershipInferred { domain_uri, .. }
            | AccessControlEvent::DomainStateChanged { domain_uri, .. } => domain_uri,
        }
    }
}
