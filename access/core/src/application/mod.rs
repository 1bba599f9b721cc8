// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod authorization_registry;
pub mod membership_engine;
pub mod context_management;
pub mod wac_service;
pub mod node;

// Re-export services for convenience
pub use authorization_registry::AuthorizationRegistry;
pub use context_management::{ContextManagementService, PolicyIndex};
pub use membership_engine::MembershipEngine;
pub use node::{AccessControlNode, NodeHandle};
pub use wac_service::WebAccessControlService;
