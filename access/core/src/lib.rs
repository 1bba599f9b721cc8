// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! ctxguard core
//!
//! Context-aware access control for hypermedia workspaces and artifacts.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Authorization registry, context streams, membership inference,
//!   request-time shape validation and the HTTP enforcement boundary
//!
//! | Layer | Contents |
//! |-------|----------|
//! | `domain` | graphs, rules, streams, domains, shapes, config |
//! | `application` | registry, membership engine, service actors |
//! | `infrastructure` | message bus, event bus, Turtle codec, loaders, WebSub client |
//! | `presentation` | axum router and enforcement middleware |

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
