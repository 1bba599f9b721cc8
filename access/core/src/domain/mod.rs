// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure access-control model: RDF graphs, authorization rules, context streams,
//! context domains, membership rules and shape validation.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Types and invariants; the only I/O is reading config and rule files

pub mod authorization;
pub mod context_domain;
pub mod context_stream;
pub mod errors;
pub mod events;
pub mod membership_rule;
pub mod rdf;
pub mod service_config;
pub mod shapes;
pub mod vocab;
