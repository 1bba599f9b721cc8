// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Access-control error taxonomy
//!
//! Every failure in the access-control path is one of four kinds. Only
//! `Unauthorized` is a normal outcome; the others are faults that must still
//! resolve to a denial when an access decision is in flight.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum AccessError {
    /// Unknown stream, resource or domain
    #[error("not found: {0}")]
    NotFound(String),

    /// Validation failed or requester not covered by any rule
    #[error("access denied: {0}")]
    Unauthorized(String),

    /// Unparsable graph or request
    #[error("malformed input: {0}")]
    Malformed(String),

    /// Store, engine or messaging failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl AccessError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status code surfaced at the boundary
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Unauthorized(_) => 403,
            Self::Malformed(_) => 400,
            Self::Internal(_) => 500,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotFound(m) | Self::Unauthorized(m) | Self::Malformed(m) | Self::Internal(m) => m,
        }
    }
}

pub type AccessResult<T> = Result<T, AccessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AccessError::not_found("s").status_code(), 404);
        assert_eq!(AccessError::unauthorized("s").status_code(), 403);
        assert_eq!(AccessError::malformed("s").status_code(), 400);
        assert_eq!(AccessError::internal("s").status_code(), 500);
    }

    #[test]
    fn test_message_is_preserved() {
        let err = AccessError::unauthorized("requester is not a member of lab308");
        assert_eq!(err.message(), "requester is not a member of lab308");
        assert_eq!(
            err.to_string(),
            "access denied: requester is not a member of lab308"
        );
    }
}
