// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Enforcement middleware for artifact routes
//!
//! Requests against a protected artifact are held until the web access
//! control service answers. Any failure on the decision path denies with 401.

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::authorization::AccessType;
use crate::infrastructure::message_bus::{BusError, BusMessage, ServiceAddress};
use crate::presentation::api::{AppState, ArtifactPath};
use crate::presentation::error::ApiError;

/// Header carrying the requesting agent's WebID
pub const AGENT_HEADER: &str = "X-Agent-WebID";

pub async fn enforce_access(
    State(state): State<Arc<AppState>>,
    Path(target): Path<ArtifactPath>,
    request: Request,
    next: Next,
) -> Response {
    let resource_uri = state.artifact_uri(&target.workspace, &target.artifact);
    let access_type = AccessType::for_method(request.method().as_str());

    if !state.registry.is_protected_for(&resource_uri, access_type) {
        debug!(resource = %resource_uri, %access_type, "Resource not protected");
        return next.run(request).await;
    }

    let requester = request
        .headers()
        .get(AGENT_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let decision = state
        .bus
        .request(
            ServiceAddress::WebAccessControl,
            BusMessage::AuthorizeAccess {
                resource_uri: resource_uri.clone(),
                requester: requester.clone(),
                access_type,
            },
        )
        .await;

    match decision {
        Ok(_) => next.run(request).await,
        Err(BusError::Failed(err)) => ApiError::denied(err.message()).into_response(),
        Err(err) => {
            // the service never recorded this one
            metrics::counter!("ctxguard_access_decisions_total", "decision" => "deny").increment(1);
            warn!(
                resource = %resource_uri,
                requester = requester.as_deref().unwrap_or("<none>"),
                %access_type,
                error = %err,
                "Access decision unavailable, denying"
            );
            ApiError::denied(err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::authorization_registry::AuthorizationRegistry;
    use crate::application::wac_service::WebAccessControlService;
    use crate::domain::authorization::ContextBasedAuthorization;
    use crate::domain::errors::AccessError;
    use crate::domain::rdf::Term;
    use crate::infrastructure::message_bus::{spawn_actor, BusHandler, BusReply, Handled, MessageBus};
    use crate::presentation::api::app;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request as HttpRequest, StatusCode};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::ServiceExt;

    const BASE: &str = "http://localhost:8080";
    const DOOR: &str = "http://localhost:8080/workspaces/lab/artifacts/door";
    const ALEX: &str = "http://example.org/alexAgent";

    /// Allows only Alex
    struct FakeContext;

    #[async_trait]
    impl BusHandler for FakeContext {
        async fn handle(&mut self, message: BusMessage) -> Handled {
            match message {
                BusMessage::ValidateContextBasedAccess { requester, .. } if requester == ALEX => {
                    Handled::Ready(Ok(BusReply::Accepted))
                }
                BusMessage::ValidateContextBasedAccess { .. } => {
                    Handled::Ready(Err(AccessError::unauthorized("requester is not in lab308")))
                }
                other => Handled::Ready(Err(AccessError::not_found(other.name()))),
            }
        }
    }

    fn setup(with_wac: bool) -> (axum::Router, CancellationToken) {
        let bus = MessageBus::new(Duration::from_millis(200));
        let registry = Arc::new(AuthorizationRegistry::new());
        registry.add_authorization(
            DOOR,
            ContextBasedAuthorization::for_requester(
                DOOR,
                [AccessType::Write],
                Some(Term::iri("http://example.org/LabShape")),
            )
            .unwrap(),
        );
        let cancel = CancellationToken::new();
        spawn_actor(&bus, ServiceAddress::ContextManagement, FakeContext, cancel.clone()).unwrap();
        if with_wac {
            spawn_actor(
                &bus,
                ServiceAddress::WebAccessControl,
                WebAccessControlService::new(registry.clone(), bus.clone()),
                cancel.clone(),
            )
            .unwrap();
        }
        (app(AppState::new(bus, registry, BASE)), cancel)
    }

    fn action(method: &str, path: &str, agent: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().method(method).uri(path);
        if let Some(agent) = agent {
            builder = builder.header(AGENT_HEADER, agent);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_authorized_write_passes() {
        let (router, cancel) = setup(true);
        let response = router
            .oneshot(action("POST", "/workspaces/lab/artifacts/door/open", Some(ALEX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&body).contains("authorized"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unauthorized_write_is_401() {
        let (router, cancel) = setup(true);
        for agent in [Some("http://example.org/bobAgent"), None] {
            let response = router
                .clone()
                .oneshot(action("PUT", "/workspaces/lab/artifacts/door", agent))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_read_of_write_only_protected_artifact_passes() {
        let (router, cancel) = setup(true);
        let response = router
            .oneshot(action("GET", "/workspaces/lab/artifacts/door", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_options_needs_write_access() {
        let (router, cancel) = setup(true);
        let response = router
            .clone()
            .oneshot(action(
                "OPTIONS",
                "/workspaces/lab/artifacts/door/open",
                Some("http://example.org/bobAgent"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = router
            .oneshot(action("OPTIONS", "/workspaces/lab/artifacts/door/open", Some(ALEX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_unprotected_artifact_passes() {
        let (router, cancel) = setup(true);
        let response = router
            .oneshot(action("POST", "/workspaces/lab/artifacts/lamp/toggle", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_missing_decision_service_denies() {
        let (router, cancel) = setup(false);
        let response = router
            .oneshot(action("POST", "/workspaces/lab/artifacts/door/open", Some(ALEX)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        cancel.cancel();
    }
}
