// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP surface of the access-control node
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | liveness |
//! | `GET /context/streams/updates` | WebSub intent verification |
//! | `POST /context/streams/updates` | WebSub content delivery |
//! | `GET /context/static` | static context as Turtle |
//! | `GET /context/profiled` | profiled context, optionally projected |
//! | `GET /workspaces/{workspace}/artifacts/{artifact}/wac` | authorization document |
//! | `* /workspaces/{workspace}/artifacts/{artifact}[/...]` | enforced artifact actions |

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use crate::application::authorization_registry::AuthorizationRegistry;
use crate::application::node::NodeHandle;
use crate::domain::service_config::artifact_resource_uri;
use crate::infrastructure::message_bus::{BusMessage, BusReply, MessageBus, ServiceAddress};
use crate::infrastructure::turtle::{to_turtle, TURTLE_MEDIA_TYPE};
use crate::infrastructure::websub::{parse_self_link, DeliveryBody, VerificationQuery, MODE_SUBSCRIBE};
use crate::presentation::access_filter::{enforce_access, AGENT_HEADER};
use crate::presentation::error::ApiError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub bus: MessageBus,
    pub registry: Arc<AuthorizationRegistry>,
    pub base_uri: String,
    pub artifact_runtime_url: Option<String>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(bus: MessageBus, registry: Arc<AuthorizationRegistry>, base_uri: impl Into<String>) -> Self {
        Self {
            bus,
            registry,
            base_uri: base_uri.into(),
            artifact_runtime_url: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_artifact_runtime(mut self, url: impl Into<String>) -> Self {
        self.artifact_runtime_url = Some(url.into());
        self
    }

    pub fn from_node(node: &NodeHandle) -> Self {
        let service = &node.config.spec.service;
        let state = Self::new(node.bus.clone(), node.registry.clone(), service.base_uri.clone());
        match &service.artifact_runtime_url {
            Some(url) => state.with_artifact_runtime(url.clone()),
            None => state,
        }
    }

    pub fn artifact_uri(&self, workspace: &str, artifact: &str) -> String {
        artifact_resource_uri(&self.base_uri, workspace, artifact)
    }
}

#[derive(Debug, Deserialize)]
pub struct ArtifactPath {
    pub workspace: String,
    pub artifact: String,
}

#[derive(Debug, Deserialize)]
pub struct ProfiledQuery {
    pub assertion: Option<String>,
}

pub fn app(state: AppState) -> Router {
    let state = Arc::new(state);

    let artifacts = Router::new()
        .route("/workspaces/{workspace}/artifacts/{artifact}", any(artifact_action))
        .route("/workspaces/{workspace}/artifacts/{artifact}/{*action}", any(artifact_action))
        .route_layer(middleware::from_fn_with_state(state.clone(), enforce_access));

    Router::new()
        .route("/health", get(health))
        .route(
            "/context/streams/updates",
            get(verify_subscription).post(deliver_stream_update),
        )
        .route("/context/static", get(static_context))
        .route("/context/profiled", get(profiled_context))
        .route("/workspaces/{workspace}/artifacts/{artifact}/wac", get(wac_document))
        .merge(artifacts)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "protected_resources": state.registry.protected_resources().len(),
        "context_management": state.bus.is_registered(ServiceAddress::ContextManagement),
        "web_access_control": state.bus.is_registered(ServiceAddress::WebAccessControl),
    }))
}

// ============================================================================
// WebSub callback
// ============================================================================

async fn verify_subscription(
    State(state): State<Arc<AppState>>,
    Query(query): Query<VerificationQuery>,
) -> Result<Response, ApiError> {
    let (Some(mode), Some(topic), Some(challenge)) = (query.mode, query.topic, query.challenge) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    if mode != MODE_SUBSCRIBE {
        debug!(%mode, %topic, "Rejecting non-subscribe verification");
        return Ok(StatusCode::NOT_FOUND.into_response());
    }

    let reply = state
        .bus
        .request(
            ServiceAddress::ContextManagement,
            BusMessage::VerifyContextStreamSubscription { topic: topic.clone() },
        )
        .await?;

    match reply {
        BusReply::Flag(true) => {
            debug!(%topic, "Subscription verified");
            Ok(([(header::CONTENT_TYPE, "text/plain")], challenge).into_response())
        }
        _ => {
            warn!(%topic, "Verification for a topic that is not managed here");
            Ok(StatusCode::NOT_FOUND.into_response())
        }
    }
}

async fn deliver_stream_update(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let stream_uri = headers
        .get(header::LINK)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_self_link)
        .ok_or_else(|| ApiError::bad_request("missing Link header with rel=\"self\""))?;

    let delivery: DeliveryBody = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("invalid delivery body: {e}")))?;
    let payload = delivery
        .payload
        .filter(|payload| !payload.graph_serialized.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("delivery carries no graph"))?;

    state
        .bus
        .request(
            ServiceAddress::ContextManagement,
            BusMessage::ContextStreamUpdate {
                stream_uri: stream_uri.clone(),
                serialized_graph: payload.graph_serialized,
                timestamp_ms: payload.timestamp_ms,
            },
        )
        .await?;

    debug!(stream = %stream_uri, "Stream update accepted");
    Ok(Json(json!({ "status": "accepted" })).into_response())
}

// ============================================================================
// Context documents
// ============================================================================

fn turtle_response(turtle: String) -> Response {
    ([(header::CONTENT_TYPE, TURTLE_MEDIA_TYPE)], turtle).into_response()
}

async fn static_context(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    match state
        .bus
        .request(ServiceAddress::ContextManagement, BusMessage::GetStaticContext)
        .await?
    {
        BusReply::Graph(graph) => Ok(turtle_response(to_turtle(&graph))),
        other => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unexpected reply {other:?}"),
        )),
    }
}

async fn profiled_context(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProfiledQuery>,
) -> Result<Response, ApiError> {
    match state
        .bus
        .request(
            ServiceAddress::ContextManagement,
            BusMessage::GetProfiledContext {
                assertion_type: query.assertion,
            },
        )
        .await?
    {
        BusReply::Graph(graph) => Ok(turtle_response(to_turtle(&graph))),
        other => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unexpected reply {other:?}"),
        )),
    }
}

// ============================================================================
// Artifacts
// ============================================================================

async fn wac_document(
    State(state): State<Arc<AppState>>,
    Path(target): Path<ArtifactPath>,
) -> Result<Response, ApiError> {
    let resource_uri = state.artifact_uri(&target.workspace, &target.artifact);
    let Some(document_uri) = state.registry.get_authorisation_document_uri(&resource_uri) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    match state
        .bus
        .request(ServiceAddress::WebAccessControl, BusMessage::GetWacResource { resource_uri })
        .await?
    {
        BusReply::Document(turtle) => {
            let link = format!("<{document_uri}>; rel=\"self\"; type=\"{TURTLE_MEDIA_TYPE}\"");
            Ok((
                [(header::CONTENT_TYPE, TURTLE_MEDIA_TYPE.to_string()), (header::LINK, link)],
                turtle,
            )
                .into_response())
        }
        other => Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("unexpected reply {other:?}"),
        )),
    }
}

/// Runs only after the access filter let the request through
async fn artifact_action(
    State(state): State<Arc<AppState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let Some(runtime) = &state.artifact_runtime_url else {
        return Ok(Json(json!({ "status": "authorized" })).into_response());
    };

    let path = uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = format!("{}{}", runtime.trim_end_matches('/'), path);

    let mut upstream = state.http.request(method, &url).body(body);
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        upstream = upstream.header(header::CONTENT_TYPE, content_type.clone());
    }
    if let Some(agent) = headers.get(AGENT_HEADER) {
        upstream = upstream.header(AGENT_HEADER, agent.clone());
    }

    let response = upstream.send().await.map_err(|e| {
        warn!(%url, error = %e, "Artifact runtime unreachable");
        ApiError::new(StatusCode::BAD_GATEWAY, format!("artifact runtime unreachable: {e}"))
    })?;

    let status = response.status();
    let content_type = response.headers().get(header::CONTENT_TYPE).cloned();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_GATEWAY, format!("artifact runtime response: {e}")))?;

    let mut reply = (status, bytes).into_response();
    if let Some(content_type) = content_type {
        reply.headers_mut().insert(header::CONTENT_TYPE, content_type);
    }
    Ok(reply)
}
