// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Message Bus
//!
//! Request/reply messaging between the access-control services. Each service
//! registers one logical [`ServiceAddress`] and drains its own mailbox, so a
//! service's state is only ever touched by its own task.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`MessageBus::request`] | send and await a reply, bounded by a timeout |
//! | [`BusHandler`] | per-service message handling |
//! | [`spawn_actor`] | mailbox loop; deferred replies run off the loop |
//!
//! A handler that itself needs another service's answer returns
//! [`Handled::Deferred`]; the mailbox keeps serving while that future runs.

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::authorization::{AccessType, ContextBasedAuthorization};
use crate::domain::errors::{AccessError, AccessResult};
use crate::domain::rdf::Graph;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceAddress {
    ContextManagement,
    WebAccessControl,
}

impl fmt::Display for ServiceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceAddress::ContextManagement => f.write_str("context-management"),
            ServiceAddress::WebAccessControl => f.write_str("web-access-control"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum BusMessage {
    GetStaticContext,
    /// `None` returns the whole profiled graph
    GetProfiledContext {
        assertion_type: Option<String>,
    },
    ContextStreamUpdate {
        stream_uri: String,
        serialized_graph: String,
        timestamp_ms: i64,
    },
    /// Replies `Flag(true)` if the topic is a managed stream
    VerifyContextStreamSubscription {
        topic: String,
    },
    /// Replies `Accepted` on allow, fails with `Unauthorized` on deny.
    /// With an access type only the conditions of rules granting it apply.
    ValidateContextBasedAccess {
        requester: String,
        resource_uri: String,
        access_type: Option<AccessType>,
    },
    VerifyDomainMembership {
        group_uri: String,
        agent: String,
    },
    AuthorizeAccess {
        resource_uri: String,
        requester: Option<String>,
        access_type: AccessType,
    },
    /// Replies with the Turtle authorization document
    GetWacResource {
        resource_uri: String,
    },
    AddAuthorization {
        rule: ContextBasedAuthorization,
    },
    RemoveAuthorization {
        rule: ContextBasedAuthorization,
    },
}

impl BusMessage {
    pub fn name(&self) -> &'static str {
        match self {
            BusMessage::GetStaticContext => "GetStaticContext",
            BusMessage::GetProfiledContext { .. } => "GetProfiledContext",
            BusMessage::ContextStreamUpdate { .. } => "ContextStreamUpdate",
            BusMessage::VerifyContextStreamSubscription { .. } => "VerifyContextStreamSubscription",
            BusMessage::ValidateContextBasedAccess { .. } => "ValidateContextBasedAccess",
            BusMessage::VerifyDomainMembership { .. } => "VerifyDomainMembership",
            BusMessage::AuthorizeAccess { .. } => "AuthorizeAccess",
            BusMessage::GetWacResource { .. } => "GetWacResource",
            BusMessage::AddAuthorization { .. } => "AddAuthorization",
            BusMessage::RemoveAuthorization { .. } => "RemoveAuthorization",
        }
    }
}

#[derive(Debug, Clone)]
pub enum BusReply {
    Accepted,
    Flag(bool),
    Graph(Graph),
    Document(String),
}

pub struct Envelope {
    pub message: BusMessage,
    pub reply: oneshot::Sender<AccessResult<BusReply>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("no service registered at {0}")]
    NoHandler(ServiceAddress),

    #[error("{0} is already registered")]
    AlreadyRegistered(ServiceAddress),

    #[error("{address} did not reply within {timeout_ms}ms")]
    Timeout {
        address: ServiceAddress,
        timeout_ms: u128,
    },

    #[error("{0} stopped before replying")]
    Closed(ServiceAddress),

    #[error(transparent)]
    Failed(#[from] AccessError),
}

impl From<BusError> for AccessError {
    fn from(err: BusError) -> Self {
        match err {
            BusError::Failed(inner) => inner,
            other => AccessError::internal(other.to_string()),
        }
    }
}

/// Shared bus; cheap to clone
#[derive(Clone)]
pub struct MessageBus {
    routes: Arc<RwLock<HashMap<ServiceAddress, mpsc::Sender<Envelope>>>>,
    timeout: Duration,
}

impl MessageBus {
    pub fn new(timeout: Duration) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Claim an address and return its mailbox
    pub fn register(&self, address: ServiceAddress) -> Result<mpsc::Receiver<Envelope>, BusError> {
        let mut routes = self.routes.write();
        if routes.get(&address).is_some_and(|tx| !tx.is_closed()) {
            return Err(BusError::AlreadyRegistered(address));
        }
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        routes.insert(address, tx);
        Ok(rx)
    }

    pub fn unregister(&self, address: ServiceAddress) {
        self.routes.write().remove(&address);
    }

    pub fn is_registered(&self, address: ServiceAddress) -> bool {
        self.routes
            .read()
            .get(&address)
            .is_some_and(|tx| !tx.is_closed())
    }

    /// Send a request and wait for the reply, bounded by the bus timeout
    pub async fn request(&self, address: ServiceAddress, message: BusMessage) -> Result<BusReply, BusError> {
        self.request_with_timeout(address, message, self.timeout).await
    }

    pub async fn request_with_timeout(
        &self,
        address: ServiceAddress,
        message: BusMessage,
        timeout: Duration,
    ) -> Result<BusReply, BusError> {
        let sender = self
            .routes
            .read()
            .get(&address)
            .cloned()
            .ok_or(BusError::NoHandler(address))?;

        let name = message.name();
        let (reply_tx, reply_rx) = oneshot::channel();
        let exchange = async {
            sender
                .send(Envelope {
                    message,
                    reply: reply_tx,
                })
                .await
                .map_err(|_| BusError::Closed(address))?;
            reply_rx.await.map_err(|_| BusError::Closed(address))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(result)) => result.map_err(BusError::Failed),
            Ok(Err(err)) => Err(err),
            Err(_) => {
                warn!(%address, message = name, "Bus request timed out");
                Err(BusError::Timeout {
                    address,
                    timeout_ms: timeout.as_millis(),
                })
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(Duration::from_millis(5_000))
    }
}

/// Result of handling one message
pub enum Handled {
    Ready(AccessResult<BusReply>),
    /// Completed off the mailbox loop
    Deferred(BoxFuture<'static, AccessResult<BusReply>>),
}

impl From<AccessResult<BusReply>> for Handled {
    fn from(result: AccessResult<BusReply>) -> Self {
        Handled::Ready(result)
    }
}

#[async_trait]
pub trait BusHandler: Send + 'static {
    async fn handle(&mut self, message: BusMessage) -> Handled;

    /// Called once when the mailbox loop exits
    async fn shutdown(&mut self) {}
}

/// Register `handler` at `address` and run its mailbox until cancelled
pub fn spawn_actor<H: BusHandler>(
    bus: &MessageBus,
    address: ServiceAddress,
    mut handler: H,
    cancel: CancellationToken,
) -> Result<JoinHandle<()>, BusError> {
    let mut mailbox = bus.register(address)?;
    let bus = bus.clone();

    Ok(tokio::spawn(async move {
        info!(%address, "Service started");
        loop {
            let envelope = tokio::select! {
                _ = cancel.cancelled() => break,
                envelope = mailbox.recv() => match envelope {
                    Some(envelope) => envelope,
                    None => break,
                },
            };

            let name = envelope.message.name();
            debug!(%address, message = name, "Handling bus message");
            match handler.handle(envelope.message).await {
                Handled::Ready(result) => {
                    let _ = envelope.reply.send(result);
                }
                Handled::Deferred(future) => {
                    let reply = envelope.reply;
                    tokio::spawn(async move {
                        let _ = reply.send(future.await);
                    });
                }
            }
        }
        handler.shutdown().await;
        bus.unregister(address);
        info!(%address, "Service stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl BusHandler for Echo {
        async fn handle(&mut self, message: BusMessage) -> Handled {
            match message {
                BusMessage::VerifyContextStreamSubscription { topic } => {
                    Handled::Ready(Ok(BusReply::Flag(topic == "known")))
                }
                BusMessage::GetWacResource { resource_uri } => Handled::Deferred(Box::pin(async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(BusReply::Document(resource_uri))
                })),
                BusMessage::GetStaticContext => Handled::Deferred(Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(BusReply::Accepted)
                })),
                other => Handled::Ready(Err(AccessError::not_found(other.name()))),
            }
        }
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = MessageBus::default();
        let cancel = CancellationToken::new();
        spawn_actor(&bus, ServiceAddress::ContextManagement, Echo, cancel.clone()).unwrap();

        let reply = bus
            .request(
                ServiceAddress::ContextManagement,
                BusMessage::VerifyContextStreamSubscription {
                    topic: "known".to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, BusReply::Flag(true)));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_failure_propagates() {
        let bus = MessageBus::default();
        let cancel = CancellationToken::new();
        spawn_actor(&bus, ServiceAddress::ContextManagement, Echo, cancel.clone()).unwrap();

        let err = bus
            .request(
                ServiceAddress::ContextManagement,
                BusMessage::GetProfiledContext { assertion_type: None },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Failed(AccessError::NotFound(_))));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_no_handler() {
        let bus = MessageBus::default();
        let err = bus
            .request(ServiceAddress::WebAccessControl, BusMessage::GetStaticContext)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoHandler(ServiceAddress::WebAccessControl)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let bus = MessageBus::new(Duration::from_millis(20));
        let cancel = CancellationToken::new();
        spawn_actor(&bus, ServiceAddress::ContextManagement, Echo, cancel.clone()).unwrap();

        let err = bus
            .request(ServiceAddress::ContextManagement, BusMessage::GetStaticContext)
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Timeout { .. }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_deferred_reply_does_not_block_mailbox() {
        let bus = MessageBus::default();
        let cancel = CancellationToken::new();
        spawn_actor(&bus, ServiceAddress::ContextManagement, Echo, cancel.clone()).unwrap();

        let slow = {
            let bus = bus.clone();
            tokio::spawn(async move {
                bus.request(
                    ServiceAddress::ContextManagement,
                    BusMessage::GetWacResource {
                        resource_uri: "r".to_string(),
                    },
                )
                .await
            })
        };
        let fast = bus
            .request_with_timeout(
                ServiceAddress::ContextManagement,
                BusMessage::VerifyContextStreamSubscription {
                    topic: "other".to_string(),
                },
                Duration::from_millis(40),
            )
            .await
            .unwrap();
        assert!(matches!(fast, BusReply::Flag(false)));
        assert!(matches!(slow.await.unwrap(), Ok(BusReply::Document(d)) if d == "r"));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_double_registration_rejected() {
        let bus = MessageBus::default();
        let _mailbox = bus.register(ServiceAddress::WebAccessControl).unwrap();
        assert!(matches!(
            bus.register(ServiceAddress::WebAccessControl),
            Err(BusError::AlreadyRegistered(_))
        ));
    }
}
