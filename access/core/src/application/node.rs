// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node wiring
//!
//! Builds and starts the access-control service stack from an
//! [`AccessControlConfig`]:
//!
//! 1. load static and profiled context graphs
//! 2. read every policy document, register its rules and index its shapes
//! 3. create context streams and domains, compile membership rules
//! 4. start the context management actor
//! 5. subscribe streams to their WebSub hubs (failure degrades the stream)
//! 6. start membership engines, then stream generators
//! 7. start the web access control actor
//!
//! Configuration errors in one domain or generator only affect that domain
//! or stream. Unreadable context or policy documents abort startup.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::authorization_registry::AuthorizationRegistry;
use crate::application::context_management::{ContextManagementService, PolicyIndex};
use crate::application::membership_engine::{load_domain_rules, MembershipEngine};
use crate::application::wac_service::WebAccessControlService;
use crate::domain::authorization::ContextBasedAuthorization;
use crate::domain::context_domain::ContextDomain;
use crate::domain::context_stream::ContextStream;
use crate::domain::rdf::Graph;
use crate::domain::service_config::AccessControlConfig;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::graph_loader::GraphLoader;
use crate::infrastructure::message_bus::{spawn_actor, MessageBus, ServiceAddress};
use crate::infrastructure::stream_generators::{spawn_generator, StreamGenerator, StreamGeneratorRegistry};
use crate::infrastructure::websub::HubClient;

/// Unstarted node
pub struct AccessControlNode {
    config: AccessControlConfig,
    loader: GraphLoader,
    hub: HubClient,
    generators: StreamGeneratorRegistry,
    events: EventBus,
}

/// Running node
pub struct NodeHandle {
    pub config: Arc<AccessControlConfig>,
    pub bus: MessageBus,
    pub registry: Arc<AuthorizationRegistry>,
    pub events: EventBus,
    pub streams: Vec<ContextStream>,
    pub domains: Vec<ContextDomain>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AccessControlNode {
    pub fn new(config: AccessControlConfig) -> Self {
        Self {
            config,
            loader: GraphLoader::new(),
            hub: HubClient::new(),
            generators: StreamGeneratorRegistry::with_builtins(),
            events: EventBus::with_default_capacity(),
        }
    }

    pub fn with_generators(mut self, generators: StreamGeneratorRegistry) -> Self {
        self.generators = generators;
        self
    }

    pub fn with_event_bus(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub async fn start(self) -> Result<NodeHandle> {
        self.config.validate().context("Configuration validation failed")?;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        let service = &self.config.spec.service;
        let ctx = &self.config.spec.context_management;

        let bus = MessageBus::new(Duration::from_millis(service.bus_timeout_ms));
        let registry = Arc::new(AuthorizationRegistry::with_event_bus(self.events.clone()));

        let static_context = self.load_optional(ctx.static_context.as_deref(), "static context").await?;
        let profiled_context = self.load_optional(ctx.profiled_context.as_deref(), "profiled context").await?;
        let policies = self.load_policies(&registry).await?;

        let (streams, domains, engines) = if ctx.enabled {
            self.build_context()
        } else {
            info!("Context management disabled; context conditions are not enforced");
            (Vec::new(), Vec::new(), Vec::new())
        };

        let context_service = ContextManagementService::new(static_context, profiled_context)
            .with_streams(streams.iter().cloned())
            .with_domains(domains.iter().cloned())
            .with_policies(if ctx.enabled { policies } else { PolicyIndex::new() })
            .fail_closed_on_missing_shapes(ctx.fail_closed_on_missing_shapes)
            .with_event_bus(self.events.clone());
        tasks.push(spawn_actor(
            &bus,
            ServiceAddress::ContextManagement,
            context_service,
            cancel.child_token(),
        )?);

        self.subscribe_hubs(&streams).await;

        let stream_map: HashMap<String, ContextStream> = streams
            .iter()
            .map(|s| (s.uri().to_string(), s.clone()))
            .collect();
        // generator failures must be visible before engines read stream health
        let generators = self.create_generators(&stream_map);
        for engine in engines {
            match engine.start(&stream_map, cancel.child_token()) {
                Ok(handle) => tasks.push(handle),
                Err(e) => warn!(error = %e, "Membership engine not started"),
            }
        }

        for (stream, generator, interval) in generators {
            tasks.push(spawn_generator(stream, generator, interval, cancel.child_token()));
        }

        let wac = WebAccessControlService::new(registry.clone(), bus.clone()).with_event_bus(self.events.clone());
        tasks.push(spawn_actor(&bus, ServiceAddress::WebAccessControl, wac, cancel.child_token())?);

        info!(
            node = %self.config.metadata.name,
            protected_resources = registry.protected_resources().len(),
            streams = streams.len(),
            domains = domains.len(),
            "Access-control node started"
        );

        Ok(NodeHandle {
            config: Arc::new(self.config),
            bus,
            registry,
            events: self.events,
            streams,
            domains,
            cancel,
            tasks,
        })
    }

    async fn load_optional(&self, location: Option<&str>, what: &str) -> Result<Graph> {
        let Some(location) = location else {
            return Ok(Graph::new());
        };
        let resolved = self.config.resolve_location(location);
        self.loader
            .load_graph(&resolved)
            .await
            .with_context(|| format!("Failed to load {} from {}", what, resolved))
    }

    /// Register the rules of every policy binding and index their shapes.
    ///
    /// Rules are attached to the binding's resource whatever their
    /// `acl:accessTo` says.
    async fn load_policies(&self, registry: &AuthorizationRegistry) -> Result<PolicyIndex> {
        let base_uri = &self.config.spec.service.base_uri;
        let mut index = PolicyIndex::new();
        for binding in &self.config.spec.policies {
            let Some(resource_uri) = binding.resource_iri(base_uri) else {
                anyhow::bail!("Policy '{}' has no resource", binding.document);
            };
            let location = self.config.resolve_location(&binding.document);
            let graph = self
                .loader
                .load_graph(&location)
                .await
                .with_context(|| format!("Failed to load policy for {}", resource_uri))?;
            let mut rules = ContextBasedAuthorization::from_graph(&graph)
                .with_context(|| format!("Invalid policy document {}", location))?;
            if rules.is_empty() {
                warn!(resource = %resource_uri, document = %location, "Policy declares no authorizations");
                continue;
            }
            for rule in &mut rules {
                rule.resource_uri = resource_uri.clone();
            }
            index.index_policy(&resource_uri, &location, &graph, &rules);
            registry.replace_authorizations(&resource_uri, rules);
            info!(resource = %resource_uri, rules = registry.authorizations(&resource_uri).len(), "Policy loaded");
        }
        Ok(index)
    }

    fn build_context(&self) -> (Vec<ContextStream>, Vec<ContextDomain>, Vec<MembershipEngine>) {
        let ctx = &self.config.spec.context_management;
        let streams: Vec<ContextStream> = ctx
            .context_streams
            .iter()
            .map(|cfg| ContextStream::new(&cfg.stream_uri, cfg.ontology_url.clone(), cfg.assertions.clone()))
            .collect();

        let mut domains = Vec::new();
        let mut engines = Vec::new();
        for cfg in &ctx.context_domains {
            let mut domain = ContextDomain::new(&cfg.domain_uri, cfg.streams.clone());
            match load_domain_rules(cfg, domain.domain_group_uri(), &self.config) {
                Ok(rules) => {
                    domain.set_rule_ids(rules.iter().map(|r| r.id.clone()).collect());
                    engines.push(MembershipEngine::new(domain.clone(), rules).with_event_bus(self.events.clone()));
                }
                Err(e) => {
                    MembershipEngine::new(domain.clone(), Vec::new())
                        .with_event_bus(self.events.clone())
                        .fail(e.to_string());
                }
            }
            domains.push(domain);
        }
        (streams, domains, engines)
    }

    async fn subscribe_hubs(&self, streams: &[ContextStream]) {
        let callback = self.config.stream_callback_url();
        for cfg in &self.config.spec.context_management.context_streams {
            let Some(hub_url) = &cfg.hub_url else {
                continue;
            };
            let Some(stream) = streams.iter().find(|s| s.uri() == cfg.stream_uri) else {
                continue;
            };
            if let Err(e) = self.hub.subscribe(hub_url, &cfg.stream_uri, &callback).await {
                stream.mark_degraded(e.to_string());
            }
        }
    }

    /// Build the configured generators; streams whose generator fails are degraded
    fn create_generators(
        &self,
        streams: &HashMap<String, ContextStream>,
    ) -> Vec<(ContextStream, Box<dyn StreamGenerator>, Duration)> {
        let mut generators = Vec::new();
        for cfg in &self.config.spec.context_management.context_streams {
            let (Some(generator_cfg), Some(stream)) = (&cfg.generator, streams.get(&cfg.stream_uri)) else {
                continue;
            };
            match self.generators.create(generator_cfg) {
                Ok(generator) => generators.push((
                    stream.clone(),
                    generator,
                    Duration::from_millis(generator_cfg.interval_ms),
                )),
                Err(e) => {
                    warn!(stream = %cfg.stream_uri, error = %e, "Stream generator not created");
                    stream.mark_degraded(e.to_string());
                }
            }
        }
        generators
    }
}

impl NodeHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every service and wait for their tasks
    pub async fn shutdown(self) {
        info!("Shutting down access-control node");
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Service task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authorization::AccessType;
    use crate::domain::context_domain::DomainState;
    use crate::domain::service_config::{
        ContextDomainConfig, ContextStreamConfig, GeneratorConfig, PolicyBinding, RuleSource,
    };
    use crate::infrastructure::message_bus::{BusMessage, BusReply};

    const STREAM: &str = "http://example.org/streams/LocatedAt";
    const DOMAIN: &str = "http://example.org/domains/lab308";

    const POLICY: &str = r#"
@prefix acl: <http://www.w3.org/ns/auth/acl#> .
@prefix cashmere: <https://aimas.cs.pub.ro/ont/cashmere#> .
@prefix sh: <http://www.w3.org/ns/shacl#> .
@prefix ex: <http://example.org/> .

ex:doorRule a cashmere:ContextBasedAuthorization ;
    acl:accessTo <http://other.example.org/placeholder> ;
    acl:mode acl:Write ;
    cashmere:hasAccessCondition ex:LabShape .

ex:LabShape a sh:NodeShape, cashmere:ContextDomainCondition ;
    sh:targetNode cashmere:accessRequester ;
    sh:property [
        sh:path cashmere:memberIn ;
        sh:hasValue <http://example.org/domains/lab308/group> ;
        sh:minCount 1
    ] .
"#;

    fn config(dir: &std::path::Path) -> AccessControlConfig {
        std::fs::write(dir.join("door.ttl"), POLICY).unwrap();
        let mut config = AccessControlConfig::default();
        config.source_dir = Some(dir.to_path_buf());
        config.spec.policies.push(PolicyBinding {
            resource_uri: None,
            workspace: Some("lab".to_string()),
            artifact: Some("door".to_string()),
            document: "door.ttl".to_string(),
        });
        config.spec.context_management.context_streams.push(ContextStreamConfig {
            stream_uri: STREAM.to_string(),
            ontology_url: None,
            assertions: vec![],
            hub_url: None,
            generator: None,
        });
        config
    }

    #[tokio::test]
    async fn test_policy_rules_bound_to_configured_resource() {
        let dir = tempfile::tempdir().unwrap();
        let node = AccessControlNode::new(config(dir.path())).start().await.unwrap();

        let door = "http://localhost:8080/workspaces/lab/artifacts/door";
        assert!(node.registry.has_access_authorization(door, AccessType::Write));
        assert!(!node.registry.is_write_protected("http://other.example.org/placeholder"));
        assert!(node.bus.is_registered(ServiceAddress::ContextManagement));
        assert!(node.bus.is_registered(ServiceAddress::WebAccessControl));

        // No domain for the shape's group: fail closed
        let reply = node
            .bus
            .request(
                ServiceAddress::WebAccessControl,
                BusMessage::AuthorizeAccess {
                    resource_uri: door.to_string(),
                    requester: Some("http://example.org/alexAgent".to_string()),
                    access_type: AccessType::Write,
                },
            )
            .await;
        assert!(reply.is_err());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_bad_rule_file_fails_only_its_domain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.spec.context_management.context_domains.push(ContextDomainConfig {
            domain_uri: DOMAIN.to_string(),
            streams: vec![STREAM.to_string()],
            membership_rules: vec![RuleSource::Path("missing.yaml".to_string())],
        });

        let node = AccessControlNode::new(config).start().await.unwrap();
        assert!(matches!(node.domains[0].state(), DomainState::Failed(_)));

        let reply = node
            .bus
            .request(
                ServiceAddress::ContextManagement,
                BusMessage::VerifyContextStreamSubscription {
                    topic: STREAM.to_string(),
                },
            )
            .await
            .unwrap();
        assert!(matches!(reply, BusReply::Flag(true)));
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_unreachable_hub_degrades_stream() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.spec.context_management.context_streams[0].hub_url = Some("http://127.0.0.1:9/hub".to_string());

        let node = AccessControlNode::new(config).start().await.unwrap();
        assert!(node.streams[0].degraded_reason().is_some());
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_generator_degrades_its_domain() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.spec.context_management.context_streams[0].generator = Some(GeneratorConfig {
            kind: "no-such-generator".to_string(),
            interval_ms: 1000,
            options: HashMap::new(),
        });
        config.spec.context_management.context_domains.push(ContextDomainConfig {
            domain_uri: DOMAIN.to_string(),
            streams: vec![STREAM.to_string()],
            membership_rules: vec![],
        });

        let node = AccessControlNode::new(config).start().await.unwrap();
        assert!(node.streams[0].degraded_reason().is_some());
        match node.domains[0].state() {
            DomainState::Degraded(reason) => assert!(reason.contains("no-such-generator")),
            other => panic!("expected degraded domain, got {other}"),
        }
        node.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_policy_document_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.spec.policies[0].document = "absent.ttl".to_string();
        assert!(AccessControlNode::new(config).start().await.is_err());
    }
}
