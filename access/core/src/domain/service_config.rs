// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Access Control Configuration Types
//
// Defines the configuration schema for a ctxguard node, including:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Service identity (base URI, bus timeout, artifact runtime upstream)
// - Context management (static/profiled context, streams, domains)
// - Policy bindings from resources to policy documents

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::domain::membership_rule::MembershipRuleDefinition;

pub const API_VERSION: &str = "ctxguard/v1";
pub const KIND: &str = "AccessControlConfig";
pub const CONFIG_PATH_ENV: &str = "CTXGUARD_CONFIG_PATH";

/// Top-level Kubernetes-style configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessControlConfig {
    /// API version (must be "ctxguard/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "AccessControlConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: AccessControlSpec,

    /// Directory relative paths are resolved against
    #[serde(skip)]
    pub source_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessControlSpec {
    #[serde(default)]
    pub service: ServiceSettings,

    #[serde(default)]
    pub context_management: ContextManagementConfig,

    /// Resources protected by policy documents
    #[serde(default)]
    pub policies: Vec<PolicyBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
    /// Base of canonical resource IRIs and of the WebSub callback
    #[serde(default = "default_base_uri")]
    pub base_uri: String,

    /// Bounded wait for every request sent over the message bus
    #[serde(default = "default_bus_timeout_ms")]
    pub bus_timeout_ms: u64,

    /// Upstream that serves artifact actions once access is granted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_runtime_url: Option<String>,
}

fn default_base_uri() -> String {
    "http://localhost:8080".to_string()
}

fn default_bus_timeout_ms() -> u64 {
    5_000
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            base_uri: default_base_uri(),
            bus_timeout_ms: default_bus_timeout_ms(),
            artifact_runtime_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextManagementConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Deny instead of allow when a protected resource's policy has no shapes
    #[serde(default)]
    pub fail_closed_on_missing_shapes: bool,

    /// Turtle file path or URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_context: Option<String>,

    /// Turtle file path or URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiled_context: Option<String>,

    #[serde(default)]
    pub context_streams: Vec<ContextStreamConfig>,

    #[serde(default)]
    pub context_domains: Vec<ContextDomainConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for ContextManagementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fail_closed_on_missing_shapes: false,
            static_context: None,
            profiled_context: None,
            context_streams: Vec::new(),
            context_domains: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextStreamConfig {
    pub stream_uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology_url: Option<String>,

    /// Context assertion types carried by the stream
    #[serde(default)]
    pub assertions: Vec<String>,

    /// WebSub hub to subscribe to at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hub_url: Option<String>,

    /// Local generator feeding this stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<GeneratorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Registered generator name, e.g. "located-at"
    pub kind: String,

    #[serde(default = "default_generator_interval_ms")]
    pub interval_ms: u64,

    /// Generator-specific options
    #[serde(flatten)]
    pub options: HashMap<String, String>,
}

fn default_generator_interval_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDomainConfig {
    pub domain_uri: String,

    /// Streams the domain's rules consume
    #[serde(default)]
    pub streams: Vec<String>,

    #[serde(default)]
    pub membership_rules: Vec<RuleSource>,
}

/// Membership rule given inline or as a path to a YAML file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleSource {
    Path(String),
    Inline(MembershipRuleDefinition),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyBinding {
    /// Explicit resource IRI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_uri: Option<String>,

    /// Workspace and artifact names, combined with the base URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,

    /// Turtle policy document (rules and shapes)
    pub document: String,
}

impl PolicyBinding {
    pub fn resource_iri(&self, base_uri: &str) -> Option<String> {
        if let Some(uri) = &self.resource_uri {
            return Some(uri.clone());
        }
        match (&self.workspace, &self.artifact) {
            (Some(ws), Some(art)) => Some(artifact_resource_uri(base_uri, ws, art)),
            _ => None,
        }
    }
}

/// Canonical IRI of an artifact
pub fn artifact_resource_uri(base_uri: &str, workspace: &str, artifact: &str) -> String {
    format!(
        "{}/workspaces/{}/artifacts/{}",
        base_uri.trim_end_matches('/'),
        workspace,
        artifact
    )
}

impl Default for AccessControlConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "ctxguard-node".to_string(),
                labels: None,
            },
            spec: AccessControlSpec::default(),
            source_dir: None,
        }
    }
}

impl AccessControlConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_yaml_str(&content)?;
        config.source_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Discover configuration file using precedence order
    /// 1. CTXGUARD_CONFIG_PATH environment variable
    /// 2. ./ctxguard-config.yaml (working directory)
    /// 3. ~/.ctxguard/config.yaml (user home)
    /// 4. /etc/ctxguard/config.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./ctxguard-config.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".ctxguard").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        let system_config = PathBuf::from("/etc/ctxguard/config.yaml");
        if system_config.exists() {
            return Some(system_config);
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using empty defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("CTXGUARD_BASE_URI") {
            tracing::info!("Environment override: CTXGUARD_BASE_URI={}", val);
            self.spec.service.base_uri = val;
        }

        if let Ok(val) = std::env::var("CTXGUARD_BUS_TIMEOUT_MS") {
            match val.parse::<u64>() {
                Ok(ms) => {
                    tracing::info!("Environment override: CTXGUARD_BUS_TIMEOUT_MS={}", ms);
                    self.spec.service.bus_timeout_ms = ms;
                }
                Err(_) => tracing::warn!(
                    "Invalid value for CTXGUARD_BUS_TIMEOUT_MS: '{}'. Expected milliseconds. Ignoring.",
                    val
                ),
            }
        }

        if let Ok(val) = std::env::var("CTXGUARD_FAIL_CLOSED_ON_MISSING_SHAPES") {
            match val.to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => {
                    tracing::info!("Environment override: CTXGUARD_FAIL_CLOSED_ON_MISSING_SHAPES=true");
                    self.spec.context_management.fail_closed_on_missing_shapes = true;
                }
                "false" | "0" | "no" | "off" => {
                    tracing::info!("Environment override: CTXGUARD_FAIL_CLOSED_ON_MISSING_SHAPES=false");
                    self.spec.context_management.fail_closed_on_missing_shapes = false;
                }
                _ => {
                    tracing::warn!(
                        "Invalid value for CTXGUARD_FAIL_CLOSED_ON_MISSING_SHAPES: '{}'. Expected true/false. Ignoring.",
                        val
                    );
                }
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let service = &self.spec.service;
        if service.base_uri.is_empty() {
            anyhow::bail!("spec.service.base_uri cannot be empty");
        }
        url::Url::parse(&service.base_uri)
            .map_err(|e| anyhow::anyhow!("spec.service.base_uri is not a URL: {}", e))?;
        if service.bus_timeout_ms == 0 {
            anyhow::bail!("spec.service.bus_timeout_ms must be positive");
        }

        let ctx = &self.spec.context_management;
        let mut streams = HashSet::new();
        for stream in &ctx.context_streams {
            if stream.stream_uri.is_empty() {
                anyhow::bail!("Context stream URI cannot be empty");
            }
            if !streams.insert(stream.stream_uri.as_str()) {
                anyhow::bail!("Duplicate context stream: {}", stream.stream_uri);
            }
            if let Some(generator) = &stream.generator {
                if generator.interval_ms == 0 {
                    anyhow::bail!(
                        "Generator interval must be positive for stream: {}",
                        stream.stream_uri
                    );
                }
            }
        }

        let mut domains = HashSet::new();
        for domain in &ctx.context_domains {
            if domain.domain_uri.is_empty() {
                anyhow::bail!("Context domain URI cannot be empty");
            }
            if !domains.insert(domain.domain_uri.as_str()) {
                anyhow::bail!("Duplicate context domain: {}", domain.domain_uri);
            }
            for stream in &domain.streams {
                if !streams.contains(stream.as_str()) {
                    anyhow::bail!(
                        "Context domain '{}' requires undeclared stream '{}'",
                        domain.domain_uri,
                        stream
                    );
                }
            }
        }

        for policy in &self.spec.policies {
            if policy.resource_iri(&service.base_uri).is_none() {
                anyhow::bail!(
                    "Policy '{}' needs resource_uri or both workspace and artifact",
                    policy.document
                );
            }
            if policy.document.is_empty() {
                anyhow::bail!("Policy document path cannot be empty");
            }
        }

        Ok(())
    }

    /// Resolve a configured location: URLs and absolute paths are kept,
    /// relative paths are joined to the config file's directory
    pub fn resolve_location(&self, location: &str) -> String {
        if location.starts_with("http://") || location.starts_with("https://") {
            return location.to_string();
        }
        let path = Path::new(location);
        if path.is_absolute() {
            return location.to_string();
        }
        match &self.source_dir {
            Some(dir) => dir.join(path).display().to_string(),
            None => location.to_string(),
        }
    }

    /// WebSub callback receiving stream deliveries
    pub fn stream_callback_url(&self) -> String {
        format!(
            "{}/context/streams/updates",
            self.spec.service.base_uri.trim_end_matches('/')
        )
    }
}
