// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ctxguard check`: decide one request without serving HTTP
//!
//! Starts the configured service stack, optionally feeds stream updates from
//! Turtle files, then asks the web access control service for a decision.

use anyhow::{anyhow, bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

use ctxguard_core::application::{AccessControlNode, NodeHandle};
use ctxguard_core::domain::authorization::AccessType;
use ctxguard_core::domain::service_config::{artifact_resource_uri, AccessControlConfig};
use ctxguard_core::infrastructure::{BusError, BusMessage, ServiceAddress};

#[derive(Args, Debug, Clone)]
pub struct CheckArgs {
    /// Workspace holding the artifact
    #[arg(long, requires = "artifact", conflicts_with = "resource")]
    pub workspace: Option<String>,

    /// Artifact name
    #[arg(long, requires = "workspace")]
    pub artifact: Option<String>,

    /// Full resource IRI instead of workspace and artifact
    #[arg(long)]
    pub resource: Option<String>,

    /// WebID of the requesting agent
    #[arg(long)]
    pub agent: Option<String>,

    /// HTTP method of the simulated request
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Feed a stream update first, as STREAM_URI=FILE.ttl (repeatable)
    #[arg(long = "update", value_name = "STREAM=FILE")]
    pub updates: Vec<String>,

    /// Time given to membership inference after the updates
    #[arg(long, default_value = "250")]
    pub settle_ms: u64,

    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct CheckOutcome {
    pub resource_uri: String,
    pub requester: Option<String>,
    pub access_type: AccessType,
    pub protected: bool,
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Returns whether the request was allowed
pub async fn run(args: CheckArgs, config_path: Option<PathBuf>) -> Result<bool> {
    let config = AccessControlConfig::load_or_default(config_path).context("Failed to load configuration")?;
    let node = AccessControlNode::new(config)
        .start()
        .await
        .context("Failed to start access-control node")?;

    let outcome = decide(&node, &args).await;
    node.shutdown().await;
    let outcome = outcome?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(outcome.allowed)
}

/// Feed the updates named in `args` and decide the request
pub async fn decide(node: &NodeHandle, args: &CheckArgs) -> Result<CheckOutcome> {
    let resource_uri = resource_uri(node, args)?;
    let access_type = AccessType::for_method(&args.method);

    for update in &args.updates {
        feed_update(node, update).await?;
    }
    if !args.updates.is_empty() && args.settle_ms > 0 {
        tokio::time::sleep(Duration::from_millis(args.settle_ms)).await;
    }

    let protected = node.registry.is_protected_for(&resource_uri, access_type);
    let decision = node
        .bus
        .request(
            ServiceAddress::WebAccessControl,
            BusMessage::AuthorizeAccess {
                resource_uri: resource_uri.clone(),
                requester: args.agent.clone(),
                access_type,
            },
        )
        .await;

    let (allowed, reason) = match decision {
        Ok(_) => (true, None),
        Err(BusError::Failed(err)) => (false, Some(err.message().to_string())),
        Err(err) => (false, Some(err.to_string())),
    };

    Ok(CheckOutcome {
        resource_uri,
        requester: args.agent.clone(),
        access_type,
        protected,
        allowed,
        reason,
    })
}

fn resource_uri(node: &NodeHandle, args: &CheckArgs) -> Result<String> {
    match (&args.resource, &args.workspace, &args.artifact) {
        (Some(resource), _, _) => Ok(resource.clone()),
        (None, Some(workspace), Some(artifact)) => Ok(artifact_resource_uri(
            &node.config.spec.service.base_uri,
            workspace,
            artifact,
        )),
        _ => bail!("either --resource or both --workspace and --artifact are required"),
    }
}

async fn feed_update(node: &NodeHandle, spec: &str) -> Result<()> {
    let (stream_uri, file) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("update '{}' must look like STREAM_URI=FILE", spec))?;
    let serialized_graph =
        std::fs::read_to_string(file).with_context(|| format!("Failed to read update {}", file))?;

    node.bus
        .request(
            ServiceAddress::ContextManagement,
            BusMessage::ContextStreamUpdate {
                stream_uri: stream_uri.to_string(),
                serialized_graph,
                timestamp_ms: chrono::Utc::now().timestamp_millis(),
            },
        )
        .await
        .with_context(|| format!("Stream update for {} rejected", stream_uri))?;
    Ok(())
}

fn print_outcome(outcome: &CheckOutcome) {
    println!("{}", outcome.resource_uri.bold());
    println!(
        "  Requester: {}",
        outcome.requester.as_deref().unwrap_or("(anonymous)")
    );
    println!("  Access: {}", outcome.access_type);
    println!("  Protected: {}", outcome.protected);
    if outcome.allowed {
        println!("  {}", "ALLOW".green().bold());
    } else {
        println!("  {}", "DENY".red().bold());
    }
    if let Some(reason) = &outcome.reason {
        println!("  Reason: {}", reason);
    }
}
