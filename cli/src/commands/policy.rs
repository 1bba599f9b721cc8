// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Policy document commands
//!
//! Commands: inspect

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;

use ctxguard_core::domain::authorization::{AccessType, ContextBasedAuthorization};
use ctxguard_core::domain::rdf::{Graph, Term};
use ctxguard_core::domain::shapes::{extract_shapes, node_shapes, referenced_domain_groups};
use ctxguard_core::infrastructure::graph_loader::GraphLoader;
use ctxguard_core::infrastructure::turtle::to_turtle;

#[derive(Subcommand)]
pub enum PolicyCommand {
    /// Parse a policy document and print its rules and shapes
    Inspect {
        /// Path or URL of the Turtle policy document
        #[arg(value_name = "DOCUMENT")]
        document: String,

        /// Print the access-condition shapes as Turtle
        #[arg(long)]
        shapes: bool,
    },
}

pub async fn handle_command(command: PolicyCommand) -> Result<()> {
    match command {
        PolicyCommand::Inspect { document, shapes } => inspect(&document, shapes).await,
    }
}

/// Rules and access-condition shapes of one policy document
pub struct PolicySummary {
    pub rules: Vec<ContextBasedAuthorization>,
    pub shapes: Graph,
    pub domain_groups: Vec<String>,
}

pub fn summarize(policy: &Graph) -> Result<PolicySummary> {
    let rules = ContextBasedAuthorization::from_graph(policy).context("Policy rules are malformed")?;
    let roots: Vec<Term> = rules
        .iter()
        .filter_map(|rule| rule.access_condition_shape.clone())
        .collect();
    let shapes = extract_shapes(policy, &roots);
    let domain_groups = referenced_domain_groups(&shapes);
    Ok(PolicySummary {
        rules,
        shapes,
        domain_groups,
    })
}

async fn inspect(document: &str, print_shapes: bool) -> Result<()> {
    let graph = GraphLoader::new()
        .load_graph(document)
        .await
        .with_context(|| format!("Failed to load policy {}", document))?;
    let summary = summarize(&graph)?;

    println!("{} ({} triples)", document.bold(), graph.len());
    println!();

    println!("{}", format!("Rules: {}", summary.rules.len()).bold());
    for rule in &summary.rules {
        let modes: Vec<String> = rule.access_types.iter().map(AccessType::to_string).collect();
        println!("  {}", rule.id);
        println!("    Resource: {}", rule.resource_uri);
        println!("    Modes: {}", modes.join(", "));
        println!("    Entity: {:?} {}", rule.entity_type, rule.entity_uri);
        match &rule.access_condition_shape {
            Some(shape) => println!("    Condition: {}", shape),
            None => println!("    Condition: {}", "(none)".dimmed()),
        }
    }
    println!();

    println!(
        "{}",
        format!("Shapes: {}", node_shapes(&summary.shapes).len()).bold()
    );
    for group in &summary.domain_groups {
        println!("  Requires membership in {}", group);
    }
    if summary.rules.is_empty() {
        println!("{}", "WARNING: document grants nothing".yellow());
    }

    if print_shapes && !summary.shapes.is_empty() {
        println!();
        print!("{}", to_turtle(&summary.shapes));
    }

    Ok(())
}
