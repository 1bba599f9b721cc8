// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::{Path, PathBuf};

use ctxguard_core::domain::service_config::{AccessControlConfig, RuleSource, CONFIG_PATH_ENV};

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/config-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/config-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective configuration as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./ctxguard-config.yaml)
        #[arg(short, long, default_value = "./ctxguard-config.yaml")]
        output: PathBuf,

        /// Include a stream, a context domain and a policy binding
        #[arg(long)]
        examples: bool,
    },
}

pub async fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, examples } => generate(&output, examples).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = AccessControlConfig::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. {}: {}",
            CONFIG_PATH_ENV,
            std::env::var(CONFIG_PATH_ENV)
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./ctxguard-config.yaml");
        println!("  4. ~/.ctxguard/config.yaml");
        println!("  5. /etc/ctxguard/config.yaml");
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config).context("Failed to render configuration")?);
        return Ok(());
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let service = &config.spec.service;
    println!("{}", "Service:".bold());
    println!("  Name: {}", config.metadata.name);
    println!("  Base URI: {}", service.base_uri);
    println!("  Bus timeout: {}ms", service.bus_timeout_ms);
    println!(
        "  Artifact runtime: {}",
        service.artifact_runtime_url.as_deref().unwrap_or("(none)")
    );
    println!();

    let ctx = &config.spec.context_management;
    println!("{}", "Context management:".bold());
    println!("  Enabled: {}", ctx.enabled);
    println!("  Missing shapes: {}", if ctx.fail_closed_on_missing_shapes { "deny" } else { "allow" });
    println!("  Static context: {}", ctx.static_context.as_deref().unwrap_or("(none)"));
    println!("  Profiled context: {}", ctx.profiled_context.as_deref().unwrap_or("(none)"));
    println!("  Streams: {}", ctx.context_streams.len());
    for stream in &ctx.context_streams {
        println!("    {}", stream.stream_uri.bold());
        if let Some(hub) = &stream.hub_url {
            println!("      Hub: {}", hub);
        }
        if let Some(generator) = &stream.generator {
            println!("      Generator: {} every {}ms", generator.kind, generator.interval_ms);
        }
    }
    println!("  Domains: {}", ctx.context_domains.len());
    for domain in &ctx.context_domains {
        println!("    {}", domain.domain_uri.bold());
        println!("      Streams: {}", domain.streams.join(", "));
        for rule in &domain.membership_rules {
            match rule {
                RuleSource::Path(path) => println!("      Rule file: {}", path),
                RuleSource::Inline(def) => println!("      Rule: {} (inline)", def.id),
            }
        }
    }
    println!();

    println!("{}", "Policies:".bold());
    for binding in &config.spec.policies {
        let resource = binding
            .resource_iri(&service.base_uri)
            .unwrap_or_else(|| "(unresolved)".to_string());
        println!("  {} → {}", resource, binding.document);
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = AccessControlConfig::load_or_default(config_path).context("Failed to load configuration")?;

    config.validate().context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: &Path, with_examples: bool) -> Result<()> {
    let sample = if with_examples { EXAMPLES_TEMPLATE } else { MINIMAL_TEMPLATE };

    std::fs::write(output, sample).with_context(|| format!("Failed to write config to {:?}", output))?;

    println!("{}", format!("✓ Configuration generated: {}", output.display()).green());

    Ok(())
}
