// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `ctxguard serve`: run the service stack behind the HTTP router

use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use ctxguard_core::application::AccessControlNode;
use ctxguard_core::domain::service_config::AccessControlConfig;
use ctxguard_core::infrastructure::{EventBus, EventBusError, EventReceiver};
use ctxguard_core::presentation::{app, AppState};

pub async fn run(config_path: Option<PathBuf>, host: &str, port: u16) -> Result<()> {
    let config = AccessControlConfig::load_or_default(config_path).context("Failed to load configuration")?;
    info!(
        name = %config.metadata.name,
        base_uri = %config.spec.service.base_uri,
        policies = config.spec.policies.len(),
        "Configuration loaded"
    );

    let events = EventBus::with_default_capacity();
    let event_log = spawn_event_log(events.subscribe());

    let node = AccessControlNode::new(config)
        .with_event_bus(events)
        .start()
        .await
        .context("Failed to start access-control node")?;

    for stream in &node.streams {
        if let Some(reason) = stream.degraded_reason() {
            warn!(stream = %stream.uri(), %reason, "Context stream degraded");
        }
    }
    for domain in &node.domains {
        info!(domain = %domain.domain_uri(), state = %domain.state(), "Context domain");
    }

    let router = app(AppState::from_node(&node));

    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("ctxguard listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    node.shutdown().await;
    event_log.abort();
    info!("ctxguard stopped");

    Ok(())
}

fn spawn_event_log(mut events: EventReceiver) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(subject = %event.subject(), ?event, "Domain event"),
                Err(EventBusError::Lagged(skipped)) => warn!(skipped, "Event log lagging"),
                Err(_) => break,
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
