use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use anyhow::{Context, Result};
use mdns_registry::transport::Segment;
use mdns_registry::{Config, Registry, Service, ServiceEvent};

// One event loop drives every service, as on a single-threaded responder
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("mdns_registry=info,mdns_registryd=info"))
        )
        .init();

    tracing::info!("Starting mdns-registryd");

    // Load config
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/mdns-registry/registry.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    tracing::info!("Loaded config from {}", config_path);

    let segment = Segment::with_latency(Duration::from_millis(config.segment.latency_ms));

    // Another host on the segment that already owns some names
    let peer = Registry::new(Arc::new(segment.join()), config.timing);
    for claimed in &config.segment.peers {
        peer.publish(claimed.clone().without_probe());
    }
    if !config.segment.peers.is_empty() {
        tracing::info!("Simulated peer holds {} service(s)", config.segment.peers.len());
    }

    let registry = Registry::new(Arc::new(segment.join()), config.timing);

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    let mut watchers = Vec::new();
    for service_config in config.services {
        let service = registry.publish(service_config);
        watchers.push(tokio::spawn(watch_service(service, cancel.clone())));
    }

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutdown signal received");

    cancel.cancel();
    for watcher in watchers {
        let _ = watcher.await;
    }

    // Goodbye packets for everything still advertised
    if let Err(e) = registry.unpublish_all().await {
        tracing::error!("Failed to unpublish services: {}", e);
    }
    if let Err(e) = peer.unpublish_all().await {
        tracing::error!("Failed to unpublish peer services: {}", e);
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Log a service's notifications until shutdown
async fn watch_service(service: Service, cancel: CancellationToken) {
    let mut events = service.subscribe();

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(ServiceEvent::Up { fqdn }) => {
                        tracing::info!("{} is up", fqdn);
                    }
                    Ok(ServiceEvent::Renamed { from, to }) => {
                        tracing::info!("{} renamed to {}", from, to);
                    }
                    Ok(ServiceEvent::Error(reason)) => {
                        tracing::error!("Error on {}: {}", service.fqdn(), reason);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} event(s) for {}", missed, service.fqdn());
                    }
                    Err(RecvError::Closed) => break,
                }
            }

            _ = cancel.cancelled() => {
                tracing::debug!("Stopped watching {}", service.fqdn());
                break;
            }
        }
    }
}
