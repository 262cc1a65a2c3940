//! MPD playcount tracker
//!
//! Connects to MPD and records how often each song was played in a sticker.

use mpd_playcount::bus::{self, BusEvent};
use mpd_playcount::config;
use mpd_playcount::mpd::MpdClient;
use mpd_playcount::services::{PlaycountService, PlaycountSettings, ServiceHandle};

use anyhow::Result;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mpd_playcount=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting mpd-playcount v{} ({})",
        env!("MPDFAV_VERSION"),
        env!("MPDFAV_GIT_SHA")
    );

    let config = config::load_config()?;
    tracing::info!(
        "Configuration loaded, MPD at {}:{}",
        config.mpd.host,
        config.mpd.port
    );

    let bus = bus::create_bus();
    let shutdown = CancellationToken::new();

    // A lost or refused connection is fatal; there is no reconnect
    let client = MpdClient::connect(&config.mpd.host, config.mpd.port).await?;
    bus.publish(BusEvent::MpdConnected {
        addr: client.addr(),
        version: client.server_version().to_string(),
    });

    if !config.playcount.enabled {
        tracing::info!("Playcount service disabled, nothing to do");
        let mut client = client;
        client.close().await?;
        return Ok(());
    }

    let service = PlaycountService::new(client, PlaycountSettings::from(&config.playcount));
    let handle = ServiceHandle::new(service, bus.clone(), shutdown.clone());
    tracing::info!("Started {} service", handle.name());
    let mut service_task = tokio::spawn(handle.run());

    let result = tokio::select! {
        reason = shutdown_signal() => {
            bus.publish(BusEvent::ShuttingDown { reason: Some(reason.to_string()) });
            shutdown.cancel();
            service_task.await?
        }
        result = &mut service_task => result?,
    };

    tracing::info!("Shutdown complete");
    result
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
            "ctrl-c"
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
            "sigterm"
        }
    }
}
