//! ServiceHandle - wraps a Service with consistent lifecycle management
//!
//! Runs the service once: there is no retry, a lost MPD session ends the
//! service and the error is handed back to the caller.

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::traits::{Service, ServiceContext};
use crate::bus::{BusEvent, SharedBus};

pub struct ServiceHandle<T: Service> {
    service: T,
    bus: SharedBus,
    shutdown: CancellationToken,
}

impl<T: Service> ServiceHandle<T> {
    pub fn new(service: T, bus: SharedBus, shutdown: CancellationToken) -> Self {
        Self {
            service,
            bus,
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.service.name()
    }

    /// Run the service with lifecycle management
    /// - Runs the service's main loop
    /// - Publishes ServiceStopped on exit, whatever the outcome
    pub async fn run(mut self) -> Result<()> {
        let name = self.service.name();

        let result = if self.shutdown.is_cancelled() {
            info!("{}: shutdown before start", name);
            Ok(())
        } else {
            info!("Starting service: {}", name);
            self.run_once().await
        };

        self.bus.publish(BusEvent::ServiceStopped {
            service: name.to_string(),
        });

        info!("Service {} stopped", name);
        result
    }

    async fn run_once(&mut self) -> Result<()> {
        let name = self.service.name();
        let ctx = ServiceContext {
            bus: self.bus.clone(),
            shutdown: self.shutdown.clone(),
        };

        let result = self.service.run(ctx).await;
        match &result {
            Ok(()) => info!("{}: completed normally", name),
            Err(e) => error!("{}: error: {:#}", name, e),
        }
        result
    }
}
