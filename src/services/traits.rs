use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::bus::SharedBus;

/// Context passed to a service while it runs
pub struct ServiceContext {
    /// Event bus for publishing events
    pub bus: SharedBus,
    /// Cancellation token for shutdown coordination
    pub shutdown: CancellationToken,
}

/// A long-running consumer of the MPD client.
///
/// Lifecycle (start, shutdown, stop notification) is handled by `ServiceHandle`.
#[async_trait]
pub trait Service: Send + 'static {
    /// Short name used in logs and bus events (e.g., "playcount")
    fn name(&self) -> &'static str;

    /// Run until `ctx.shutdown` is cancelled or a fatal error occurs.
    ///
    /// Must release its connections before returning.
    async fn run(&mut self, ctx: ServiceContext) -> Result<()>;
}
