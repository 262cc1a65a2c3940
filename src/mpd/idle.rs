//! Idle notifications on a dedicated connection
//!
//! [`IdleWatcher`] owns its own [`Connection`] and keeps it in `idle` in a
//! background task. Each reported subsystem is handed to one-shot
//! subscribers: a subscription receives at most one subsystem name and is
//! then dropped, so consumers resubscribe after each delivery.
//!
//! Loop states:
//!
//! ```text
//! Enter ──idle──▶ Waiting ──reply──▶ Dispatch ──▶ Enter
//!   │                                   │
//!   └──────── shutdown raised ──────────┴──▶ Shut
//! ```
//!
//! Shutdown raises the signal and writes `noidle` under the writer lock, so a
//! pending wait returns promptly and no new wait can start after it.

use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::Result;
use super::info::read_idle_reply;
use super::transport::{CommandId, Connection, LineReader, LineWriter};
use crate::bus::{BusEvent, SharedBus};

/// A one-shot registration for the next matching subsystem change.
struct IdleSubscription {
    tx: Option<oneshot::Sender<String>>,
    active: bool,
    /// Empty means any subsystem.
    subsystems: Vec<String>,
}

impl IdleSubscription {
    fn wants(&self, subsystem: &str) -> bool {
        self.subsystems.is_empty() || self.subsystems.iter().any(|s| s == subsystem)
    }

    fn deliver(&mut self, subsystem: &str) {
        if let Some(tx) = self.tx.take() {
            if tx.send(subsystem.to_string()).is_err() {
                debug!("Idle subscriber for {} went away", subsystem);
            }
        }
        self.active = false;
    }

    fn is_abandoned(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

#[derive(Default)]
struct Subscriptions {
    /// False once the loop has exited; new subscribers are closed immediately.
    open: bool,
    list: Vec<IdleSubscription>,
}

impl Subscriptions {
    /// Deliver `subsystem` to every active matching subscription and drop them.
    fn dispatch(&mut self, subsystem: &str) -> usize {
        let mut delivered = 0;
        for sub in self.list.iter_mut() {
            if sub.active && sub.wants(subsystem) {
                sub.deliver(subsystem);
                delivered += 1;
            }
        }
        self.list.retain(|sub| sub.active && !sub.is_abandoned());
        delivered
    }

    fn close(&mut self) {
        self.open = false;
        self.list.clear();
    }
}

struct IdleWriter {
    writer: LineWriter,
    /// An `idle` command is on the wire and its reply has not been read.
    waiting: bool,
}

enum IdleState {
    Enter,
    Waiting(CommandId),
    Dispatch(Vec<String>),
    Shut,
}

/// Background idle loop with one-shot subscribers.
pub struct IdleWatcher {
    addr: String,
    subscriptions: Arc<Mutex<Subscriptions>>,
    writer: Arc<tokio::sync::Mutex<IdleWriter>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<Result<()>>>,
}

impl IdleWatcher {
    /// Start the idle loop on `conn`, waiting on `subsystems` (empty = all).
    pub fn spawn(conn: Connection, subsystems: &[&str], bus: SharedBus) -> Self {
        let addr = conn.addr();
        let (reader, writer) = conn.into_split();

        let subscriptions = Arc::new(Mutex::new(Subscriptions {
            open: true,
            list: Vec::new(),
        }));
        let writer = Arc::new(tokio::sync::Mutex::new(IdleWriter {
            writer,
            waiting: false,
        }));
        let shutdown = CancellationToken::new();

        let mut command = String::from("idle");
        for subsystem in subsystems {
            command.push(' ');
            command.push_str(subsystem);
        }

        let task = {
            let subscriptions = subscriptions.clone();
            let writer = writer.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let result =
                    run_idle_loop(reader, &writer, &subscriptions, &command, &shutdown, &bus).await;
                if let Err(ref e) = result {
                    error!("Idle loop failed: {}", e);
                }
                lock(&subscriptions).close();
                info!("Idle loop stopped");
                result
            })
        };

        Self {
            addr,
            subscriptions,
            writer,
            shutdown,
            task: Some(task),
        }
    }

    /// Register for the next change of one of `subsystems` (empty = any).
    ///
    /// The receiver gets exactly one subsystem name, or an error once the
    /// loop has stopped. Never blocks on the connection.
    pub fn subscribe(&self, subsystems: &[&str]) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        let mut subs = lock(&self.subscriptions);
        if subs.open {
            subs.list.push(IdleSubscription {
                tx: Some(tx),
                active: true,
                subsystems: subsystems.iter().map(|s| s.to_string()).collect(),
            });
        }
        rx
    }

    /// Number of subscriptions still waiting for a delivery.
    pub fn pending(&self) -> usize {
        lock(&self.subscriptions).list.len()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop, interrupting a pending wait, then close the connection.
    ///
    /// Returns the loop's error if it had already failed.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };

        {
            let mut guard = self.writer.lock().await;
            self.shutdown.cancel();
            if guard.waiting {
                debug!("Interrupting idle on {}", self.addr);
                if let Err(e) = guard.writer.write_line("noidle").await {
                    warn!("Failed to interrupt idle on {}: {}", self.addr, e);
                }
            }
        }

        let loop_result = match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Idle task on {} did not finish cleanly: {}", self.addr, e);
                Ok(())
            }
        };

        let mut guard = self.writer.lock().await;
        if loop_result.is_ok() {
            guard.writer.write_line("close").await?;
        }
        if let Err(e) = guard.writer.shutdown().await {
            debug!("Socket shutdown on {}: {}", self.addr, e);
        }
        loop_result
    }
}

impl Drop for IdleWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            self.shutdown.cancel();
            task.abort();
        }
    }
}

fn lock(subscriptions: &Mutex<Subscriptions>) -> std::sync::MutexGuard<'_, Subscriptions> {
    subscriptions.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run_idle_loop(
    mut reader: LineReader,
    writer: &tokio::sync::Mutex<IdleWriter>,
    subscriptions: &Mutex<Subscriptions>,
    command: &str,
    shutdown: &CancellationToken,
    bus: &SharedBus,
) -> Result<()> {
    let mut state = IdleState::Enter;
    loop {
        state = match state {
            IdleState::Enter => {
                let mut guard = writer.lock().await;
                if shutdown.is_cancelled() {
                    IdleState::Shut
                } else {
                    debug!("Entering idle mode: {}", command);
                    let id = guard.writer.send_command(command).await?;
                    guard.waiting = true;
                    IdleState::Waiting(id)
                }
            }
            IdleState::Waiting(id) => {
                reader.start_response(id);
                let reply = read_idle_reply(&mut reader).await;
                reader.end_response(id);
                writer.lock().await.waiting = false;
                IdleState::Dispatch(reply?)
            }
            IdleState::Dispatch(changed) => {
                if changed.is_empty() {
                    debug!("Idle returned without changes");
                }
                for subsystem in &changed {
                    let delivered = lock(subscriptions).dispatch(subsystem);
                    debug!("Subsystem changed: {} ({} subscribers)", subsystem, delivered);
                    bus.publish(BusEvent::SubsystemChanged {
                        subsystem: subsystem.clone(),
                    });
                }
                if shutdown.is_cancelled() {
                    IdleState::Shut
                } else {
                    IdleState::Enter
                }
            }
            IdleState::Shut => return Ok(()),
        };
    }
}
