//! # Graceful Shutdown
//!
//! Turns SIGINT/SIGTERM into a single shutdown event shared by the HTTP
//! server and the scheduler, then drains the monitor: the tick loop is
//! stopped first so no new run starts, and an in-flight run is given a
//! bounded time to finish and deliver its notification.
//!
//! ## Shutdown Process:
//!
//! 1. **Signal Reception**: SIGINT (Ctrl+C) or SIGTERM
//! 2. **Stop Accepting**: the server stops taking new requests
//! 3. **Stop Scheduling**: the tick loop is aborted
//! 4. **Drain**: wait for a running check, up to the drain timeout
//! 5. **Exit**

use crate::scheduler::MonitorService;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{sync::Notify, time::Instant};
use tracing::{error, info, warn};

/// How often the drain loop checks for a finished run.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// # Shutdown Handle
///
/// Cloneable; every clone observes the same shutdown.
#[derive(Clone, Default)]
pub struct GracefulShutdown {
    initiated: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.initiated.load(Ordering::SeqCst)
    }

    /// Start the shutdown. Idempotent.
    pub fn initiate_shutdown(&self) {
        if !self.initiated.swap(true, Ordering::SeqCst) {
            info!("🛑 Graceful shutdown initiated");
        }
        self.notify.notify_waiters();
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_shutdown_initiated() {
                return;
            }
            notified.await;
        }
    }

    /// # Listen for OS signals
    ///
    /// Spawns a task that initiates shutdown on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) {
        let shutdown = self.clone();
        tokio::spawn(async move {
            if let Err(e) = wait_for_signal().await {
                error!("❌ Error waiting for shutdown signal: {}", e);
                return;
            }
            shutdown.initiate_shutdown();
        });
    }

    /// # Drain the monitor
    ///
    /// Stops the scheduler and waits up to `timeout` for a run in flight.
    ///
    /// ## Returns:
    /// - `bool`: true when no run was left running
    pub async fn drain(&self, monitor: &MonitorService, timeout: Duration) -> bool {
        monitor.stop().await;

        let deadline = Instant::now() + timeout;
        while monitor.get_status().await.currently_checking {
            if Instant::now() >= deadline {
                warn!(timeout_secs = timeout.as_secs(), "⏰ Health check still running at shutdown, abandoning it");
                return false;
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("✅ Monitor drained");
        true
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("📡 Received SIGINT (Ctrl+C)");
        }
        _ = sigterm.recv() => {
            info!("📡 Received SIGTERM");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("📡 Received Ctrl+C");
    Ok(())
}
