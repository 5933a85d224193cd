//! Process Lifecycle
//!
//! Drives RUNNING -> DRAINING -> TERMINATED. A drain starts on the scheduled
//! restart timer or on SIGTERM/SIGINT, whichever comes first.

use crate::application::PoolManager;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Terminated,
}

/// What started the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownTrigger {
    ScheduledRestart,
    Signal(&'static str),
}

impl ShutdownTrigger {
    /// A scheduled restart exits non-zero so the supervisor brings the
    /// process back up.
    pub fn exit_code(&self) -> i32 {
        match self {
            ShutdownTrigger::ScheduledRestart => 1,
            ShutdownTrigger::Signal(_) => 0,
        }
    }
}

impl fmt::Display for ShutdownTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownTrigger::ScheduledRestart => write!(f, "scheduled restart"),
            ShutdownTrigger::Signal(name) => write!(f, "{}", name),
        }
    }
}

/// Owns the process state and the stop-accepting broadcast.
pub struct LifecycleController {
    state: Mutex<LifecycleState>,
    shutdown_tx: broadcast::Sender<()>,
    pool_manager: Arc<PoolManager>,
    restart_after: Duration,
    grace_delay: Duration,
}

impl LifecycleController {
    pub fn new(pool_manager: Arc<PoolManager>, restart_after: Duration, grace_delay: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            state: Mutex::new(LifecycleState::Running),
            shutdown_tx,
            pool_manager,
            restart_after,
            grace_delay,
        }
    }

    /// Subscribe to the stop-accepting notification.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Move RUNNING to DRAINING. Only the first caller wins.
    fn begin_drain(&self) -> bool {
        let mut state = self.state.lock();
        if *state != LifecycleState::Running {
            return false;
        }
        *state = LifecycleState::Draining;
        true
    }

    /// Stop accepting, close the pool, wait out the grace delay, then
    /// terminate. Returns the exit code, or `None` if a drain was already
    /// under way.
    pub async fn drain(&self, trigger: ShutdownTrigger) -> Option<i32> {
        if !self.begin_drain() {
            tracing::debug!("ignoring {} while {:?}", trigger, self.state());
            return None;
        }

        tracing::info!("{} received, draining", trigger);
        let _ = self.shutdown_tx.send(());
        self.pool_manager.close();

        tokio::time::sleep(self.grace_delay).await;

        *self.state.lock() = LifecycleState::Terminated;
        let code = trigger.exit_code();
        tracing::info!("terminated ({}), exit code {}", trigger, code);
        Some(code)
    }

    /// Wait for the first trigger and drain. Signals that arrive while
    /// draining are logged and dropped.
    pub async fn run(&self) -> i32 {
        tracing::info!(
            "scheduled restart in {}s, grace delay {}ms",
            self.restart_after.as_secs(),
            self.grace_delay.as_millis()
        );

        let trigger = tokio::select! {
            _ = tokio::time::sleep(self.restart_after) => ShutdownTrigger::ScheduledRestart,
            name = wait_for_signal() => ShutdownTrigger::Signal(name),
        };
        let code = trigger.exit_code();

        let drain = self.drain(trigger);
        tokio::pin!(drain);
        loop {
            tokio::select! {
                result = &mut drain => return result.unwrap_or(code),
                name = wait_for_signal() => {
                    tracing::info!("ignoring {} while draining", name);
                }
            }
        }
    }
}

/// Resolve with the name of the first SIGINT or SIGTERM received.
#[cfg_attr(coverage_nightly, coverage(off))]
pub async fn wait_for_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
