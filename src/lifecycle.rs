//! Two-state host lifecycle.
//!
//! Anything that needs the running server goes through [`Lifecycle`], which
//! reports [`PermError::NotRunning`] instead of handing out a missing server.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_cron_scheduler::JobScheduler;
use tracing::{info, warn};

use crate::cache::PermissionDecisionCache;
use crate::errors::PermError;
use crate::jobs;

pub enum ServerState {
    Stopped,
    Running(RunningServer),
}

pub struct RunningServer {
    started_at: DateTime<Utc>,
    scheduler: JobScheduler,
}

pub struct Lifecycle {
    cache: Arc<PermissionDecisionCache>,
    housekeeping_cron: String,
    max_age: Duration,
    state: Mutex<ServerState>,
    /// Held for a whole start or stop, across its awaits.
    transition: tokio::sync::Mutex<()>,
}

impl Lifecycle {
    pub fn new(
        cache: Arc<PermissionDecisionCache>,
        housekeeping_cron: impl Into<String>,
        max_age: Duration,
    ) -> Self {
        Self {
            cache,
            housekeeping_cron: housekeeping_cron.into(),
            max_age,
            state: Mutex::new(ServerState::Stopped),
            transition: tokio::sync::Mutex::new(()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.state(), ServerState::Running(_))
    }

    /// Starts the housekeeping scheduler and enters `Running`. Starting an
    /// already running server is a no-op.
    pub async fn start(&self) -> Result<DateTime<Utc>, PermError> {
        let _transition = self.transition.lock().await;
        if let Ok(started_at) = self.started_at() {
            warn!("Server already running");
            return Ok(started_at);
        }

        let scheduler =
            jobs::init_scheduler(self.cache.clone(), &self.housekeeping_cron, self.max_age)
                .await?;
        let started_at = Utc::now();
        *self.state() = ServerState::Running(RunningServer {
            started_at,
            scheduler,
        });
        info!(%started_at, "Server started");
        Ok(started_at)
    }

    /// Shuts the scheduler down and returns to `Stopped`.
    pub async fn stop(&self) -> Result<(), PermError> {
        let _transition = self.transition.lock().await;
        let previous = std::mem::replace(&mut *self.state(), ServerState::Stopped);
        let ServerState::Running(mut running) = previous else {
            return Err(PermError::NotRunning);
        };
        running.scheduler.shutdown().await?;
        info!(uptime_secs = (Utc::now() - running.started_at).num_seconds(), "Server stopped");
        Ok(())
    }

    pub fn started_at(&self) -> Result<DateTime<Utc>, PermError> {
        match &*self.state() {
            ServerState::Running(running) => Ok(running.started_at),
            ServerState::Stopped => Err(PermError::NotRunning),
        }
    }

    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Runs the housekeeping sweep now. Requires a running server.
    pub fn sweep_now(&self) -> Result<usize, PermError> {
        self.started_at()?;
        jobs::trigger_job_manually(&self.cache, jobs::CACHE_HOUSEKEEPING, self.max_age)
    }
}
