//! Background poll loop and the handle that controls it.
//!
//! The loop ticks once per poll interval, the first tick one full interval
//! after start. Pause, resume and shutdown arrive as commands over a channel.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::engine::Engine;
use super::types::{SchedulerCommand, SchedulerError, SchedulerState};

/// Buffer size for the command channel between PollerControl and the poll loop.
pub(crate) const COMMAND_CHANNEL_BUFFER: usize = 32;

/// Owner of a running poll loop.
pub(crate) struct PollerHandle {
    control: PollerControl,
    task: JoinHandle<()>,
}

/// Cloneable command side of a poll loop.
#[derive(Clone)]
pub(crate) struct PollerControl {
    command_tx: mpsc::Sender<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
}

impl PollerHandle {
    /// Start the poll loop for `engine`.
    pub(crate) fn spawn(engine: Arc<Engine>, poll_interval: Duration) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_BUFFER);
        let state = Arc::new(RwLock::new(SchedulerState::Running));

        let task = tokio::spawn(run(
            engine,
            poll_interval,
            command_rx,
            Arc::clone(&state),
        ));

        Self {
            control: PollerControl { command_tx, state },
            task,
        }
    }

    /// Command side of the loop.
    pub(crate) fn control(&self) -> PollerControl {
        self.control.clone()
    }

    /// Stop the loop and wait for it to exit.
    ///
    /// Records already dispatched keep running; they are not awaited.
    pub(crate) async fn shutdown(self) -> Result<(), SchedulerError> {
        let result = self
            .control
            .send_unit_command(
                |response| SchedulerCommand::Shutdown { response },
                "shutdown",
            )
            .await;

        if result.is_err() {
            self.task.abort();
        }
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "Poll loop ended abnormally");
            }
        }
        result
    }
}

impl PollerControl {
    /// Helper to send a command and wait for its acknowledgement.
    async fn send_unit_command(
        &self,
        build_command: impl FnOnce(oneshot::Sender<()>) -> SchedulerCommand,
        operation: &str,
    ) -> Result<(), SchedulerError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(build_command(response_tx))
            .await
            .map_err(|_| {
                SchedulerError::ChannelError(format!("failed to send {} command", operation))
            })?;

        response_rx.await.map_err(|_| {
            SchedulerError::ChannelError(format!("failed to receive {} response", operation))
        })?;

        Ok(())
    }

    /// Pause the loop. Ticks are skipped until resumed.
    pub(crate) async fn pause(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Pause { response }, "pause")
            .await
    }

    /// Resume the loop after being paused.
    pub(crate) async fn resume(&self) -> Result<(), SchedulerError> {
        self.send_unit_command(|response| SchedulerCommand::Resume { response }, "resume")
            .await
    }

    /// Get the current loop state.
    pub(crate) async fn state(&self) -> SchedulerState {
        *self.state.read().await
    }
}

/// Main poll loop.
async fn run(
    engine: Arc<Engine>,
    poll_interval: Duration,
    mut command_rx: mpsc::Receiver<SchedulerCommand>,
    state: Arc<RwLock<SchedulerState>>,
) {
    let start = tokio::time::Instant::now() + poll_interval;
    let mut interval = tokio::time::interval_at(start, poll_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(poll_interval = ?poll_interval, "Poll loop started");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let current_state = *state.read().await;
                if current_state != SchedulerState::Running {
                    continue;
                }
                let now = Utc::now();
                match engine.tick(now).await {
                    Ok(dispatched) => {
                        tracing::debug!(records = dispatched.len(), "Poll tick complete");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to fetch job records, retrying next tick");
                    }
                }
            }

            command = command_rx.recv() => {
                match command {
                    Some(SchedulerCommand::Pause { response }) => {
                        *state.write().await = SchedulerState::Paused;
                        tracing::info!("Poll loop paused");
                        let _ = response.send(());
                    }
                    Some(SchedulerCommand::Resume { response }) => {
                        *state.write().await = SchedulerState::Running;
                        tracing::info!("Poll loop resumed");
                        let _ = response.send(());
                    }
                    Some(SchedulerCommand::Shutdown { response }) => {
                        *state.write().await = SchedulerState::Stopped;
                        let _ = response.send(());
                        break;
                    }
                    None => {
                        *state.write().await = SchedulerState::Stopped;
                        break;
                    }
                }
            }
        }
    }

    tracing::info!("Poll loop stopped");
}
