use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use exam_core::model::{QuestionId, SessionPhase};

use super::controller::SessionController;
use super::view::SessionSnapshot;
use crate::error::SessionError;

const COMMAND_BUFFER: usize = 32;

/// A user action forwarded to the task that owns the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    SelectAnswer { question_id: QuestionId, option: u32 },
    ToggleFlag(QuestionId),
    ToggleCurrentFlag,
    Navigate(usize),
    Next,
    Previous,
    RequestSubmit,
    ConfirmSubmit,
    CancelSubmit,
    Retry,
    Snapshot,
}

struct Envelope {
    command: SessionCommand,
    reply: oneshot::Sender<Result<SessionSnapshot, SessionError>>,
}

/// Cloneable front end to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Envelope>,
    status: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Send a command and wait for the snapshot taken right after it ran.
    ///
    /// # Errors
    ///
    /// Returns the controller's error for the command, or
    /// `SessionError::Closed` if the runner has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<SessionSnapshot, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Envelope { command, reply })
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Latest published snapshot, updated after every command and tick.
    #[must_use]
    pub fn latest(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    /// Receiver that changes whenever a new snapshot is published.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    /// Wait until the attempt is submitted.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Closed` if the runner stops first.
    pub async fn finished(&self) -> Result<SessionSnapshot, SessionError> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(|s| s.phase == SessionPhase::Submitted)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(snapshot.clone())
    }
}

/// Drives one controller from a single task.
///
/// User commands and the one-second timer are handled by the same select
/// loop, so a tick can never interleave with a command. The timer only runs
/// while the session is `Active` and restarts its period when the session
/// becomes `Active` again.
pub struct SessionRunner;

impl SessionRunner {
    /// Spawn the runner with a one-second timer.
    #[must_use]
    pub fn spawn(controller: SessionController) -> (SessionHandle, JoinHandle<SessionController>) {
        Self::spawn_with_period(controller, Duration::from_secs(1))
    }

    #[must_use]
    pub fn spawn_with_period(
        controller: SessionController,
        period: Duration,
    ) -> (SessionHandle, JoinHandle<SessionController>) {
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
        let (publish, status) = watch::channel(controller.snapshot());
        let task = tokio::spawn(run(controller, inbox, publish, period));
        (SessionHandle { commands, status }, task)
    }
}

async fn run(
    mut controller: SessionController,
    mut inbox: mpsc::Receiver<Envelope>,
    publish: watch::Sender<SessionSnapshot>,
    period: Duration,
) -> SessionController {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while !controller.phase().is_terminal() {
        let was_active = controller.phase() == SessionPhase::Active;

        tokio::select! {
            envelope = inbox.recv() => {
                let Some(Envelope { command, reply }) = envelope else {
                    tracing::debug!(exam_id = %controller.exam().id(), "all session handles dropped");
                    break;
                };
                let result = apply(&mut controller, command)
                    .await
                    .map(|()| controller.snapshot());
                publish.send_replace(controller.snapshot());
                // The caller may have stopped waiting; the command still ran.
                let _ = reply.send(result);
            }
            _ = ticker.tick(), if was_active => {
                if let Err(err) = controller.tick().await {
                    tracing::warn!(exam_id = %controller.exam().id(), error = %err, "tick failed");
                }
                publish.send_replace(controller.snapshot());
            }
        }

        if !was_active && controller.phase() == SessionPhase::Active {
            ticker.reset();
        }
    }

    controller
}

async fn apply(
    controller: &mut SessionController,
    command: SessionCommand,
) -> Result<(), SessionError> {
    match command {
        SessionCommand::SelectAnswer {
            question_id,
            option,
        } => controller.select_answer(question_id, option).await,
        SessionCommand::ToggleFlag(question_id) => {
            controller.toggle_flag(question_id).await.map(|_| ())
        }
        SessionCommand::ToggleCurrentFlag => controller.toggle_current_flag().await.map(|_| ()),
        SessionCommand::Navigate(index) => controller.navigate(index).await,
        SessionCommand::Next => controller.next().await,
        SessionCommand::Previous => controller.previous().await,
        SessionCommand::RequestSubmit => controller.request_submit().map(|_| ()),
        SessionCommand::ConfirmSubmit => controller.confirm_submit().await.map(|_| ()),
        SessionCommand::CancelSubmit => controller.cancel_submit(),
        SessionCommand::Retry => controller.retry().await.map(|_| ()),
        SessionCommand::Snapshot => Ok(()),
    }
}
