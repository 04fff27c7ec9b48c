//! Objective completion handles and engine events.

use statewallet_types::ObjectiveId;
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// How an objective resolved. Every handle resolves with one of these;
/// there is no rejected or poisoned wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectiveDoneResult {
    /// The goal was reached.
    Success,
    /// Retries or the progress watchdog ran out. Signed states already
    /// applied are kept.
    TimedOut,
    /// The objective failed inside the wallet.
    Internal(String),
}

/// One-shot completion handle for a single objective.
#[derive(Debug)]
pub struct ObjectiveResult {
    /// The objective this handle tracks.
    pub objective_id: ObjectiveId,
    receiver: Receiver<ObjectiveDoneResult>,
    resolved: Option<ObjectiveDoneResult>,
}

impl ObjectiveResult {
    pub(crate) fn new(objective_id: ObjectiveId) -> (Self, Sender<ObjectiveDoneResult>) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (
            Self {
                objective_id,
                receiver,
                resolved: None,
            },
            sender,
        )
    }

    /// Non-blocking poll. `None` until the objective resolves; the
    /// resolution is cached, so later calls keep returning it.
    pub fn try_done(&mut self) -> Option<ObjectiveDoneResult> {
        if self.resolved.is_none() {
            match self.receiver.try_recv() {
                Ok(result) => self.resolved = Some(result),
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => {
                    self.resolved = Some(ObjectiveDoneResult::Internal(
                        "engine dropped before resolving objective".into(),
                    ));
                }
            }
        }
        self.resolved.clone()
    }

    /// Block until the objective resolves or `timeout` passes. An engine
    /// that shuts down first resolves the wait as `Internal`.
    pub fn done(&mut self, timeout: Duration) -> Option<ObjectiveDoneResult> {
        if self.resolved.is_none() {
            match self.receiver.recv_timeout(timeout) {
                Ok(result) => self.resolved = Some(result),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    self.resolved = Some(ObjectiveDoneResult::Internal(
                        "engine dropped before resolving objective".into(),
                    ));
                }
            }
        }
        self.resolved.clone()
    }
}

/// Notifications drained through `WalletApi::poll_events`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalletEvent {
    /// An objective was approved and began cranking.
    ObjectiveStarted {
        /// The objective.
        objective_id: ObjectiveId,
    },
    /// An objective resolved.
    ObjectiveCompleted {
        /// The objective.
        objective_id: ObjectiveId,
        /// How it resolved.
        result: ObjectiveDoneResult,
    },
    /// The retry budget or progress watchdog expired.
    ObjectiveTimedOut {
        /// The objective.
        objective_id: ObjectiveId,
    },
}
