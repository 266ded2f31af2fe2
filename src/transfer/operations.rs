//! Transfer control
//!
//! Tracks the transfer state of one session and owns the task running its
//! current transfer. The control loop starts a transfer, races its completion
//! against new commands, and aborts it on ABOR, REIN or shutdown.

use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::middleware::TrafficShaper;
use crate::protocol::{Reply, ReplyCode};
use crate::transfer::file_ops::{DataSource, TransferJob, TransferOutcome, TransferTask, run_transfer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    AwaitingDataChannel,
    Executing,
    PreEndOfTransfer,
    Aborted,
}

/// Transfer state shared between the control loop and the transfer task
#[derive(Debug, Clone, Default)]
pub struct SharedTransferState(Arc<Mutex<TransferState>>);

impl SharedTransferState {
    pub fn get(&self) -> TransferState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, state: TransferState) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

struct RunningTransfer {
    handle: JoinHandle<TransferOutcome>,
    cancel: CancellationToken,
}

#[derive(Default)]
pub struct TransferControl {
    state: SharedTransferState,
    running: Option<RunningTransfer>,
}

impl TransferControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TransferState {
        self.state.get()
    }

    /// A transfer task exists and has not been collected yet
    pub fn is_executing(&self) -> bool {
        self.running.is_some()
    }

    /// Spawn the transfer task. Its abort token is a child of `parent`.
    ///
    /// With a pending source the task first waits for the data connection;
    /// that wait is aborted like the transfer itself.
    pub fn start(
        &mut self,
        job: TransferJob,
        source: DataSource,
        shaper: TrafficShaper,
        block_size: usize,
        parent: &CancellationToken,
        peer: SocketAddr,
    ) {
        let cancel = parent.child_token();
        self.state.set(match source {
            DataSource::Open(_) => TransferState::Executing,
            DataSource::Pending(_) => TransferState::AwaitingDataChannel,
        });
        let handle = tokio::spawn(run_transfer(TransferTask {
            job,
            source,
            shaper,
            block_size,
            cancel: cancel.clone(),
            state: self.state.clone(),
            peer,
        }));
        self.running = Some(RunningTransfer { handle, cancel });
    }

    /// Resolve with the final reply of the running transfer.
    ///
    /// Pends forever when nothing runs, so it can sit in a `select!`.
    pub async fn wait_finished(&mut self) -> Reply {
        let Some(running) = self.running.as_mut() else {
            return std::future::pending().await;
        };
        let outcome = join(&mut running.handle).await;
        self.running = None;
        self.state.set(TransferState::Idle);
        outcome.into_reply()
    }

    /// Abort the running transfer.
    ///
    /// A graceful abort (ABOR) answers with the transfer's own reply followed
    /// by 226; a forced abort (REIN, shutdown, lost control connection) only
    /// returns the transfer's reply. With nothing running ABOR gets a single 226,
    /// and so does an ABOR that lands while the data connection is still awaited.
    pub async fn abort(&mut self, graceful: bool) -> Vec<Reply> {
        let Some(running) = self.running.take() else {
            debug!("Abort requested with no transfer in progress");
            return if graceful {
                vec![Reply::new(ReplyCode::ClosingDataConnection, "No transfer to abort")]
            } else {
                Vec::new()
            };
        };

        self.state.set(TransferState::Aborted);
        running.cancel.cancel();
        let RunningTransfer { mut handle, .. } = running;
        let outcome = join(&mut handle).await;
        self.state.set(TransferState::Idle);
        info!("Transfer aborted ({})", if graceful { "ABOR" } else { "forced" });

        let mut replies = Vec::new();
        if !(graceful && matches!(outcome, TransferOutcome::Cancelled)) {
            replies.push(outcome.into_reply());
        }
        if graceful {
            replies.push(Reply::new(
                ReplyCode::ClosingDataConnection,
                "ABOR command successful",
            ));
        }
        replies
    }
}

async fn join(handle: &mut JoinHandle<TransferOutcome>) -> TransferOutcome {
    match handle.await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!("Transfer task failed: {}", e);
            TransferOutcome::Failed(
                std::io::Error::other("transfer task failed").into(),
            )
        }
    }
}

impl Drop for TransferControl {
    fn drop(&mut self) {
        if let Some(running) = self.running.take() {
            running.cancel.cancel();
        }
    }
}
