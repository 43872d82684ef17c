//! Download worker
//!
//! Workers pull `(folder, uid)` tasks from the shared queue, claim
//! the message in the dedup index, fetch the raw body, and write it
//! into the run directory. Exactly one outcome is reported per task;
//! the orchestrator folds outcomes into its counters.

use crate::dedup::DedupIndex;
use crate::error::Result;
use crate::layout::{self, FolderLayout};
use crate::pool::WorkerConnection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// One unit of work: a single message in a single folder.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub folder: String,
    pub uid: u32,
}

/// Terminal state of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Downloaded,
    SkippedDuplicate,
    Failed(String),
}

/// A task paired with its outcome, sent to the orchestrator.
#[derive(Debug)]
pub struct TaskOutcome {
    pub task: Task,
    pub outcome: Outcome,
}

/// Shared multi-consumer end of the task queue.
pub type TaskQueue = Arc<Mutex<UnboundedReceiver<Task>>>;

pub struct Worker {
    id: usize,
    conn: WorkerConnection,
    dedup: Arc<DedupIndex>,
    folder_layout: Arc<FolderLayout>,
    run_dir: PathBuf,
    /// Per-task deadline; set during retry rounds, unbounded in the
    /// main phase (the socket timeout bounds each round-trip).
    deadline: Option<Duration>,
    /// `Message-ID` claimed for the in-flight task, so an aborted or
    /// failed task can release its claim for a later retry.
    claimed_id: Option<String>,
}

impl Worker {
    #[must_use]
    pub const fn new(
        id: usize,
        conn: WorkerConnection,
        dedup: Arc<DedupIndex>,
        folder_layout: Arc<FolderLayout>,
        run_dir: PathBuf,
        deadline: Option<Duration>,
    ) -> Self {
        Self {
            id,
            conn,
            dedup,
            folder_layout,
            run_dir,
            deadline,
            claimed_id: None,
        }
    }

    /// Consume tasks until the queue closes or cancellation fires.
    pub async fn run(
        mut self,
        queue: TaskQueue,
        outcomes: UnboundedSender<TaskOutcome>,
        cancel: CancellationToken,
    ) {
        loop {
            let task = {
                let mut rx = queue.lock().await;
                tokio::select! {
                    () = cancel.cancelled() => None,
                    task = rx.recv() => task,
                }
            };
            let Some(task) = task else { break };

            // Cancellation that lands after the pull still gets an
            // outcome, so the counters stay conserved.
            let outcome = if cancel.is_cancelled() {
                Outcome::Failed("shutdown".to_string())
            } else {
                self.run_task(&task).await
            };

            trace!(worker = self.id, folder = %task.folder, uid = task.uid, ?outcome, "task done");
            if outcomes.send(TaskOutcome { task, outcome }).is_err() {
                break;
            }
        }

        self.conn.close().await;
        debug!(worker = self.id, "worker stopped");
    }

    /// Process one task, bounding it with the per-task deadline when
    /// one is set. Never panics, never escapes an error: every path
    /// folds into an [`Outcome`].
    async fn run_task(&mut self, task: &Task) -> Outcome {
        self.claimed_id = None;

        let outcome = if let Some(deadline) = self.deadline {
            match timeout(deadline, self.execute(task)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    // The task future was dropped mid-flight; the
                    // session may have a half-read response pending.
                    self.conn.invalidate();
                    Outcome::Failed("deadline exceeded".to_string())
                }
            }
        } else {
            self.execute(task).await
        };

        if let Some(id) = self.claimed_id.take() {
            if matches!(outcome, Outcome::Failed(_)) {
                self.dedup.remove(&id);
            }
        }

        outcome
    }

    async fn execute(&mut self, task: &Task) -> Outcome {
        match self.try_download(task).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.conn.invalidate();
                Outcome::Failed(e.to_string())
            }
        }
    }

    async fn try_download(&mut self, task: &Task) -> Result<Outcome> {
        self.conn.ensure_ready().await?;
        self.conn.ensure_selected(&task.folder).await?;

        // Dedup is best-effort: a message without a Message-ID is
        // downloaded unconditionally.
        let message_id = self.conn.session_mut()?.fetch_message_id(task.uid).await?;
        if let Some(id) = message_id {
            if self.dedup.insert(&id) {
                self.claimed_id = Some(id);
            } else {
                return Ok(Outcome::SkippedDuplicate);
            }
        }

        let body = self.conn.session_mut()?.fetch_body(task.uid).await?;
        let Some(body) = body.filter(|b| !b.is_empty()) else {
            return Ok(Outcome::Failed("empty content".to_string()));
        };

        let segment = self.folder_layout.segment(&task.folder);
        layout::write_eml(&self.run_dir, &segment, task.uid, &body).await?;
        Ok(Outcome::Downloaded)
    }
}
