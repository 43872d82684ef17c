//! Run orchestration
//!
//! Wires discovery, the scanner, and the download worker pool
//! together; owns the task queue, the outcome counters, the
//! cancellation signal, and the retry loop; produces the final
//! [`RunSummary`].

use crate::config::{ArchiveConfig, Credentials};
use crate::dedup::DedupIndex;
use crate::endpoint::{ConnectionAttempt, Discoverer, Endpoint};
use crate::error::Result;
use crate::layout::{self, FolderLayout};
use crate::pool::WorkerConnection;
use crate::scanner::{self, ScanStats};
use crate::session::ArchiveSession;
use crate::summary::{FailedTask, FolderStats, RunStatus, RunSummary};
use crate::worker::{Outcome, Task, TaskOutcome, TaskQueue, Worker};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Base per-task deadline for retry rounds; round `k` allows
/// `k * RETRY_DEADLINE_STEP` per task.
const RETRY_DEADLINE_STEP: Duration = Duration::from_secs(60);

/// Interval between progress log lines while downloads are running.
const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Everything the driver needs after a run: the summary to render,
/// the run directory to optionally package, and the still-failing
/// tasks for an optional manual retry round.
#[derive(Debug)]
pub struct RunReport {
    pub summary: RunSummary,
    pub run_dir: PathBuf,
    /// Folder-to-segment mapping of the run, reused by manual retry
    /// rounds so retried messages land on the same paths.
    folder_layout: Arc<FolderLayout>,
}

pub struct Archiver {
    credentials: Credentials,
    config: ArchiveConfig,
}

/// Outcome counters, folded from the workers' reports.
#[derive(Default)]
struct Counters {
    downloaded: u64,
    skipped: u64,
    failed: Vec<FailedTask>,
    per_folder: HashMap<String, FolderStats>,
}

impl Counters {
    fn apply(&mut self, report: TaskOutcome) {
        let folder = self.per_folder.entry(report.task.folder.clone()).or_default();
        match report.outcome {
            Outcome::Downloaded => {
                self.downloaded += 1;
                folder.downloaded += 1;
            }
            Outcome::SkippedDuplicate => {
                self.skipped += 1;
                folder.skipped += 1;
            }
            Outcome::Failed(reason) => {
                folder.failed += 1;
                self.failed.push(FailedTask {
                    folder: report.task.folder,
                    uid: report.task.uid,
                    reason,
                });
            }
        }
    }

    /// Fold a retry round back in: recovered tasks move from failed
    /// to downloaded (or skipped), tasks that failed again keep
    /// their newest reason, unattempted tasks stay as they were.
    fn apply_retry(&mut self, outcomes: Vec<TaskOutcome>) {
        let mut by_task: HashMap<Task, Outcome> = outcomes
            .into_iter()
            .map(|o| (o.task, o.outcome))
            .collect();

        let previous = std::mem::take(&mut self.failed);
        for mut entry in previous {
            let key = Task {
                folder: entry.folder.clone(),
                uid: entry.uid,
            };
            match by_task.remove(&key) {
                Some(Outcome::Downloaded) => {
                    self.downloaded += 1;
                    let folder = self.per_folder.entry(entry.folder).or_default();
                    folder.failed = folder.failed.saturating_sub(1);
                    folder.downloaded += 1;
                }
                Some(Outcome::SkippedDuplicate) => {
                    self.skipped += 1;
                    let folder = self.per_folder.entry(entry.folder).or_default();
                    folder.failed = folder.failed.saturating_sub(1);
                    folder.skipped += 1;
                }
                Some(Outcome::Failed(reason)) => {
                    entry.reason = reason;
                    self.failed.push(entry);
                }
                None => self.failed.push(entry),
            }
        }
    }

    fn accounted(&self) -> u64 {
        self.downloaded + self.skipped + self.failed.len() as u64
    }
}

impl Archiver {
    #[must_use]
    pub const fn new(credentials: Credentials, config: ArchiveConfig) -> Self {
        Self {
            credentials,
            config,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    /// Run the full archive: bootstrap, scan, download, automatic
    /// retries, summary.
    ///
    /// # Errors
    ///
    /// Only bootstrap failures ([`crate::Error::Discovery`],
    /// [`crate::Error::Auth`]) and run-directory creation errors
    /// propagate; per-task, per-folder, and per-session failures are
    /// absorbed into the summary.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let started = Instant::now();

        let (endpoint, mut bootstrap, attempts) = self.bootstrap().await?;

        let folders = bootstrap.list_folders().await?;
        let mut names: Vec<String> = folders.into_iter().map(|f| f.name).collect();
        // INBOX first: its downloads start while the remaining
        // folders are still being enumerated.
        names.sort_by_key(|name| !name.eq_ignore_ascii_case("INBOX"));
        info!(folders = names.len(), "folders selected for archiving");

        let run_dir = self.config.output_dir.join(layout::run_dir_name(
            &self.credentials,
            &self.config.window,
            chrono::Local::now().date_naive(),
        ));
        tokio::fs::create_dir_all(&run_dir).await?;
        info!(run_dir = %run_dir.display(), "saving messages");

        let folder_layout = Arc::new(FolderLayout::new(&names));
        let dedup = Arc::new(DedupIndex::default());

        let (task_tx, task_rx) = unbounded_channel();
        let queue: TaskQueue = Arc::new(Mutex::new(task_rx));
        let (outcome_tx, mut outcome_rx) = unbounded_channel();

        let scan_conn =
            WorkerConnection::resume(endpoint.clone(), self.credentials.clone(), bootstrap);
        let scan_handle = tokio::spawn(scanner::scan(
            scan_conn,
            names,
            self.config.window,
            task_tx,
            cancel.clone(),
        ));

        let workers = self.spawn_workers(
            &endpoint,
            &queue,
            &outcome_tx,
            &dedup,
            &folder_layout,
            &run_dir,
            None,
            cancel,
        );
        drop(outcome_tx);
        drop(queue);

        let mut counters = Counters::default();
        let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                report = outcome_rx.recv() => match report {
                    Some(report) => counters.apply(report),
                    None => break,
                },
                _ = ticker.tick() => {
                    log_progress(&counters, started);
                }
            }
        }

        let scan_stats = scan_handle.await.unwrap_or_else(|e| {
            error!(error = %e, "scanner task aborted");
            ScanStats::default()
        });
        for handle in workers {
            let _ = handle.await;
        }

        // Automatic retry rounds with a growing per-task deadline.
        let mut round = 1u32;
        while !cancel.is_cancelled() && !counters.failed.is_empty() && round <= self.config.max_retries
        {
            info!(
                round,
                failed = counters.failed.len(),
                "retrying failed downloads"
            );
            let outcomes = self
                .retry_tasks(
                    &endpoint,
                    failed_tasks(&counters),
                    RETRY_DEADLINE_STEP * round,
                    &dedup,
                    &folder_layout,
                    &run_dir,
                    cancel,
                )
                .await;
            counters.apply_retry(outcomes);
            round += 1;
        }

        let summary = self.build_summary(
            endpoint,
            attempts,
            &scan_stats,
            counters,
            started,
            cancel.is_cancelled(),
        );
        info!(status = %summary.status, downloaded = summary.downloaded, "run finished");
        Ok(RunReport {
            summary,
            run_dir,
            folder_layout,
        })
    }

    /// One extra retry round over the given tasks, invoked by the
    /// driver after the automatic rounds (the "manual" round).
    pub async fn retry_round(
        &self,
        report: &mut RunReport,
        round: u32,
        cancel: &CancellationToken,
    ) {
        let tasks: Vec<Task> = report
            .summary
            .failed
            .iter()
            .map(|f| Task {
                folder: f.folder.clone(),
                uid: f.uid,
            })
            .collect();
        if tasks.is_empty() {
            return;
        }

        // Dedup state from the main run is gone; an empty index only
        // risks re-downloading a duplicate onto the same path, which
        // the deterministic layout makes harmless.
        let dedup = Arc::new(DedupIndex::default());
        let endpoint = report.summary.endpoint.clone();
        let folder_layout = Arc::clone(&report.folder_layout);

        let outcomes = self
            .retry_tasks(
                &endpoint,
                tasks,
                RETRY_DEADLINE_STEP * round,
                &dedup,
                &folder_layout,
                &report.run_dir,
                cancel,
            )
            .await;

        let mut counters = Counters {
            downloaded: report.summary.downloaded,
            skipped: report.summary.skipped,
            failed: std::mem::take(&mut report.summary.failed),
            per_folder: report.summary.folders.iter().cloned().collect(),
        };
        counters.apply_retry(outcomes);
        report.summary.downloaded = counters.downloaded;
        report.summary.skipped = counters.skipped;
        report.summary.failed = counters.failed;
        for (name, stats) in &mut report.summary.folders {
            if let Some(updated) = counters.per_folder.get(name) {
                *stats = updated.clone();
            }
        }
    }

    async fn bootstrap(&self) -> Result<(Endpoint, ArchiveSession, Vec<ConnectionAttempt>)> {
        let discoverer = self.config.server.as_ref().map_or_else(
            || Discoverer::for_address(&self.credentials),
            |server| Discoverer::with_candidates([server.clone()]),
        );
        let discovery = discoverer
            .discover(&self.credentials, self.config.port, self.config.ssl)
            .await?;
        Ok((discovery.endpoint, discovery.session, discovery.attempts))
    }

    #[allow(clippy::too_many_arguments)]
    fn spawn_workers(
        &self,
        endpoint: &Endpoint,
        queue: &TaskQueue,
        outcomes: &UnboundedSender<TaskOutcome>,
        dedup: &Arc<DedupIndex>,
        folder_layout: &Arc<FolderLayout>,
        run_dir: &Path,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|id| {
                let worker = Worker::new(
                    id,
                    WorkerConnection::new(endpoint.clone(), self.credentials.clone()),
                    Arc::clone(dedup),
                    Arc::clone(folder_layout),
                    run_dir.to_path_buf(),
                    deadline,
                );
                tokio::spawn(worker.run(
                    Arc::clone(queue),
                    outcomes.clone(),
                    cancel.clone(),
                ))
            })
            .collect()
    }

    /// Push a fixed task list through a fresh pool and collect every
    /// outcome.
    #[allow(clippy::too_many_arguments)]
    async fn retry_tasks(
        &self,
        endpoint: &Endpoint,
        tasks: Vec<Task>,
        deadline: Duration,
        dedup: &Arc<DedupIndex>,
        folder_layout: &Arc<FolderLayout>,
        run_dir: &Path,
        cancel: &CancellationToken,
    ) -> Vec<TaskOutcome> {
        let (task_tx, task_rx) = unbounded_channel();
        for task in tasks {
            if task_tx.send(task).is_err() {
                break;
            }
        }
        drop(task_tx);

        let queue: TaskQueue = Arc::new(Mutex::new(task_rx));
        let (outcome_tx, mut outcome_rx) = unbounded_channel();
        let workers = self.spawn_workers(
            endpoint,
            &queue,
            &outcome_tx,
            dedup,
            folder_layout,
            run_dir,
            Some(deadline),
            cancel,
        );
        drop(outcome_tx);
        drop(queue);

        let mut outcomes = Vec::new();
        while let Some(outcome) = outcome_rx.recv().await {
            outcomes.push(outcome);
        }
        for handle in workers {
            let _ = handle.await;
        }
        outcomes
    }

    fn build_summary(
        &self,
        endpoint: Endpoint,
        attempts: Vec<ConnectionAttempt>,
        scan_stats: &ScanStats,
        counters: Counters,
        started: Instant,
        cancelled: bool,
    ) -> RunSummary {
        let elapsed = started.elapsed();
        let remaining = scan_stats.enqueued.saturating_sub(counters.accounted());
        if !cancelled && remaining > 0 {
            warn!(remaining, "tasks unaccounted for at completion");
        }

        let folders = scan_stats
            .per_folder
            .iter()
            .map(|(name, _)| {
                (
                    name.clone(),
                    counters.per_folder.get(name).cloned().unwrap_or_default(),
                )
            })
            .collect();

        RunSummary {
            status: if cancelled {
                RunStatus::Cancelled
            } else {
                RunStatus::Completed
            },
            account: self.credentials.address().to_string(),
            endpoint,
            connection_attempts: attempts,
            total: scan_stats.enqueued,
            downloaded: counters.downloaded,
            skipped: counters.skipped,
            failed: counters.failed,
            remaining,
            duration_secs: elapsed.as_secs(),
            speed_per_hour: speed_per_hour(counters.downloaded, elapsed),
            folders,
            failed_folders: scan_stats.failed_folders.clone(),
        }
    }
}

fn failed_tasks(counters: &Counters) -> Vec<Task> {
    counters
        .failed
        .iter()
        .map(|f| Task {
            folder: f.folder.clone(),
            uid: f.uid,
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn speed_per_hour(downloaded: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        downloaded as f64 * 3600.0 / secs
    } else {
        0.0
    }
}

fn log_progress(counters: &Counters, started: Instant) {
    info!(
        downloaded = counters.downloaded,
        skipped = counters.skipped,
        failed = counters.failed.len(),
        speed_per_hour = format!("{:.0}", speed_per_hour(counters.downloaded, started.elapsed())),
        "progress"
    );
}
