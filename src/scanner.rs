//! Folder scanner: the single task producer
//!
//! Walks the folder list in order (INBOX first, so downloads start
//! while the rest of the account is still being enumerated), runs the
//! date-windowed UID search per folder, and streams `(folder, uid)`
//! tasks into the download queue. A folder that fails to select or
//! search is logged and skipped; it never aborts the scan.
//!
//! The scanner owns a dedicated connection, independent of the worker
//! pool, so long-running searches never starve download sessions and
//! SEARCH responses never interleave with FETCH responses on one
//! wire.

use crate::config::DateWindow;
use crate::error::Result;
use crate::pool::WorkerConnection;
use crate::worker::Task;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// What the scan enqueued, for the orchestrator's bookkeeping.
#[derive(Debug, Default)]
pub struct ScanStats {
    /// Total tasks pushed onto the queue.
    pub enqueued: u64,
    /// `(folder, task count)` in scan order.
    pub per_folder: Vec<(String, u64)>,
    /// Folders skipped because select or search failed.
    pub failed_folders: Vec<String>,
}

/// Run the scan to completion (or cancellation), enqueueing tasks as
/// each folder's search returns.
pub async fn scan(
    mut conn: WorkerConnection,
    folders: Vec<String>,
    window: DateWindow,
    tasks: UnboundedSender<Task>,
    cancel: CancellationToken,
) -> ScanStats {
    let mut stats = ScanStats::default();

    for folder in folders {
        if cancel.is_cancelled() {
            break;
        }

        let uids = match scan_folder(&mut conn, &folder, window).await {
            Ok(uids) => uids,
            Err(e) => {
                warn!(%folder, error = %e, "folder scan failed, skipping");
                conn.invalidate();
                stats.failed_folders.push(folder);
                continue;
            }
        };

        if cancel.is_cancelled() {
            break;
        }

        info!(%folder, messages = uids.len(), "folder scanned");

        let mut sent = 0u64;
        let mut receiver_gone = false;
        for uid in uids {
            if tasks
                .send(Task {
                    folder: folder.clone(),
                    uid,
                })
                .is_err()
            {
                // All workers gone; nothing left to produce for.
                receiver_gone = true;
                break;
            }
            sent += 1;
        }

        stats.enqueued += sent;
        stats.per_folder.push((folder, sent));
        if receiver_gone {
            break;
        }
    }

    conn.close().await;
    stats
}

async fn scan_folder(
    conn: &mut WorkerConnection,
    folder: &str,
    window: DateWindow,
) -> Result<Vec<u32>> {
    conn.ensure_ready().await?;
    conn.ensure_selected(folder).await?;
    conn.session_mut()?
        .search_uids(window.since, window.before)
        .await
}
