//! Drains the request queue into per-user network submissions and applies their results back
//! onto the runtime.
//!
//! `flush_and_process` never blocks the caller: it snapshots eligible records under the queue
//! lock and hands the resulting batches to a background thread. Completions confirm records,
//! restore unconfirmed ones, route server responses to the feed tracker and slideup scheduler,
//! and schedule follow-up flushes for users whose flush was deferred mid-flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::client::Runtime;
use crate::request_queue::{FlushScope, SubmissionDisposition};
use crate::slideup::SlideupMessage;
use crate::transport::{ServerResponse, UserBatch};
use crate::Error;

/// Observed by request executors so `shutdown_server_communication` can abort work that is
/// already running.
#[derive(Clone)]
pub struct CancelToken {
    epoch: Arc<AtomicU64>,
    started_at: u64,
}

impl CancelToken {
    pub(crate) fn new(epoch: &Arc<AtomicU64>) -> CancelToken {
        CancelToken {
            epoch: Arc::clone(epoch),
            started_at: epoch.load(Ordering::SeqCst),
        }
    }

    /// True once server communication has been shut down after this submission cycle started.
    pub fn is_cancelled(&self) -> bool {
        self.epoch.load(Ordering::SeqCst) != self.started_at
    }
}

/// Snapshots every record eligible under `scope` and submits the resulting per-user batches on a
/// background thread. Returns immediately.
pub(crate) fn flush_and_process(runtime: &Arc<Runtime>, scope: FlushScope) {
    let batches = runtime.queue.take_batches(scope);
    if batches.is_empty() {
        return;
    }
    let cancel = CancelToken::new(&runtime.cancel_epoch);

    // Kept around to requeue the batches if the dispatch thread cannot be spawned; the spawn
    // consumes its copy either way.
    let fallback = batches.clone();
    let thread_runtime = Arc::clone(runtime);
    let spawned = std::thread::Builder::new()
        .name("beacon-dispatch".to_owned())
        .spawn(move || run_cycle(&thread_runtime, batches, &cancel));

    if let Err(err) = spawned {
        log::warn!(target: "beacon", "failed to spawn dispatch thread, requeueing records: {}", err);
        for batch in fallback {
            runtime.queue.complete(batch, SubmissionDisposition::Unconfirmed);
        }
    }
}

/// Aborts in-flight server communication and forces `Manual` policy. Unsent records stay
/// queued. Idempotent.
pub(crate) fn shutdown(runtime: &Arc<Runtime>) {
    runtime.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    runtime.policy.force_manual();
    log::debug!(target: "beacon", "server communication shut down, policy forced to Manual");
}

fn run_cycle(runtime: &Arc<Runtime>, batches: Vec<UserBatch>, cancel: &CancelToken) {
    let mut followup: Option<FlushScope> = None;

    for batch in batches {
        let user = batch.user.clone();
        if cancel.is_cancelled() {
            log::debug!(target: "beacon", "submission cycle cancelled, requeueing records for user {}", user);
            let deferred = runtime
                .queue
                .complete(batch, SubmissionDisposition::Unconfirmed);
            merge_followup(&mut followup, deferred);
            continue;
        }

        let result = runtime.executor.execute(&batch, cancel);
        let deferred = match result {
            Ok(response) if !cancel.is_cancelled() => {
                let deferred = runtime
                    .queue
                    .complete(batch, SubmissionDisposition::Confirmed);
                apply_response(runtime, response);
                deferred
            }
            Ok(_) => {
                // Shutdown raced the submission; treat it as unconfirmed.
                runtime
                    .queue
                    .complete(batch, SubmissionDisposition::Unconfirmed)
            }
            Err(Error::Cancelled) => runtime
                .queue
                .complete(batch, SubmissionDisposition::Unconfirmed),
            Err(err) => {
                log::warn!(target: "beacon", "submission for user {} failed, will retry on a later flush: {}", user, err);
                runtime
                    .queue
                    .complete(batch, SubmissionDisposition::Unconfirmed)
            }
        };
        merge_followup(&mut followup, deferred);
    }

    // Flush requests that arrived while their user was in flight were deferred, not dropped.
    if let Some(scope) = followup {
        if !cancel.is_cancelled() {
            log::debug!(target: "beacon", "running follow-up flush for requests deferred during submission");
            flush_and_process(runtime, scope);
        }
    }
}

fn merge_followup(followup: &mut Option<FlushScope>, deferred: Option<FlushScope>) {
    if let Some(scope) = deferred {
        *followup = Some(followup.map_or(scope, |current| current.max(scope)));
    }
}

fn apply_response(runtime: &Arc<Runtime>, response: ServerResponse) {
    if let Some(feed) = response.feed {
        runtime.feed.apply_update(feed);
    }
    for text in response.slideups {
        runtime.slideups.on_message_arrived(SlideupMessage::new(text));
    }
}
