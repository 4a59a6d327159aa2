//! The request-processing policy and the periodic flush timer it owns.

use std::sync::mpsc::{RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use crate::client::Runtime;
use crate::dispatcher;
use crate::request_queue::FlushScope;

/// Policies for processing of network requests by the SDK.
///
/// Regardless of policy, requests on the queue are combined per merge key to minimize the total
/// number of requests and their combined payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProcessingPolicy {
    /// All server communication is handled automatically: immediate server requests are made
    /// when user-facing data is required (feed refreshes, feedback posts), and new analytics
    /// data is flushed periodically on the configured interval.
    #[default]
    Automatic,
    /// The same as [`ProcessingPolicy::Automatic`], except that analytics data never flushes on
    /// its own. Call `flush_and_process_request_queue` to synchronize newly updated user data
    /// with the server.
    AutomaticExceptDataFlush,
    /// Requests are queued, but nothing is processed until an explicit flush. Recommended for
    /// advanced use cases only; to merely control background flushing, prefer
    /// [`ProcessingPolicy::Automatic`] with a custom flush interval.
    Manual,
}

pub(crate) struct PolicyController {
    inner: Mutex<PolicyInner>,
}

struct PolicyInner {
    policy: ProcessingPolicy,
    timer: Option<FlushTimer>,
    /// Counts timer starts. Lets tests verify that a timer is reset, not duplicated.
    timer_generation: u64,
}

impl PolicyController {
    pub(crate) fn new(initial: ProcessingPolicy) -> PolicyController {
        PolicyController {
            inner: Mutex::new(PolicyInner {
                policy: initial,
                timer: None,
                timer_generation: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PolicyInner> {
        self.inner
            .lock()
            .expect("thread holding policy lock should not panic")
    }

    pub(crate) fn current(&self) -> ProcessingPolicy {
        self.lock().policy
    }

    /// Applies `policy`. Setting the value already in effect is a no-op and does not reset the
    /// timer. Moving away from `Automatic` cancels any scheduled flush but never an in-progress
    /// submission; only the shutdown path does that.
    pub(crate) fn set(&self, policy: ProcessingPolicy, runtime: &Arc<Runtime>) {
        let mut inner = self.lock();
        if inner.policy == policy {
            log::debug!(target: "beacon", "request processing policy already {:?}, ignoring", policy);
            return;
        }
        log::debug!(target: "beacon", "request processing policy set to {:?}", policy);
        inner.policy = policy;
        sync_timer(&mut inner, runtime);
    }

    /// Startup hook: starts the timer if the initial policy asks for one.
    pub(crate) fn start(&self, runtime: &Arc<Runtime>) {
        let mut inner = self.lock();
        sync_timer(&mut inner, runtime);
    }

    /// Stops the timer and forces `Manual`, bypassing the same-value no-op rule. Used by the
    /// shutdown path so the timer cannot immediately restart work.
    pub(crate) fn force_manual(&self) {
        let mut inner = self.lock();
        inner.policy = ProcessingPolicy::Manual;
        if let Some(timer) = inner.timer.take() {
            timer.stop();
        }
    }

    #[cfg(test)]
    pub(crate) fn timer_generation(&self) -> u64 {
        self.lock().timer_generation
    }

    #[cfg(test)]
    pub(crate) fn timer_is_running(&self) -> bool {
        self.lock().timer.is_some()
    }
}

/// Starts or stops the flush timer to match the current policy. At most one timer exists per
/// runtime.
fn sync_timer(inner: &mut PolicyInner, runtime: &Arc<Runtime>) {
    match inner.policy {
        ProcessingPolicy::Automatic => {
            if inner.timer.is_none() {
                match FlushTimer::start(runtime.flush_interval, Arc::downgrade(runtime)) {
                    Ok(timer) => {
                        inner.timer = Some(timer);
                        inner.timer_generation += 1;
                    }
                    Err(err) => {
                        log::warn!(target: "beacon", "failed to start flush timer: {}", err)
                    }
                }
            }
        }
        ProcessingPolicy::AutomaticExceptDataFlush | ProcessingPolicy::Manual => {
            if let Some(timer) = inner.timer.take() {
                timer.stop();
            }
        }
    }
}

/// The recurring trigger for automatic flushes.
///
/// Runs on a dedicated thread; the stop channel doubles as the tick via `recv_timeout`. The
/// thread holds only a weak reference to the runtime, so dropping the client ends the timer on
/// its next tick.
struct FlushTimer {
    stop_sender: SyncSender<()>,
}

impl FlushTimer {
    fn start(interval: Duration, runtime: Weak<Runtime>) -> std::io::Result<FlushTimer> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync`. Buffer size of 1 is
        // enough: we can `try_send()` and ignore a full buffer (a stop is already pending).
        let (stop_sender, stop_receiver) = std::sync::mpsc::sync_channel::<()>(1);

        let _handle = std::thread::Builder::new()
            .name("beacon-flush".to_owned())
            .spawn(move || loop {
                match stop_receiver.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(runtime) = runtime.upgrade() else {
                            // The client is gone; nothing left to flush.
                            return;
                        };
                        log::debug!(target: "beacon", "flush timer fired");
                        dispatcher::flush_and_process(&runtime, FlushScope::All);
                    }
                    Ok(()) => {
                        log::debug!(target: "beacon", "flush timer received stop command");
                        return;
                    }
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            })?;

        Ok(FlushTimer { stop_sender })
    }

    fn stop(&self) {
        // Error means the thread already exited or another stop is pending; both can be ignored.
        let _ = self.stop_sender.try_send(());
    }
}

impl Drop for FlushTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
