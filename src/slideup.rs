//! In-app message ("slideup") delivery: the pending queue and the display state machine.
//!
//! Arriving messages either go straight to the display, get queued, or are discarded, as decided
//! by the host's [`SlideupDelegate`] (or the default policy when none is set). Messages that
//! cannot be displayed are queued, never dropped. The queue is FIFO and drains opportunistically
//! on dequeue triggers: a new arrival resolving without taking the display, the app returning to
//! the foreground, a message-triggered feed view closing, or an explicit
//! `display_next_available_slideup` call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::Str;

/// What the host wants done with a slideup that is about to be displayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlideupDisposition {
    /// Display the message now, ahead of anything queued. If it cannot be displayed it is
    /// queued, not dropped.
    #[default]
    ShowImmediately,
    /// Discard the message permanently.
    Ignore,
    /// Queue the message for later display.
    Queue,
}

/// A short-lived in-app message. Does not persist across process restarts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlideupMessage {
    /// The text shown to the user.
    pub text: Str,
    /// When the message reached this device.
    pub received_at: DateTime<Utc>,
}

impl SlideupMessage {
    pub(crate) fn new(text: Str) -> SlideupMessage {
        SlideupMessage {
            text,
            received_at: Utc::now(),
        }
    }
}

/// Lets the host control how, when, and if slideups are displayed.
///
/// Both methods have defaults, so a host only overrides what it cares about. Clearing the
/// delegate after messages have been queued does not drop them; they are displayed under the
/// default policy on the next dequeue trigger.
pub trait SlideupDelegate: Send + Sync {
    /// Called with the message text when a slideup is about to be displayed. The default keeps
    /// arriving slideups flowing to the display.
    fn should_display_slideup(&self, _message: &str) -> SlideupDisposition {
        SlideupDisposition::ShowImmediately
    }

    /// Called when a displayed slideup is tapped.
    fn on_slideup_tapped(&self) {}
}

/// Puts slideups on screen, on whatever execution context owns UI presentation.
///
/// The scheduler dispatches display attempts onto this seam and never assumes a particular
/// threading model. Returning `false` means the host UI could not take the message right now;
/// the scheduler queues it and tries again on the next trigger.
pub trait SlideupPresenter: Send + Sync {
    fn present(&self, message: &SlideupMessage) -> bool;
}

/// Why the display slot is suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    /// The keyboard is up.
    KeyboardUp,
    /// A message-triggered feed view is open.
    FeedViewOpen,
}

/// State of the display slot. Exactly one per runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayState {
    Idle,
    Displaying,
    Suspended(SuspendReason),
}

enum Requeue {
    Front,
    Back,
}

enum AttemptOutcome {
    Displayed,
    Queued,
    Discarded,
}

pub(crate) struct SlideupScheduler {
    inner: Mutex<SchedulerInner>,
}

struct SchedulerInner {
    state: DisplayState,
    pending: VecDeque<SlideupMessage>,
    delegate: Option<Arc<dyn SlideupDelegate>>,
    presenter: Option<Arc<dyn SlideupPresenter>>,
}

impl SlideupScheduler {
    pub(crate) fn new() -> SlideupScheduler {
        SlideupScheduler {
            inner: Mutex::new(SchedulerInner {
                state: DisplayState::Idle,
                pending: VecDeque::new(),
                delegate: None,
                presenter: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerInner> {
        self.inner
            .lock()
            .expect("thread holding slideup scheduler lock should not panic")
    }

    pub(crate) fn set_delegate(&self, delegate: Arc<dyn SlideupDelegate>) {
        self.lock().delegate = Some(delegate);
    }

    pub(crate) fn clear_delegate(&self) {
        self.lock().delegate = None;
    }

    pub(crate) fn set_presenter(&self, presenter: Arc<dyn SlideupPresenter>) {
        self.lock().presenter = Some(presenter);
    }

    pub(crate) fn display_state(&self) -> DisplayState {
        self.lock().state
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Entry point for a message arriving from the server.
    pub(crate) fn on_message_arrived(&self, message: SlideupMessage) {
        {
            let mut inner = self.lock();
            if inner.state != DisplayState::Idle {
                inner.pending.push_back(message);
                return;
            }
        }
        // The arriving message is evaluated first; older pending messages are not reordered
        // ahead of it. Draining picks up afterwards if the display is still free.
        self.attempt(message, Requeue::Back);
        self.drain();
    }

    /// Explicit host request to display the front of the queue.
    pub(crate) fn display_next(&self) {
        self.drain();
    }

    pub(crate) fn app_entered_foreground(&self) {
        self.drain();
    }

    pub(crate) fn keyboard_did_show(&self) {
        let mut inner = self.lock();
        if inner.state == DisplayState::Idle {
            inner.state = DisplayState::Suspended(SuspendReason::KeyboardUp);
        }
    }

    pub(crate) fn keyboard_did_hide(&self) {
        let mut inner = self.lock();
        if inner.state == DisplayState::Suspended(SuspendReason::KeyboardUp) {
            inner.state = DisplayState::Idle;
        }
    }

    pub(crate) fn feed_view_opened(&self) {
        let mut inner = self.lock();
        if matches!(inner.state, DisplayState::Idle | DisplayState::Suspended(_)) {
            inner.state = DisplayState::Suspended(SuspendReason::FeedViewOpen);
        }
    }

    /// A message-triggered full-screen view closed; display may resume.
    pub(crate) fn feed_view_closed(&self) {
        {
            let mut inner = self.lock();
            if inner.state == DisplayState::Suspended(SuspendReason::FeedViewOpen) {
                inner.state = DisplayState::Idle;
            }
        }
        self.drain();
    }

    /// The currently displayed slideup went away. Queued messages wait for the next dequeue
    /// trigger rather than displaying back-to-back unprompted.
    pub(crate) fn slideup_dismissed(&self) {
        let mut inner = self.lock();
        if inner.state == DisplayState::Displaying {
            inner.state = DisplayState::Idle;
        }
    }

    /// Tap handling: the delegate takes over if present; otherwise the default action opens the
    /// feed view, suspending display until the host reports it closed.
    pub(crate) fn slideup_tapped(&self) {
        let delegate = self.lock().delegate.clone();
        match delegate {
            Some(delegate) => {
                {
                    let mut inner = self.lock();
                    if inner.state == DisplayState::Displaying {
                        inner.state = DisplayState::Idle;
                    }
                }
                delegate.on_slideup_tapped();
            }
            None => {
                let mut inner = self.lock();
                inner.state = DisplayState::Suspended(SuspendReason::FeedViewOpen);
            }
        }
    }

    /// The queue does not survive a user change.
    pub(crate) fn clear_pending(&self) {
        self.lock().pending.clear();
    }

    /// Runs one message through the eligibility decision and, if allowed, the presenter.
    /// `requeue` says which end of the queue the message goes to when it cannot be displayed:
    /// the back for fresh arrivals, the front for dequeued messages so queue order is preserved
    /// across repeated failed attempts.
    fn attempt(&self, message: SlideupMessage, requeue: Requeue) -> AttemptOutcome {
        // Host callbacks run outside the scheduler lock; a delegate may re-enter the SDK.
        let delegate = self.lock().delegate.clone();
        let disposition = match &delegate {
            Some(delegate) => delegate.should_display_slideup(&message.text),
            None => SlideupDisposition::ShowImmediately,
        };

        match disposition {
            SlideupDisposition::Ignore => {
                log::debug!(target: "beacon", "slideup discarded by delegate");
                AttemptOutcome::Discarded
            }
            SlideupDisposition::Queue => {
                push(&mut self.lock(), message, requeue);
                AttemptOutcome::Queued
            }
            SlideupDisposition::ShowImmediately => {
                // Claim the display slot before calling out to the presenter; the state may have
                // changed while the delegate ran.
                let presenter = {
                    let mut inner = self.lock();
                    if inner.state != DisplayState::Idle {
                        push(&mut inner, message, requeue);
                        return AttemptOutcome::Queued;
                    }
                    inner.state = DisplayState::Displaying;
                    inner.presenter.clone()
                };
                let displayed = presenter
                    .as_ref()
                    .map_or(false, |presenter| presenter.present(&message));
                if displayed {
                    AttemptOutcome::Displayed
                } else {
                    let mut inner = self.lock();
                    inner.state = DisplayState::Idle;
                    push(&mut inner, message, requeue);
                    AttemptOutcome::Queued
                }
            }
        }
    }

    /// Front-to-back opportunistic draining. Stops as soon as a message takes the display, goes
    /// back to the queue, or the display slot is no longer free. A message discarded by the
    /// delegate does not block the ones behind it.
    fn drain(&self) {
        loop {
            let message = {
                let mut inner = self.lock();
                if inner.state != DisplayState::Idle {
                    return;
                }
                match inner.pending.pop_front() {
                    Some(message) => message,
                    None => return,
                }
            };
            match self.attempt(message, Requeue::Front) {
                AttemptOutcome::Displayed | AttemptOutcome::Queued => return,
                AttemptOutcome::Discarded => continue,
            }
        }
    }
}

fn push(inner: &mut SchedulerInner, message: SlideupMessage, requeue: Requeue) {
    match requeue {
        Requeue::Front => inner.pending.push_front(message),
        Requeue::Back => inner.pending.push_back(message),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Delegate scripted with one disposition per expected call.
    struct ScriptedDelegate {
        script: Mutex<VecDeque<SlideupDisposition>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedDelegate {
        fn new(script: &[SlideupDisposition]) -> Arc<ScriptedDelegate> {
            Arc::new(ScriptedDelegate {
                script: Mutex::new(script.iter().copied().collect()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SlideupDelegate for ScriptedDelegate {
        fn should_display_slideup(&self, message: &str) -> SlideupDisposition {
            self.calls.lock().unwrap().push(message.to_owned());
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_default()
        }
    }

    struct TestPresenter {
        accept: AtomicBool,
        presented: Mutex<Vec<String>>,
    }

    impl TestPresenter {
        fn new(accept: bool) -> Arc<TestPresenter> {
            Arc::new(TestPresenter {
                accept: AtomicBool::new(accept),
                presented: Mutex::new(Vec::new()),
            })
        }

        fn presented(&self) -> Vec<String> {
            self.presented.lock().unwrap().clone()
        }
    }

    impl SlideupPresenter for TestPresenter {
        fn present(&self, message: &SlideupMessage) -> bool {
            if self.accept.load(Ordering::SeqCst) {
                self.presented.lock().unwrap().push(message.text.to_string());
                true
            } else {
                false
            }
        }
    }

    fn message(text: &str) -> SlideupMessage {
        SlideupMessage::new(text.into())
    }

    #[test]
    fn queued_message_is_not_reordered_behind_an_immediate_one() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());
        let delegate = ScriptedDelegate::new(&[
            SlideupDisposition::Queue,           // m1 arrival
            SlideupDisposition::Queue,           // m1 re-asked by the post-arrival drain
            SlideupDisposition::ShowImmediately, // m2 arrival
            SlideupDisposition::ShowImmediately, // m1 dequeue
        ]);
        scheduler.set_delegate(delegate.clone());

        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.on_message_arrived(message("m2"));
        assert_eq!(scheduler.display_state(), DisplayState::Displaying);
        assert_eq!(scheduler.pending_count(), 1);
        assert_eq!(presenter.presented(), vec!["m2"]);

        scheduler.slideup_dismissed();
        scheduler.display_next();
        assert_eq!(presenter.presented(), vec!["m2", "m1"]);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(delegate.calls(), vec!["m1", "m1", "m2", "m1"]);
    }

    #[test]
    fn arrivals_while_displaying_queue_without_consulting_the_delegate() {
        let scheduler = SlideupScheduler::new();
        scheduler.set_presenter(TestPresenter::new(true));
        let delegate = ScriptedDelegate::new(&[SlideupDisposition::ShowImmediately]);
        scheduler.set_delegate(delegate.clone());

        scheduler.on_message_arrived(message("m1"));
        scheduler.on_message_arrived(message("m2"));
        scheduler.on_message_arrived(message("m3"));

        assert_eq!(scheduler.display_state(), DisplayState::Displaying);
        assert_eq!(scheduler.pending_count(), 2);
        assert_eq!(delegate.calls(), vec!["m1"]);
    }

    #[test]
    fn failed_display_requeues_at_the_front_on_dequeue() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(false);
        scheduler.set_presenter(presenter.clone());

        scheduler.on_message_arrived(message("m1"));
        scheduler.on_message_arrived(message("m2"));
        assert_eq!(scheduler.pending_count(), 2);

        // Default policy wants to show, the presenter refuses, order must hold.
        scheduler.display_next();
        assert_eq!(scheduler.pending_count(), 2);

        presenter.accept.store(true, Ordering::SeqCst);
        scheduler.display_next();
        assert_eq!(presenter.presented(), vec!["m1"]);
    }

    #[test]
    fn no_presenter_falls_back_to_queueing() {
        let scheduler = SlideupScheduler::new();
        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.display_state(), DisplayState::Idle);
        assert_eq!(scheduler.pending_count(), 1);
    }

    #[test]
    fn ignore_at_dequeue_discards_and_keeps_draining() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());
        let delegate = ScriptedDelegate::new(&[
            SlideupDisposition::Queue,           // m1 arrival
            SlideupDisposition::Queue,           // m1 re-asked by the post-arrival drain
            SlideupDisposition::Queue,           // m2 arrival
            SlideupDisposition::Queue,           // m1 re-asked after m2 queued
            SlideupDisposition::Ignore,          // m1 on the explicit trigger
            SlideupDisposition::ShowImmediately, // m2 right behind it
        ]);
        scheduler.set_delegate(delegate.clone());

        scheduler.on_message_arrived(message("m1"));
        scheduler.on_message_arrived(message("m2"));
        assert_eq!(scheduler.pending_count(), 2);

        scheduler.display_next();
        assert_eq!(presenter.presented(), vec!["m2"]);
        assert_eq!(scheduler.pending_count(), 0);
        assert_eq!(scheduler.display_state(), DisplayState::Displaying);
    }

    #[test]
    fn clearing_the_delegate_keeps_the_queue_and_uses_the_default() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());
        let delegate = ScriptedDelegate::new(&[
            SlideupDisposition::Queue, // m1 arrival
            SlideupDisposition::Queue, // m1 re-asked by the post-arrival drain
        ]);
        scheduler.set_delegate(delegate);

        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.clear_delegate();
        scheduler.display_next();
        assert_eq!(presenter.presented(), vec!["m1"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[test]
    fn keyboard_suspends_display_until_hidden() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());

        scheduler.keyboard_did_show();
        assert_eq!(
            scheduler.display_state(),
            DisplayState::Suspended(SuspendReason::KeyboardUp)
        );

        // Arrivals while suspended queue silently.
        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.pending_count(), 1);
        assert!(presenter.presented().is_empty());

        scheduler.keyboard_did_hide();
        assert_eq!(scheduler.display_state(), DisplayState::Idle);

        scheduler.display_next();
        assert_eq!(presenter.presented(), vec!["m1"]);
    }

    #[test]
    fn closing_the_feed_view_is_a_dequeue_trigger() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());

        scheduler.feed_view_opened();
        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.feed_view_closed();
        assert_eq!(presenter.presented(), vec!["m1"]);
        assert_eq!(scheduler.display_state(), DisplayState::Displaying);
    }

    #[test]
    fn tap_without_a_delegate_opens_the_feed_view() {
        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter.clone());

        scheduler.on_message_arrived(message("m1"));
        assert_eq!(scheduler.display_state(), DisplayState::Displaying);

        scheduler.slideup_tapped();
        assert_eq!(
            scheduler.display_state(),
            DisplayState::Suspended(SuspendReason::FeedViewOpen)
        );

        scheduler.on_message_arrived(message("m2"));
        scheduler.feed_view_closed();
        assert_eq!(presenter.presented(), vec!["m1", "m2"]);
    }

    #[test]
    fn tap_with_a_delegate_notifies_and_frees_the_display() {
        struct TapDelegate(AtomicBool);
        impl SlideupDelegate for TapDelegate {
            fn on_slideup_tapped(&self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let scheduler = SlideupScheduler::new();
        let presenter = TestPresenter::new(true);
        scheduler.set_presenter(presenter);
        let delegate = Arc::new(TapDelegate(AtomicBool::new(false)));
        scheduler.set_delegate(delegate.clone());

        scheduler.on_message_arrived(message("m1"));
        scheduler.slideup_tapped();

        assert!(delegate.0.load(Ordering::SeqCst));
        assert_eq!(scheduler.display_state(), DisplayState::Idle);
    }
}
