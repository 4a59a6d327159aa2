//! The host-facing runtime: thin entry points into the queueing, policy, session, identity, and
//! slideup components.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use chrono::Utc;

use crate::config::ClientConfig;
use crate::dispatcher;
use crate::feed::{FeedObserverId, FeedTracker};
use crate::identity::{Identity, IdentityManager, UserChange};
use crate::policy::{PolicyController, ProcessingPolicy};
use crate::request_queue::{FlushScope, RequestQueue};
use crate::requests::{
    self, AnalyticsEvent, RequestKind, RequestPayload, RequestRecord, SocialNetwork, UserId,
};
use crate::session::{Session, SessionManager};
use crate::slideup::{DisplayState, SlideupDelegate, SlideupPresenter, SlideupScheduler};
use crate::transport::{HttpRequestExecutor, RequestExecutor};
use crate::{Error, Result, Str};

/// Mutable runtime state shared with the background tasks. One per [`Client`]; lives for the
/// client's process-wide lifetime.
pub(crate) struct Runtime {
    pub(crate) queue: RequestQueue,
    pub(crate) policy: PolicyController,
    pub(crate) identity: IdentityManager,
    pub(crate) session: SessionManager,
    pub(crate) slideups: SlideupScheduler,
    pub(crate) feed: FeedTracker,
    pub(crate) executor: Arc<dyn RequestExecutor>,
    /// Bumped by the shutdown path; in-flight submission cycles compare against their snapshot.
    pub(crate) cancel_epoch: Arc<AtomicU64>,
    pub(crate) flush_interval: std::time::Duration,
    pub(crate) flush_feedback_when_manual: bool,
}

/// The SDK runtime.
///
/// A `Client` is an explicitly constructed context object with process-wide lifetime: build it
/// once at startup from a [`ClientConfig`] and share it wherever the host needs it. All methods
/// are safe to call from any thread.
///
/// Constructing the client opens a session for the device's anonymous user, which requests a
/// feed refresh; under the automatic policies that refresh is submitted right away.
///
/// # Examples
/// ```no_run
/// # use beacon_core::{Client, ClientConfig};
/// let client = ClientConfig::from_api_key("api-key").to_client();
/// client.log_custom_event("clicked_button").unwrap();
/// ```
pub struct Client {
    runtime: Arc<Runtime>,
}

impl Client {
    /// Create a new `Client` using the specified configuration.
    pub fn new(config: ClientConfig) -> Client {
        let ClientConfig {
            api_key,
            base_url,
            request_processing_policy,
            flush_interval,
            flush_feedback_when_manual,
            executor,
        } = config;

        let executor = executor
            .unwrap_or_else(|| Arc::new(HttpRequestExecutor::new(base_url, api_key)));

        let runtime = Arc::new(Runtime {
            queue: RequestQueue::new(),
            policy: PolicyController::new(request_processing_policy),
            identity: IdentityManager::new(),
            session: SessionManager::new(),
            slideups: SlideupScheduler::new(),
            feed: FeedTracker::new(),
            executor,
            cancel_epoch: Arc::new(AtomicU64::new(0)),
            flush_interval,
            flush_feedback_when_manual,
        });
        runtime.policy.start(&runtime);

        let client = Client { runtime };
        let user = client.runtime.identity.current_user();
        client.enqueue_all(client.runtime.session.open(user));
        client
    }

    /// Routes a record through the queue and lets the current policy decide whether it triggers
    /// an immediate flush.
    fn enqueue(&self, record: RequestRecord) {
        let kind = record.kind();
        self.runtime.queue.enqueue(record);
        if let Some(scope) = self.auto_flush_scope(kind) {
            dispatcher::flush_and_process(&self.runtime, scope);
        }
    }

    fn enqueue_all(&self, records: Vec<RequestRecord>) {
        for record in records {
            self.enqueue(record);
        }
    }

    /// User-facing data is never deferred under the automatic policies; analytics kinds wait for
    /// the flush timer or an explicit flush.
    fn auto_flush_scope(&self, kind: RequestKind) -> Option<FlushScope> {
        if !kind.is_user_facing() {
            return None;
        }
        match self.runtime.policy.current() {
            ProcessingPolicy::Automatic | ProcessingPolicy::AutomaticExceptDataFlush => {
                Some(FlushScope::UserFacing)
            }
            ProcessingPolicy::Manual => (kind == RequestKind::FeedbackPost
                && self.runtime.flush_feedback_when_manual)
                .then_some(FlushScope::UserFacing),
        }
    }

    /// Immediately starts processing everything on the request queue, regardless of policy.
    ///
    /// Under [`ProcessingPolicy::Manual`] this is the only way the queue drains. Under
    /// [`ProcessingPolicy::AutomaticExceptDataFlush`], call it to force a flush of updated user
    /// data. Returns without blocking; submission happens in the background, and records stay
    /// authoritative in the queue until the server confirms them.
    pub fn flush_and_process_request_queue(&self) {
        dispatcher::flush_and_process(&self.runtime, FlushScope::All);
    }

    /// Stops all in-flight server communication and forces [`ProcessingPolicy::Manual`] so that
    /// no further automatic network activity occurs. Queued-but-unsent records stay queued.
    ///
    /// You should usually only call this if the OS is forcing you to stop background work on
    /// exit. To continue normal operation afterwards, explicitly set the request processing
    /// policy back to the desired value. Calling this while nothing is in flight has no effect
    /// beyond the policy change.
    pub fn shutdown_server_communication(&self) {
        dispatcher::shutdown(&self.runtime);
    }

    /// Changes the current user.
    ///
    /// When the device is still anonymous and `user_id` has never been identified here before,
    /// the anonymous history is preserved and attributed to `user_id`. Identifying a user that
    /// was already seen elsewhere starts from that user's existing remote profile instead; the
    /// local history of the previous identity is not transferred. Either way the current session
    /// is closed, a new one is opened for `user_id`, and a feed refresh for the new user is
    /// requested.
    ///
    /// This is a comparatively costly operation; avoid calling it speculatively. Once a device
    /// has been identified it cannot return to anonymous, and calling this with the id that is
    /// already current does nothing.
    pub fn change_user(&self, user_id: impl Into<Str>) -> Result<()> {
        let user_id = user_id.into();
        if user_id.is_empty() {
            log::warn!(target: "beacon", "ignoring change_user with an empty id");
            return Err(Error::EmptyUserId);
        }
        let new_user = UserId::from(user_id);

        match self.runtime.identity.change_user(new_user.clone()) {
            UserChange::Unchanged => {
                log::debug!(target: "beacon", "user {} is already current, ignoring change_user", new_user);
            }
            UserChange::Changed {
                previous,
                merge_history,
            } => {
                if let Some(summary) = self.runtime.session.close() {
                    self.enqueue(summary);
                }
                if merge_history {
                    log::debug!(target: "beacon", "preserving anonymous history of {} for {}", previous, new_user);
                    self.runtime.queue.reassign_user(&previous, &new_user);
                }
                // Pending slideups and feed cards belong to the previous user.
                self.runtime.slideups.clear_pending();
                self.runtime.feed.clear();
                self.enqueue_all(self.runtime.session.open(new_user));
            }
        }
        Ok(())
    }

    /// Adds a custom event to the tracking log that is lazily pushed up to the server. Think of
    /// events like counters: prefer broad names ("watched_video") over specific ones so user
    /// segments stay useful.
    pub fn log_custom_event(&self, name: impl Into<Str>) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            log::warn!(target: "beacon", "dropping custom event with an empty name");
            return Err(Error::EmptyEventName);
        }
        let user = self.runtime.identity.current_user();
        self.runtime.queue.append_event(
            user,
            AnalyticsEvent::Custom {
                name,
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    /// Logs a purchase made in the application.
    ///
    /// `currency` must be one of [`SUPPORTED_CURRENCIES`](crate::SUPPORTED_CURRENCIES); any
    /// other code results in a logged warning, the purchase is dropped locally, and no network
    /// call is made. Prices are rounded to at most two digits after the decimal point; base
    /// units depend on the currency (dollars and cents for USD, whole yen for JPY).
    pub fn log_purchase(
        &self,
        product_id: impl Into<Str>,
        currency: &str,
        price: f64,
    ) -> Result<()> {
        let currency = match requests::validate_currency(currency) {
            Ok(currency) => currency,
            Err(err) => {
                log::warn!(target: "beacon", "dropping purchase log: {}", err);
                return Err(err);
            }
        };
        let user = self.runtime.identity.current_user();
        self.runtime.queue.append_event(
            user,
            AnalyticsEvent::Purchase {
                product_id: product_id.into(),
                currency,
                price: requests::round_price(price),
                timestamp: Utc::now(),
            },
        );
        Ok(())
    }

    /// Records that the current user shared something to a social network.
    pub fn log_social_share(&self, network: SocialNetwork) {
        let user = self.runtime.identity.current_user();
        self.runtime.queue.append_event(
            user,
            AnalyticsEvent::SocialShare {
                network,
                timestamp: Utc::now(),
            },
        );
    }

    /// Posts a feedback message from the current user. Feedback is user-facing and flushes
    /// immediately under the automatic policies; under [`ProcessingPolicy::Manual`] it is
    /// deferred unless [`ClientConfig::flush_feedback_when_manual`] was enabled.
    pub fn log_feedback(
        &self,
        message: impl Into<Str>,
        reply_to: Option<Str>,
        is_bug: bool,
    ) -> Result<()> {
        let message = message.into();
        if message.is_empty() {
            log::warn!(target: "beacon", "dropping feedback with an empty message");
            return Err(Error::EmptyFeedbackMessage);
        }
        let user = self.runtime.identity.current_user();
        self.enqueue(RequestRecord::new(
            user,
            RequestPayload::FeedbackPost {
                message,
                reply_to,
                is_bug,
            },
        ));
        Ok(())
    }

    /// Associates the device's push token with the current user.
    pub fn register_push_token(&self, token: impl Into<Str>) {
        let user = self.runtime.identity.current_user();
        self.enqueue(RequestRecord::new(
            user,
            RequestPayload::PushTokenRegister {
                token: token.into(),
            },
        ));
    }

    /// The request processing policy currently in effect.
    pub fn request_processing_policy(&self) -> ProcessingPolicy {
        self.runtime.policy.current()
    }

    /// Sets the request processing policy at runtime. Setting the value already in effect is a
    /// no-op.
    ///
    /// Moving to [`ProcessingPolicy::Manual`] cancels any scheduled flush, but an in-progress
    /// submission finishes; use [`Client::shutdown_server_communication`] to abort in-flight
    /// work. Setting a policy never causes a flush by itself; it only allows one to be scheduled
    /// the next time an eligible request is enqueued.
    pub fn set_request_processing_policy(&self, policy: ProcessingPolicy) {
        self.runtime.policy.set(policy, &self.runtime);
    }

    /// The current identity: anonymous until the host identifies a user.
    pub fn identity(&self) -> Identity {
        self.runtime.identity.identity()
    }

    /// The id outbound requests are currently attributed to.
    pub fn current_user(&self) -> UserId {
        self.runtime.identity.current_user()
    }

    /// The currently open session, if any.
    pub fn current_session(&self) -> Option<Session> {
        self.runtime.session.current()
    }

    /// The total number of currently active cards.
    pub fn card_count(&self) -> usize {
        self.runtime.feed.card_count()
    }

    /// The number of active cards that have not been viewed. A card counts as viewed after its
    /// first recorded impression; scrolling it off-screen and back does not re-count it.
    pub fn unread_card_count(&self) -> usize {
        self.runtime.feed.unread_card_count()
    }

    /// Marks a card as viewed. Safe to call repeatedly.
    pub fn record_card_impression(&self, card_id: &str) {
        self.runtime.feed.record_impression(card_id);
    }

    /// Registers an observer invoked, with no payload, every time the data set backing message
    /// delivery is refreshed. Observers registered at fire time each get exactly one call per
    /// refresh.
    pub fn subscribe_feed_updates(
        &self,
        observer: impl Fn() + Send + Sync + 'static,
    ) -> FeedObserverId {
        self.runtime.feed.subscribe(observer)
    }

    /// Removes a previously registered feed observer.
    pub fn unsubscribe_feed_updates(&self, id: FeedObserverId) {
        self.runtime.feed.unsubscribe(id);
    }

    /// Setting the slideup delegate allows the host to control how, when, and if slideups are
    /// displayed.
    pub fn set_slideup_delegate(&self, delegate: impl SlideupDelegate + 'static) {
        self.runtime.slideups.set_delegate(Arc::new(delegate));
    }

    /// Removes the slideup delegate. Messages queued so far remain queued and are displayed
    /// under the default policy on the next dequeue trigger.
    pub fn clear_slideup_delegate(&self) {
        self.runtime.slideups.clear_delegate();
    }

    /// Registers the presentation executor that actually puts slideups on screen. Without one,
    /// arriving messages accumulate in the queue.
    pub fn set_slideup_presenter(&self, presenter: impl SlideupPresenter + 'static) {
        self.runtime.slideups.set_presenter(Arc::new(presenter));
    }

    /// If there are slideups in the queue, attempt to display one. Normally called some time
    /// after the delegate asked for queueing.
    pub fn display_next_available_slideup(&self) {
        self.runtime.slideups.display_next();
    }

    /// The current state of the slideup display slot.
    pub fn display_state(&self) -> DisplayState {
        self.runtime.slideups.display_state()
    }

    /// The number of slideups queued for later display.
    pub fn queued_slideup_count(&self) -> usize {
        self.runtime.slideups.pending_count()
    }

    /// Tell the runtime the app became active again. Reopens a session if none is open and
    /// gives queued slideups a chance to display.
    pub fn app_entered_foreground(&self) {
        if self.runtime.session.current().is_none() {
            let user = self.runtime.identity.current_user();
            self.enqueue_all(self.runtime.session.open(user));
        }
        self.runtime.slideups.app_entered_foreground();
    }

    /// Tell the runtime the app is moving to the background. The session closes and, under the
    /// automatic policies, pending data is flushed while the process still can.
    pub fn app_entered_background(&self) {
        if let Some(summary) = self.runtime.session.close() {
            self.enqueue(summary);
        }
        if self.runtime.policy.current() != ProcessingPolicy::Manual {
            dispatcher::flush_and_process(&self.runtime, FlushScope::All);
        }
    }

    /// Tell the runtime the keyboard came up; slideup display is suspended until it hides.
    pub fn keyboard_did_show(&self) {
        self.runtime.slideups.keyboard_did_show();
    }

    /// Tell the runtime the keyboard went away.
    pub fn keyboard_did_hide(&self) {
        self.runtime.slideups.keyboard_did_hide();
    }

    /// Tell the runtime a feed view opened; slideup display is suspended while it is up.
    pub fn feed_view_opened(&self) {
        self.runtime.slideups.feed_view_opened();
    }

    /// Tell the runtime a feed view closed. This is a dequeue trigger for queued slideups.
    pub fn feed_view_closed(&self) {
        self.runtime.slideups.feed_view_closed();
    }

    /// Tell the runtime the displayed slideup was dismissed.
    pub fn slideup_dismissed(&self) {
        self.runtime.slideups.slideup_dismissed();
    }

    /// Tell the runtime the displayed slideup was tapped. The delegate's tap callback runs if
    /// one is set; otherwise the default action opens the feed view.
    pub fn slideup_tapped(&self) {
        self.runtime.slideups.slideup_tapped();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Condvar, Mutex};
    use std::time::{Duration, Instant};

    use super::*;
    use crate::dispatcher::CancelToken;
    use crate::transport::{CardUpdate, FeedUpdate, ServerResponse, UserBatch};

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !condition() {
            assert!(
                Instant::now() < deadline,
                "condition not reached within the deadline"
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    /// Captures submitted batches and answers with a canned response.
    struct RecordingExecutor {
        batches: Arc<Mutex<Vec<UserBatch>>>,
        response: ServerResponse,
    }

    impl RecordingExecutor {
        fn new() -> (RecordingExecutor, Arc<Mutex<Vec<UserBatch>>>) {
            RecordingExecutor::with_response(ServerResponse::default())
        }

        fn with_response(
            response: ServerResponse,
        ) -> (RecordingExecutor, Arc<Mutex<Vec<UserBatch>>>) {
            let batches = Arc::new(Mutex::new(Vec::new()));
            (
                RecordingExecutor {
                    batches: Arc::clone(&batches),
                    response,
                },
                batches,
            )
        }
    }

    impl RequestExecutor for RecordingExecutor {
        fn execute(&self, batch: &UserBatch, _cancel: &CancelToken) -> crate::Result<ServerResponse> {
            self.batches.lock().unwrap().push(batch.clone());
            Ok(self.response.clone())
        }
    }

    /// Blocks every submission on a gate so tests can hold requests in flight.
    #[derive(Clone)]
    struct BlockingExecutor {
        calls: Arc<Mutex<Vec<UserBatch>>>,
        gate: Arc<(Mutex<bool>, Condvar)>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
    }

    impl BlockingExecutor {
        fn new() -> BlockingExecutor {
            BlockingExecutor {
                calls: Arc::new(Mutex::new(Vec::new())),
                gate: Arc::new((Mutex::new(false), Condvar::new())),
                active: Arc::new(AtomicUsize::new(0)),
                max_active: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn release(&self) {
            let (lock, cvar) = &*self.gate;
            *lock.lock().unwrap() = true;
            cvar.notify_all();
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl RequestExecutor for BlockingExecutor {
        fn execute(&self, batch: &UserBatch, _cancel: &CancelToken) -> crate::Result<ServerResponse> {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.calls.lock().unwrap().push(batch.clone());

            let (lock, cvar) = &*self.gate;
            let mut open = lock.lock().unwrap();
            while !*open {
                open = cvar.wait(open).unwrap();
            }
            drop(open);

            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(ServerResponse::default())
        }
    }

    fn manual_client(executor: impl RequestExecutor + 'static) -> Client {
        ClientConfig::from_api_key("test-key")
            .request_processing_policy(ProcessingPolicy::Manual)
            .request_executor(executor)
            .to_client()
    }

    #[test]
    fn startup_refreshes_the_feed_for_the_anonymous_user() {
        let (executor, batches) = RecordingExecutor::new();
        let _client = ClientConfig::from_api_key("test-key")
            .request_executor(executor)
            .to_client();

        wait_until(|| batches.lock().unwrap().len() == 1);
        let batches = batches.lock().unwrap();
        assert_eq!(batches[0].records.len(), 1);
        assert_eq!(batches[0].records[0].kind(), RequestKind::FeedRefresh);
        assert!(batches[0].user.as_str().starts_with("anon-"));
    }

    #[test]
    fn manual_policy_defers_until_an_explicit_flush() {
        let (executor, batches) = RecordingExecutor::new();
        let client = manual_client(executor);

        std::thread::sleep(Duration::from_millis(50));
        assert!(batches.lock().unwrap().is_empty());
        assert_eq!(client.runtime.queue.len(), 1);

        client.flush_and_process_request_queue();
        wait_until(|| batches.lock().unwrap().len() == 1);
        wait_until(|| client.runtime.queue.len() == 0);
    }

    #[test]
    fn user_facing_enqueues_flush_immediately_but_analytics_wait() {
        let (executor, batches) = RecordingExecutor::new();
        let client = ClientConfig::from_api_key("test-key")
            .request_processing_policy(ProcessingPolicy::AutomaticExceptDataFlush)
            .request_executor(executor)
            .to_client();

        wait_until(|| batches.lock().unwrap().len() == 1);

        client.log_custom_event("level_up").unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(batches.lock().unwrap().len(), 1);
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &client.current_user()));

        client.register_push_token("token");
        wait_until(|| batches.lock().unwrap().len() == 2);
        let submitted = batches.lock().unwrap();
        assert_eq!(submitted[1].records.len(), 1);
        assert_eq!(
            submitted[1].records[0].kind(),
            RequestKind::PushTokenRegister
        );
        // The analytics record stayed behind.
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &client.current_user()));
    }

    #[test]
    fn change_user_merges_anonymous_history_exactly_once() {
        let (executor, _batches) = RecordingExecutor::new();
        let client = manual_client(executor);
        let anonymous = client.current_user();

        client.log_custom_event("before_login").unwrap();
        client.change_user("alice").unwrap();
        client.change_user("alice").unwrap();

        let keys = client.runtime.queue.snapshot_keys();
        assert_eq!(keys.len(), 3);
        assert!(keys.iter().all(|(_, user)| user.as_str() == "alice"));
        assert_eq!(
            keys.iter()
                .filter(|(kind, _)| *kind == RequestKind::FeedRefresh)
                .count(),
            1
        );
        assert!(!client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &anonymous));
        assert!(matches!(client.identity(), Identity::Identified(_)));
    }

    #[test]
    fn second_identity_change_does_not_resurrect_prior_history() {
        let (executor, _batches) = RecordingExecutor::new();
        let client = manual_client(executor);

        client.log_custom_event("before_login").unwrap();
        client.change_user("alice").unwrap();
        client.change_user("bob").unwrap();

        // Alice keeps the merged anonymous analytics; bob starts fresh.
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &"alice".into()));
        assert!(!client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &"bob".into()));
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::FeedRefresh, &"bob".into()));
    }

    #[test]
    fn invalid_purchases_never_enter_the_queue() {
        let (executor, _batches) = RecordingExecutor::new();
        let client = manual_client(executor);
        let before = client.runtime.queue.len();

        assert!(matches!(
            client.log_purchase("sku-1", "BTC", 9.99),
            Err(Error::UnsupportedCurrency(_))
        ));
        assert_eq!(client.runtime.queue.len(), before);

        client.log_purchase("sku-1", "usd", 9.999).unwrap();
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::DataFlush, &client.current_user()));
    }

    #[test]
    fn concurrent_flushes_defer_rather_than_double_submit() {
        let executor = BlockingExecutor::new();
        let handle = executor.clone();
        let client = manual_client(executor);

        client.flush_and_process_request_queue();
        wait_until(|| handle.call_count() == 1);

        // More work arrives and another flush is requested while the first submission is still
        // on the wire.
        client.log_custom_event("mid_flight").unwrap();
        client.flush_and_process_request_queue();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(handle.call_count(), 1);

        handle.release();
        wait_until(|| handle.call_count() == 2);
        assert_eq!(handle.max_active.load(Ordering::SeqCst), 1);
        wait_until(|| client.runtime.queue.len() == 0);
    }

    #[test]
    fn shutdown_mid_flight_keeps_unconfirmed_records_and_forces_manual() {
        let executor = BlockingExecutor::new();
        let handle = executor.clone();
        let client = ClientConfig::from_api_key("test-key")
            .request_executor(executor)
            .to_client();

        // The startup feed refresh is now held in flight by the gate.
        wait_until(|| handle.call_count() == 1);
        assert_eq!(client.runtime.queue.len(), 0);

        client.shutdown_server_communication();
        assert_eq!(
            client.request_processing_policy(),
            ProcessingPolicy::Manual
        );

        handle.release();
        wait_until(|| client.runtime.queue.len() == 1);
        wait_until(|| client.runtime.queue.in_flight_count() == 0);
        let keys = client.runtime.queue.snapshot_keys();
        assert_eq!(keys[0].0, RequestKind::FeedRefresh);

        // Idempotent: nothing in flight, nothing changes.
        client.shutdown_server_communication();
        assert_eq!(client.runtime.queue.len(), 1);
    }

    #[test]
    fn policy_round_trip_resets_but_does_not_duplicate_the_timer() {
        let (executor, _batches) = RecordingExecutor::new();
        let client = manual_client(executor);
        assert!(!client.runtime.policy.timer_is_running());
        assert_eq!(client.runtime.policy.timer_generation(), 0);

        client.set_request_processing_policy(ProcessingPolicy::Automatic);
        assert!(client.runtime.policy.timer_is_running());
        assert_eq!(client.runtime.policy.timer_generation(), 1);

        // Same value again: no-op, the timer is not reset.
        client.set_request_processing_policy(ProcessingPolicy::Automatic);
        assert_eq!(client.runtime.policy.timer_generation(), 1);

        client.set_request_processing_policy(ProcessingPolicy::Manual);
        assert!(!client.runtime.policy.timer_is_running());

        client.set_request_processing_policy(ProcessingPolicy::Automatic);
        assert_eq!(client.runtime.policy.timer_generation(), 2);
    }

    #[test]
    fn the_flush_timer_drains_analytics_periodically() {
        let (executor, batches) = RecordingExecutor::new();
        let mut config = ClientConfig::from_api_key("test-key").request_executor(executor);
        // Below the public minimum on purpose; tests need a fast timer.
        config.flush_interval = Duration::from_millis(50);
        let client = config.to_client();

        wait_until(|| batches.lock().unwrap().len() == 1);
        client.log_custom_event("tick").unwrap();

        wait_until(|| {
            batches
                .lock()
                .unwrap()
                .iter()
                .any(|batch| batch.records.iter().any(|r| r.kind() == RequestKind::DataFlush))
        });
    }

    #[test]
    fn responses_feed_the_card_counters_and_slideup_queue() {
        let response = ServerResponse {
            feed: Some(FeedUpdate {
                cards: vec![CardUpdate { id: "a".into() }, CardUpdate { id: "b".into() }],
            }),
            slideups: vec!["welcome".into()],
        };
        let (executor, _batches) = RecordingExecutor::with_response(response);
        let client = manual_client(executor);

        let refreshes = Arc::new(AtomicUsize::new(0));
        client.subscribe_feed_updates({
            let refreshes = Arc::clone(&refreshes);
            move || {
                refreshes.fetch_add(1, Ordering::SeqCst);
            }
        });

        client.flush_and_process_request_queue();
        wait_until(|| refreshes.load(Ordering::SeqCst) == 1);
        assert_eq!(client.card_count(), 2);
        assert_eq!(client.unread_card_count(), 2);

        client.record_card_impression("a");
        client.record_card_impression("a");
        assert_eq!(client.unread_card_count(), 1);

        // No presenter is registered, so the slideup fell back to the queue.
        wait_until(|| client.queued_slideup_count() == 1);
        assert_eq!(client.display_state(), DisplayState::Idle);
    }

    #[test]
    fn backgrounding_closes_the_session_and_foreground_reopens_one() {
        let (executor, _batches) = RecordingExecutor::new();
        let client = manual_client(executor);
        assert!(client.current_session().is_some());

        client.app_entered_background();
        assert!(client.current_session().is_none());
        assert!(client
            .runtime
            .queue
            .contains(RequestKind::SessionEnd, &client.current_user()));

        client.app_entered_foreground();
        assert!(client.current_session().is_some());
    }
}
