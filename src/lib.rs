//! `beacon_core` is the client-side runtime of the Beacon engagement SDK: it tracks user
//! identity, batches telemetry and behavioral events, and delivers short-lived in-app messages
//! ("slideups") without disrupting the host UI.
//!
//! # Overview
//!
//! [`Client`] is the heart of the SDK. It is an explicitly constructed context object with
//! process-wide lifetime, built from a [`ClientConfig`], and every host-facing operation is a
//! thin entry point into one of the components behind it.
//!
//! Host calls produce [`RequestRecord`]s, typed mergeable units of outbound work. The request
//! queue holds at most one record per (kind, user) pair: re-enqueueing a key replaces the queued
//! payload instead of appending, so the SDK combines requests to minimize their number and
//! combined payload. The [`ProcessingPolicy`] decides when the queue drains: under the default
//! automatic policy, user-facing requests (feed refreshes, feedback posts) are submitted the
//! moment they are enqueued and analytics data is flushed periodically by a background timer.
//! Submission is asynchronous and per-user: at most one submission per user is in flight at any
//! instant, and flush requests that arrive mid-flight are deferred, never dropped.
//!
//! Sessions open when the client starts (or the user changes) and close on user change, app
//! backgrounding, or shutdown; their summaries flow through the same queue. Identity starts
//! anonymous with a device-generated id; the first identification of a never-seen user carries
//! the anonymous history over, every later change starts from a fresh profile.
//!
//! Arriving slideups flow into a delivery scheduler that consults the host's
//! [`SlideupDelegate`] and dispatches display attempts onto the host's [`SlideupPresenter`].
//! Messages that cannot be displayed are queued in order and drained opportunistically.
//!
//! # Error handling
//!
//! Errors are represented by the [`Error`] enum. The SDK never panics for network or validation
//! failures: invalid calls are rejected locally with a logged diagnostic, and transient network
//! errors only mean the affected records stay queued for a later flush.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate for diagnostics, under the
//! `beacon` target. Install a `log`-compatible logger for visibility into SDK operations.
//!
//! # Examples
//!
//! ```no_run
//! # use beacon_core::ClientConfig;
//! let client = ClientConfig::from_api_key("api-key").to_client();
//!
//! client.log_custom_event("watched_video").unwrap();
//! client.log_purchase("com.example.pro", "USD", 9.99).unwrap();
//! client.change_user("user-123").unwrap();
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod config;
mod dispatcher;
mod error;
mod feed;
mod identity;
mod policy;
mod request_queue;
mod requests;
mod session;
mod slideup;
mod str;
mod transport;

pub use crate::str::Str;
pub use client::Client;
pub use config::ClientConfig;
pub use dispatcher::CancelToken;
pub use error::{Error, Result};
pub use feed::FeedObserverId;
pub use identity::Identity;
pub use policy::ProcessingPolicy;
pub use requests::{
    AnalyticsEvent, RequestKind, RequestPayload, RequestRecord, SocialNetwork, UserId,
    SUPPORTED_CURRENCIES,
};
pub use session::Session;
pub use slideup::{
    DisplayState, SlideupDelegate, SlideupDisposition, SlideupMessage, SlideupPresenter,
    SuspendReason,
};
pub use transport::{
    CardUpdate, FeedUpdate, HttpRequestExecutor, RequestExecutor, ServerResponse, UserBatch,
};
