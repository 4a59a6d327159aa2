//! Typed, mergeable units of outbound work.
//!
//! A [`RequestRecord`] is what flows through the request queue. Records are immutable once
//! enqueued, except that re-enqueueing the same merge key (kind + owning user) replaces the queued
//! payload. The wire encoding of individual payloads is owned by the transport layer; here they
//! are just typed data.

use chrono::{DateTime, Utc};
use derive_more::{From, Into};
use serde::Serialize;

use crate::{Error, Result, Str};

/// Identifies a user profile on this device. Either a host-assigned id or the device-generated
/// anonymous id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, From, Into)]
#[serde(transparent)]
pub struct UserId(Str);

impl UserId {
    /// The id as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> UserId {
        UserId(value.into())
    }
}

impl From<String> for UserId {
    fn from(value: String) -> UserId {
        UserId(value.into())
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Social networks recognized by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SocialNetwork {
    Facebook,
    Twitter,
}

/// A single behavioral event awaiting delivery inside a `DataFlush` record.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalyticsEvent {
    /// A host-defined counter-style event.
    Custom {
        name: Str,
        timestamp: DateTime<Utc>,
    },
    /// An in-app purchase.
    Purchase {
        product_id: Str,
        /// ISO-4217 code, validated against [`SUPPORTED_CURRENCIES`].
        currency: Str,
        /// Base units depend on the currency; at most two digits after the decimal point.
        price: f64,
        timestamp: DateTime<Utc>,
    },
    /// The user shared something to a social network.
    SocialShare {
        network: SocialNetwork,
        timestamp: DateTime<Utc>,
    },
}

/// The kind of a request record. Together with the owning user it forms the merge key: the queue
/// holds at most one record per (kind, user) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    DataFlush,
    FeedRefresh,
    FeedbackPost,
    PushTokenRegister,
    SessionEnd,
}

impl RequestKind {
    /// User-facing kinds serve data the user is waiting on and are flush-eligible immediately on
    /// enqueue under the automatic policies. The analytics kinds wait for the flush timer or an
    /// explicit flush.
    pub fn is_user_facing(self) -> bool {
        matches!(
            self,
            RequestKind::FeedRefresh | RequestKind::FeedbackPost | RequestKind::PushTokenRegister
        )
    }
}

/// Payload of a request record, one variant per [`RequestKind`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    /// Accumulated analytics events for the owning user.
    DataFlush { events: Vec<AnalyticsEvent> },
    /// Ask the server for the owning user's current feed, slideups and related data.
    FeedRefresh,
    /// A feedback message posted by the user.
    FeedbackPost {
        message: Str,
        reply_to: Option<Str>,
        is_bug: bool,
    },
    /// Associate the device push token with the owning user.
    PushTokenRegister { token: Str },
    /// Summary of a closed session.
    SessionEnd {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },
}

impl RequestPayload {
    /// The kind this payload belongs to.
    pub fn kind(&self) -> RequestKind {
        match self {
            RequestPayload::DataFlush { .. } => RequestKind::DataFlush,
            RequestPayload::FeedRefresh => RequestKind::FeedRefresh,
            RequestPayload::FeedbackPost { .. } => RequestKind::FeedbackPost,
            RequestPayload::PushTokenRegister { .. } => RequestKind::PushTokenRegister,
            RequestPayload::SessionEnd { .. } => RequestKind::SessionEnd,
        }
    }
}

/// A typed, mergeable unit of outbound work.
///
/// The kind is derived from the payload, so the two can never disagree.
#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    /// The user this request is attributed to.
    pub user: UserId,
    pub payload: RequestPayload,
}

impl RequestRecord {
    pub fn new(user: UserId, payload: RequestPayload) -> RequestRecord {
        RequestRecord { user, payload }
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    /// Whether `other` would merge into this record (same kind, same owning user).
    pub(crate) fn same_key(&self, kind: RequestKind, user: &UserId) -> bool {
        self.kind() == kind && self.user == *user
    }
}

/// Currency codes accepted by `log_purchase`. Anything else results in a logged warning and no
/// other action taken by the SDK.
pub const SUPPORTED_CURRENCIES: [&str; 24] = [
    "USD", "CAD", "EUR", "GBP", "JPY", "AUD", "CHF", "NOK", "MXN", "NZD", "CNY", "RUB", "TRY",
    "INR", "IDR", "ILS", "SAR", "ZAR", "AED", "SEK", "HKD", "SPD", "DKK", "TWD",
];

/// Checks `code` against [`SUPPORTED_CURRENCIES`], normalizing case.
pub(crate) fn validate_currency(code: &str) -> Result<Str> {
    let normalized = code.to_ascii_uppercase();
    if SUPPORTED_CURRENCIES.contains(&normalized.as_str()) {
        Ok(normalized.into())
    } else {
        Err(Error::UnsupportedCurrency(code.into()))
    }
}

/// Prices carry at most two digits after the decimal point.
pub(crate) fn round_price(price: f64) -> f64 {
    (price * 100.0).round() / 100.0
}
