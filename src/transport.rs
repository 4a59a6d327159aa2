//! The network boundary: per-user batched submissions and the typed response they yield.
//!
//! [`RequestExecutor`] is the seam the rest of the runtime talks to. The default implementation
//! posts batches over HTTPS; hosts and tests can substitute their own transport.

use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use crate::dispatcher::CancelToken;
use crate::requests::{RequestRecord, UserId};
use crate::{Error, Result, Str};

/// All queued records for one user, submitted as a single network operation.
#[derive(Debug, Clone, Serialize)]
pub struct UserBatch {
    /// The user the records are attributed to.
    pub user: UserId,
    /// Records in their original queue order.
    pub records: Vec<RequestRecord>,
}

/// A feed card as delivered by the server. Rendering is the host's business; the runtime only
/// tracks identity and read state.
#[derive(Debug, Clone, Deserialize)]
pub struct CardUpdate {
    pub id: Str,
}

/// Replacement card set delivered by a feed refresh.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedUpdate {
    #[serde(default)]
    pub cards: Vec<CardUpdate>,
}

/// What the server returned for one submitted batch.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerResponse {
    /// Present when the submission refreshed the user's feed.
    #[serde(default)]
    pub feed: Option<FeedUpdate>,
    /// Newly delivered in-app messages, oldest first.
    #[serde(default)]
    pub slideups: Vec<Str>,
}

/// Executes one batched submission against the server.
///
/// Implementations must be safe to call from background threads and should honor `cancel`:
/// once it reports cancellation, giving up with [`Error::Cancelled`] lets the runtime requeue
/// the batch instead of waiting out the transfer.
pub trait RequestExecutor: Send + Sync {
    fn execute(&self, batch: &UserBatch, cancel: &CancelToken) -> Result<ServerResponse>;
}

pub(crate) const DEFAULT_BASE_URL: &str = "https://api.usebeacon.app";

const BATCH_ENDPOINT: &str = "/sdk/v1/batch";

/// Default executor: posts the serialized batch over HTTPS.
pub struct HttpRequestExecutor {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
}

impl HttpRequestExecutor {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> HttpRequestExecutor {
        HttpRequestExecutor {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

impl RequestExecutor for HttpRequestExecutor {
    fn execute(&self, batch: &UserBatch, cancel: &CancelToken) -> Result<ServerResponse> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let url = Url::parse_with_params(
            &format!("{}{}", self.base_url, BATCH_ENDPOINT),
            &[
                ("apiKey", &*self.api_key),
                ("sdkVersion", env!("CARGO_PKG_VERSION")),
            ],
        )
        .map_err(Error::InvalidBaseUrl)?;

        log::debug!(target: "beacon", "submitting {} requests for user {}", batch.records.len(), batch.user);
        let response = self.client.post(url).json(batch).send()?;

        let response = response.error_for_status().map_err(|err| {
            if err.status() == Some(StatusCode::UNAUTHORIZED) {
                log::warn!(target: "beacon", "client is not authorized. Check your API key");
                Error::Unauthorized
            } else {
                log::warn!(target: "beacon", "received non-200 response while submitting requests: {:?}", err);
                Error::from(err)
            }
        })?;

        let parsed = response.json()?;
        log::debug!(target: "beacon", "submission for user {} confirmed", batch.user);
        Ok(parsed)
    }
}
