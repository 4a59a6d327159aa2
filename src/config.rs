//! Startup configuration for [`Client`](crate::Client).

use std::sync::Arc;
use std::time::Duration;

use crate::policy::ProcessingPolicy;
use crate::transport::RequestExecutor;

/// Configuration for [`Client`](crate::Client).
///
/// # Examples
/// ```no_run
/// # use beacon_core::{ClientConfig, ProcessingPolicy};
/// # use std::time::Duration;
/// let client = ClientConfig::from_api_key("api-key")
///     .request_processing_policy(ProcessingPolicy::AutomaticExceptDataFlush)
///     .flush_interval(Duration::from_secs(30))
///     .to_client();
/// ```
pub struct ClientConfig {
    pub(crate) api_key: String,
    pub(crate) base_url: String,
    pub(crate) request_processing_policy: ProcessingPolicy,
    pub(crate) flush_interval: Duration,
    pub(crate) flush_feedback_when_manual: bool,
    pub(crate) executor: Option<Arc<dyn RequestExecutor>>,
}

impl ClientConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = crate::transport::DEFAULT_BASE_URL;

    /// Default interval between automatic data flushes.
    pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(10);

    /// Flush intervals must be strictly greater than this.
    pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

    /// Create a default configuration using the specified API key.
    ///
    /// ```
    /// # use beacon_core::ClientConfig;
    /// ClientConfig::from_api_key("api-key");
    /// ```
    pub fn from_api_key(api_key: impl Into<String>) -> ClientConfig {
        ClientConfig {
            api_key: api_key.into(),
            base_url: ClientConfig::DEFAULT_BASE_URL.to_owned(),
            request_processing_policy: ProcessingPolicy::default(),
            flush_interval: ClientConfig::DEFAULT_FLUSH_INTERVAL,
            flush_feedback_when_manual: false,
            executor: None,
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn base_url(mut self, base_url: impl Into<String>) -> ClientConfig {
        self.base_url = base_url.into();
        self
    }

    /// Set the initial request processing policy. It can also be changed at runtime through
    /// [`Client::set_request_processing_policy`](crate::Client::set_request_processing_policy).
    pub fn request_processing_policy(mut self, policy: ProcessingPolicy) -> ClientConfig {
        self.request_processing_policy = policy;
        self
    }

    /// Set the interval between automatic data flushes. Only has an effect under
    /// [`ProcessingPolicy::Automatic`].
    ///
    /// Intervals must be greater than one second. An out-of-range value is a configuration
    /// error: it is logged and the previously configured value is kept.
    pub fn flush_interval(mut self, interval: Duration) -> ClientConfig {
        if interval <= ClientConfig::MIN_FLUSH_INTERVAL {
            log::warn!(
                target: "beacon",
                "ignoring flush interval {:?}: must be greater than {:?}",
                interval,
                ClientConfig::MIN_FLUSH_INTERVAL
            );
        } else {
            self.flush_interval = interval;
        }
        self
    }

    /// Let feedback posts flush immediately even under [`ProcessingPolicy::Manual`]. Off by
    /// default: Manual defers all request kinds equally.
    pub fn flush_feedback_when_manual(mut self, enabled: bool) -> ClientConfig {
        self.flush_feedback_when_manual = enabled;
        self
    }

    /// Replace the network executor. Mainly useful for tests and for hosts with a custom
    /// transport.
    pub fn request_executor(mut self, executor: impl RequestExecutor + 'static) -> ClientConfig {
        self.executor = Some(Arc::new(executor));
        self
    }

    /// Create a new [`Client`](crate::Client) using this configuration.
    ///
    /// ```no_run
    /// # use beacon_core::{Client, ClientConfig};
    /// let client: Client = ClientConfig::from_api_key("api-key").to_client();
    /// ```
    pub fn to_client(self) -> crate::Client {
        crate::Client::new(self)
    }
}
