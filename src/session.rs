use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::auth::{self, Credentials};
use crate::error::VkError;
use crate::stream::listener::ListenerSlot;
use crate::stream::ListenerState;

/// Production bootstrap method returning the stream endpoint and key.
pub const BOOTSTRAP_URL: &str = "https://api.vk.com/method/streaming.getServerUrl";
/// API version sent with the bootstrap request.
pub const API_VERSION: &str = "5.74";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClientDefaults;

impl ClientDefaults {
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
    pub const STREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
    pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
    pub const EVENT_BUFFER: usize = 1024;
}

/// Transport configuration shared by the bootstrap, rules and stream calls.
#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Account API method used to resolve stream credentials.
    pub bootstrap_url: String,
    /// Account API version (`v` query parameter).
    pub api_version: String,
    /// Use plain `http`/`ws` schemes for the stream endpoint.
    pub local: bool,
    /// TCP connect timeout for HTTP calls.
    pub connect_timeout: Duration,
    /// Whole-request timeout for HTTP calls.
    pub request_timeout: Duration,
    /// Timeout for the websocket dial and upgrade.
    pub stream_connect_timeout: Duration,
    /// Ends the receive loop when no frame arrives for this long.
    ///
    /// Disabled by default; the service can stay silent for long periods when
    /// no rule matches.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on the close handshake when the loop exits.
    pub close_timeout: Duration,
    /// Capacity of the event handoff channel.
    pub event_buffer: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            bootstrap_url: BOOTSTRAP_URL.to_string(),
            api_version: API_VERSION.to_string(),
            local: false,
            connect_timeout: ClientDefaults::CONNECT_TIMEOUT,
            request_timeout: ClientDefaults::REQUEST_TIMEOUT,
            stream_connect_timeout: ClientDefaults::STREAM_CONNECT_TIMEOUT,
            idle_timeout: None,
            close_timeout: ClientDefaults::CLOSE_TIMEOUT,
            event_buffer: ClientDefaults::EVENT_BUFFER,
        }
    }
}

impl ClientOptions {
    /// Enables or disables local mode (`http`/`ws` instead of `https`/`wss`).
    pub fn with_local_mode(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Overrides the bootstrap method URL.
    pub fn with_bootstrap_url(mut self, url: impl Into<String>) -> Self {
        self.bootstrap_url = url.into().trim().to_string();
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = Some(idle_timeout);
        self
    }

    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    pub(crate) fn http_client(&self) -> Result<Client, VkError> {
        Client::builder()
            .no_proxy()
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()
            .map_err(VkError::Transport)
    }

    fn http_scheme(&self) -> &'static str {
        if self.local {
            "http"
        } else {
            "https"
        }
    }

    fn ws_scheme(&self) -> &'static str {
        if self.local {
            "ws"
        } else {
            "wss"
        }
    }
}

/// A session with the streaming service.
///
/// Holds the allocated endpoint and key, runs rule operations against them
/// and owns at most one receive loop at a time (see [`VkStream::start`]).
#[derive(Debug)]
pub struct VkStream {
    endpoint: String,
    key: SecretString,
    pub(crate) http: Client,
    pub(crate) options: ClientOptions,
    pub(crate) listener: Arc<Mutex<ListenerSlot>>,
}

impl VkStream {
    /// Creates a session from an already known endpoint and key.
    pub fn new(endpoint: impl Into<String>, key: SecretString) -> Result<Self, VkError> {
        Self::with_options(endpoint, key, ClientOptions::default())
    }

    pub fn with_options(
        endpoint: impl Into<String>,
        key: SecretString,
        options: ClientOptions,
    ) -> Result<Self, VkError> {
        let http = options.http_client()?;
        Self::from_parts(
            Credentials {
                endpoint: endpoint.into(),
                key,
            },
            http,
            options,
        )
    }

    /// Resolves credentials for `access_token` and creates a session.
    ///
    /// The token is the application's service token.
    pub async fn with_token(access_token: &SecretString) -> Result<Self, VkError> {
        Self::with_token_and_options(access_token, ClientOptions::default()).await
    }

    pub async fn with_token_and_options(
        access_token: &SecretString,
        options: ClientOptions,
    ) -> Result<Self, VkError> {
        let http = options.http_client()?;
        let credentials = auth::resolve_credentials(&http, &options, access_token).await?;
        Self::from_parts(credentials, http, options)
    }

    fn from_parts(
        credentials: Credentials,
        http: Client,
        options: ClientOptions,
    ) -> Result<Self, VkError> {
        let Credentials { endpoint, key } = credentials;
        let endpoint = endpoint.trim().trim_end_matches('/').to_string();
        if endpoint.is_empty() || key.expose_secret().is_empty() {
            return Err(VkError::IncompleteCredentials);
        }
        debug!(event = "session_created", endpoint = %endpoint);

        Ok(Self {
            endpoint,
            key,
            http,
            options,
            listener: Arc::new(Mutex::new(ListenerSlot::default())),
        })
    }

    /// Host of the allocated stream server.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Current receive loop lifecycle state.
    pub fn state(&self) -> ListenerState {
        self.lock_listener().state
    }

    pub fn is_listening(&self) -> bool {
        self.state() == ListenerState::Listening
    }

    pub(crate) fn rules_url(&self) -> Result<Url, VkError> {
        self.service_url(self.options.http_scheme(), "rules")
    }

    pub(crate) fn stream_url(&self) -> Result<Url, VkError> {
        self.service_url(self.options.ws_scheme(), "stream")
    }

    fn service_url(&self, scheme: &str, path: &str) -> Result<Url, VkError> {
        Url::parse_with_params(
            &format!("{scheme}://{}/{path}/", self.endpoint),
            &[("key", self.key.expose_secret().as_str())],
        )
        .map_err(|_| VkError::InvalidArgument("endpoint is not a valid host"))
    }

    pub(crate) fn lock_listener(&self) -> MutexGuard<'_, ListenerSlot> {
        lock_slot(&self.listener)
    }
}

pub(crate) fn lock_slot(slot: &Mutex<ListenerSlot>) -> MutexGuard<'_, ListenerSlot> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Drop for VkStream {
    fn drop(&mut self) {
        self.lock_listener().signal_stop();
    }
}
