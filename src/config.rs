//! Client configuration and the client factory.

use crate::clock::{Clock, SystemClock};
use crate::crypto::{CryptoProvider, NoKeys};
use crate::error::Result;
use crate::client::Client;
use crate::transport::Transport;
use crate::types::{ClientInfo, SerialFormat};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const MIN_REQUEST_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(3600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub const MIN_OFFLINE_TIMEOUT: Duration = Duration::from_secs(60);
pub const MAX_OFFLINE_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_OFFLINE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

pub const MIN_MAX_REQUESTS: usize = 1;
pub const MAX_MAX_REQUESTS: usize = 100;
pub const DEFAULT_MAX_REQUESTS: usize = 20;

/// App scope used when none is configured.
pub const LEGACY_APP_SCOPE: &str = "Legacy";

/// How the client escalates once the offline budget is exhausted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum CoreMode {
    /// Escalate to Faulted. Subsequent calls fail fast.
    #[default]
    Standard,
    /// Escalate to Offline and keep accepting retries.
    Tolerant,
}

/// Client configuration. Held in memory for the client's lifetime.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Deadline applied to each request from submission.
    /// Clamped to [1s, 3600s]. Default: 30s
    pub request_timeout: Duration,

    /// How long the client may stay disconnected before escalating.
    /// Clamped to [1min, 60min]. Default: 15min
    pub offline_timeout: Duration,

    /// Queued plus pending requests allowed before `enqueue` blocks.
    /// Clamped to [1, 100]. Default: 20
    pub max_outstanding_requests: usize,

    /// Lifetime given to items that set neither lifetime nor expiry.
    pub default_lifetime: Duration,

    /// App scopes used for queries and subscriptions.
    pub default_app_scopes: Vec<String>,

    /// Serial format for items that leave theirs undefined.
    pub default_serial_format: SerialFormat,

    /// Trace every request at debug level.
    pub debug_requests: bool,

    pub core_mode: CoreMode,

    pub heartbeat_enabled: bool,
    pub heartbeat_interval: Duration,
    pub housekeeping_interval: Duration,

    /// Upper bound on waiting for each dispatch queue to drain at disposal.
    pub drain_timeout: Duration,

    pub client_info: ClientInfo,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            offline_timeout: DEFAULT_OFFLINE_TIMEOUT,
            max_outstanding_requests: DEFAULT_MAX_REQUESTS,
            default_lifetime: Duration::MAX,
            default_app_scopes: vec![LEGACY_APP_SCOPE.to_string()],
            default_serial_format: SerialFormat::Undefined,
            debug_requests: false,
            core_mode: CoreMode::Standard,
            heartbeat_enabled: true,
            heartbeat_interval: Duration::from_secs(60),
            housekeeping_interval: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(30),
            client_info: ClientInfo::default(),
        }
    }
}

fn clamp_duration(value: Duration, min: Duration, max: Duration, name: &str) -> Duration {
    let clamped = value.clamp(min, max);
    if clamped != value {
        debug!(?value, ?clamped, setting = name, "setting clamped to range");
    }
    clamped
}

impl ClientConfig {
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_offline_timeout(mut self, timeout: Duration) -> Self {
        self.offline_timeout = timeout;
        self
    }

    pub fn with_max_outstanding_requests(mut self, max: usize) -> Self {
        self.max_outstanding_requests = max;
        self
    }

    pub fn with_default_lifetime(mut self, lifetime: Duration) -> Self {
        self.default_lifetime = lifetime;
        self
    }

    pub fn with_app_scopes(mut self, scopes: Vec<String>) -> Self {
        self.default_app_scopes = scopes;
        self
    }

    pub fn with_debug_requests(mut self, on: bool) -> Self {
        self.debug_requests = on;
        self
    }

    pub fn with_core_mode(mut self, mode: CoreMode) -> Self {
        self.core_mode = mode;
        self
    }

    pub fn with_heartbeat(mut self, enabled: bool, interval: Duration) -> Self {
        self.heartbeat_enabled = enabled;
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_housekeeping_interval(mut self, interval: Duration) -> Self {
        self.housekeeping_interval = interval;
        self
    }

    pub fn with_client_info(mut self, info: ClientInfo) -> Self {
        self.client_info = info;
        self
    }

    /// Clamp every bounded setting into range and restore defaults for
    /// empty ones.
    pub fn normalized(mut self) -> Self {
        self.request_timeout = clamp_duration(
            self.request_timeout,
            MIN_REQUEST_TIMEOUT,
            MAX_REQUEST_TIMEOUT,
            "request_timeout",
        );
        self.offline_timeout = clamp_duration(
            self.offline_timeout,
            MIN_OFFLINE_TIMEOUT,
            MAX_OFFLINE_TIMEOUT,
            "offline_timeout",
        );
        self.max_outstanding_requests = self
            .max_outstanding_requests
            .clamp(MIN_MAX_REQUESTS, MAX_MAX_REQUESTS);
        if self.default_app_scopes.is_empty() {
            self.default_app_scopes = vec![LEGACY_APP_SCOPE.to_string()];
        }
        if self.housekeeping_interval.is_zero() {
            self.housekeeping_interval = Duration::from_millis(100);
        }
        if self.heartbeat_interval.is_zero() {
            self.heartbeat_enabled = false;
        }
        self
    }
}

/// Factory-wide settings applied to every client it creates.
#[derive(Clone, Debug, Default)]
struct FactoryState {
    cache_enabled: bool,
    settings_cache: HashMap<String, ClientConfig>,
    env: Option<String>,
    request_timeout: Option<Duration>,
    offline_timeout: Option<Duration>,
    core_mode: CoreMode,
    debug_requests: bool,
}

/// Creates clients, caching the resolved configuration per environment.
pub struct ClientFactory {
    base: ClientConfig,
    state: Mutex<FactoryState>,
    crypto: Arc<dyn CryptoProvider>,
    clock: Arc<dyn Clock>,
}

impl ClientFactory {
    pub fn new(base: ClientConfig) -> Self {
        Self {
            base,
            state: Mutex::new(FactoryState {
                cache_enabled: true,
                ..Default::default()
            }),
            crypto: Arc::new(NoKeys),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_crypto(mut self, crypto: Arc<dyn CryptoProvider>) -> Self {
        self.crypto = crypto;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn set_env(&self, env: impl Into<String>) -> &Self {
        let mut state = self.state.lock();
        state.env = Some(env.into());
        self
    }

    pub fn set_request_timeout(&self, timeout: Duration) -> &Self {
        let mut state = self.state.lock();
        state.request_timeout = Some(timeout);
        state.settings_cache.clear();
        self
    }

    pub fn set_offline_timeout(&self, timeout: Duration) -> &Self {
        let mut state = self.state.lock();
        state.offline_timeout = Some(timeout);
        state.settings_cache.clear();
        self
    }

    pub fn set_core_mode(&self, mode: CoreMode) -> &Self {
        let mut state = self.state.lock();
        state.core_mode = mode;
        state.settings_cache.clear();
        self
    }

    pub fn set_debug_requests(&self, on: bool) -> &Self {
        let mut state = self.state.lock();
        state.debug_requests = on;
        state.settings_cache.clear();
        self
    }

    /// Disabling the cache also empties it.
    pub fn set_cache_enabled(&self, enabled: bool) -> &Self {
        let mut state = self.state.lock();
        state.cache_enabled = enabled;
        if !enabled {
            state.settings_cache.clear();
        }
        self
    }

    pub fn cached_settings_count(&self) -> usize {
        self.state.lock().settings_cache.len()
    }

    /// Resolve the configuration for the current environment.
    pub fn resolve_config(&self) -> ClientConfig {
        let mut state = self.state.lock();
        let env = state
            .env
            .clone()
            .unwrap_or_else(|| self.base.client_info.env.clone());

        if state.cache_enabled {
            if let Some(config) = state.settings_cache.get(&env) {
                return config.clone();
            }
        }

        let mut config = self.base.clone();
        config.client_info.env = env.clone();
        if let Some(t) = state.request_timeout {
            config.request_timeout = t;
        }
        if let Some(t) = state.offline_timeout {
            config.offline_timeout = t;
        }
        config.core_mode = state.core_mode;
        config.debug_requests = state.debug_requests || config.debug_requests;
        let config = config.normalized();

        if state.cache_enabled {
            state.settings_cache.insert(env, config.clone());
        }
        config
    }

    /// Create a client bound to `transport`.
    pub fn create_client(&self, transport: Arc<dyn Transport>) -> Result<Client> {
        let config = self.resolve_config();
        Client::with_parts(config, transport, Arc::clone(&self.crypto), Arc::clone(&self.clock))
    }
}
