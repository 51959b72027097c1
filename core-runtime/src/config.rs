//! # Core Configuration Module
//!
//! Provides configuration management for the ride tracking core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all necessary bridges and settings. It enforces fail-fast
//! validation so that a missing capability is reported at construction time
//! rather than on the first tracked ride.
//!
//! ## Required Dependencies
//!
//! - `HttpClient` - REST calls (fetch, create, update status, cancel)
//! - `SecureStore` - Source of the session bearer token
//! - `PushTransport` - Real-time ride-updates channel
//!
//! When the `desktop-shims` feature is enabled, desktop-ready defaults
//! (`ReqwestHttpClient`, `KeyringSecureStore`, `SocketIoTransport`) are injected
//! automatically for any bridge that was not provided.
//!
//! ## Optional Dependencies
//!
//! - `Clock` - Timestamp source (default: `SystemClock`)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CoreConfig, TrackingSettings};
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com")
//!     .tracking(TrackingSettings {
//!         driver_match_timeout: Duration::from_secs(120),
//!         ..TrackingSettings::default()
//!     })
//!     .build()?;
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // Panics: no API base URL
//! let config = CoreConfig::builder()
//!     .build()
//!     .expect("Should fail - missing api_base_url");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, HttpClient, PushTransport, SecureStore, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Namespace the ride-updates channel lives under.
pub const DEFAULT_PUSH_NAMESPACE: &str = "/ride-updates";

/// Secure store key the login flow persists the bearer token under.
pub const DEFAULT_TOKEN_KEY: &str = "auth_token";

// ============================================================================
// Tracking Settings
// ============================================================================

/// Timings and bounds for ride tracking.
///
/// Every duration is a parameter; hosts with several waiting screens (driver
/// match vs. trip completion) can run trackers with different settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSettings {
    /// Delay before the first reconnect attempt; doubles per attempt.
    ///
    /// Default: 1s
    pub reconnect_base_delay: Duration,

    /// Upper bound on a single reconnect delay.
    ///
    /// Default: 30s
    pub reconnect_max_delay: Duration,

    /// Reconnect attempts scheduled before the channel is abandoned.
    ///
    /// Default: 5
    pub max_reconnect_attempts: u32,

    /// Bounded wait for a driver to be assigned.
    ///
    /// Default: 5 minutes
    pub driver_match_timeout: Duration,

    /// How long the channel may stay unconnected before the one-shot
    /// reconciliation fetch runs.
    ///
    /// Default: 3s
    pub fallback_grace_period: Duration,

    /// Cancel the ride server-side when the match window expires.
    ///
    /// Default: false (observers decide what to do)
    pub cancel_on_match_timeout: bool,
}

impl Default for TrackingSettings {
    fn default() -> Self {
        Self {
            reconnect_base_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(30),
            max_reconnect_attempts: 5,
            driver_match_timeout: Duration::from_secs(5 * 60),
            fallback_grace_period: Duration::from_secs(3),
            cancel_on_match_timeout: false,
        }
    }
}

impl TrackingSettings {
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_driver_match_timeout(mut self, timeout: Duration) -> Self {
        self.driver_match_timeout = timeout;
        self
    }

    pub fn with_fallback_grace_period(mut self, grace: Duration) -> Self {
        self.fallback_grace_period = grace;
        self
    }

    pub fn with_cancel_on_match_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_match_timeout = cancel;
        self
    }

    /// Validates the settings.
    ///
    /// This checks:
    /// - At least one reconnect attempt is allowed
    /// - No duration is zero
    /// - The maximum reconnect delay is not below the base delay
    pub fn validate(&self) -> Result<()> {
        if self.max_reconnect_attempts == 0 {
            return Err(Error::InvalidSettings(
                "max_reconnect_attempts must be at least 1".to_string(),
            ));
        }

        let durations = [
            ("reconnect_base_delay", self.reconnect_base_delay),
            ("reconnect_max_delay", self.reconnect_max_delay),
            ("driver_match_timeout", self.driver_match_timeout),
            ("fallback_grace_period", self.fallback_grace_period),
        ];
        if let Some((name, _)) = durations.iter().find(|(_, d)| d.is_zero()) {
            return Err(Error::InvalidSettings(format!(
                "{} must be greater than zero",
                name
            )));
        }

        if self.reconnect_max_delay < self.reconnect_base_delay {
            return Err(Error::InvalidSettings(format!(
                "reconnect_max_delay ({:?}) is shorter than reconnect_base_delay ({:?})",
                self.reconnect_max_delay, self.reconnect_base_delay
            )));
        }

        Ok(())
    }
}

// ============================================================================
// Core Config
// ============================================================================

/// Core configuration for the ride tracking core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// REST API base URL (e.g. `https://api.example.com/api`)
    pub api_base_url: String,

    /// Push server base URL; defaults to the API origin
    pub push_url: String,

    /// Push namespace for ride updates
    pub push_namespace: String,

    /// Secure store key holding the bearer token
    pub token_key: String,

    pub http_client: Arc<dyn HttpClient>,
    pub secure_store: Arc<dyn SecureStore>,
    pub push_transport: Arc<dyn PushTransport>,
    pub clock: Arc<dyn Clock>,

    pub tracking: TrackingSettings,

    /// Diagnostics event bus capacity
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("api_base_url", &self.api_base_url)
            .field("push_url", &self.push_url)
            .field("push_namespace", &self.push_namespace)
            .field("token_key", &self.token_key)
            .field("http_client", &"HttpClient { ... }")
            .field("secure_store", &"SecureStore { ... }")
            .field("push_transport", &"PushTransport { ... }")
            .field("tracking", &self.tracking)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    pub fn validate(&self) -> Result<()> {
        validate_url("api_base_url", &self.api_base_url)?;
        validate_url("push_url", &self.push_url)?;

        if !self.push_namespace.starts_with('/') {
            return Err(Error::Config(format!(
                "Push namespace must start with '/': {}",
                self.push_namespace
            )));
        }

        if self.token_key.is_empty() {
            return Err(Error::Config("Token key cannot be empty".to_string()));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        self.tracking.validate()
    }
}

fn validate_url(field: &str, url: &str) -> Result<()> {
    if url.is_empty() {
        return Err(Error::Config(format!("{} cannot be empty", field)));
    }
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!(
            "{} must be an http(s) URL: {}",
            field, url
        )));
    }
    Ok(())
}

/// Scheme and authority of `url` (`https://host:port/api` -> `https://host:port`).
fn origin_of(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let Some(scheme_end) = trimmed.find("://") else {
        return trimmed.to_string();
    };
    let authority_start = scheme_end + 3;
    match trimmed[authority_start..].find('/') {
        Some(path_start) => trimmed[..authority_start + path_start].to_string(),
        None => trimmed.to_string(),
    }
}

// ============================================================================
// Platform defaults
// ============================================================================

#[cfg(not(feature = "desktop-shims"))]
fn capability_missing(capability: &str, purpose: &str, mobile: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required for {}. \
             Desktop: enable the 'desktop-shims' feature to use the default implementation. \
             Mobile: inject {}.",
            capability, purpose, mobile
        ),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Ok(Arc::new(bridge_desktop::ReqwestHttpClient::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client() -> Result<Arc<dyn HttpClient>> {
    Err(capability_missing(
        "HttpClient",
        "ride REST calls",
        "URLSession/OkHttp-backed clients",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Ok(Arc::new(bridge_desktop::KeyringSecureStore::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_secure_store() -> Result<Arc<dyn SecureStore>> {
    Err(capability_missing(
        "SecureStore",
        "credential persistence",
        "platform-native secure storage (Keychain/Keystore)",
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_push_transport() -> Result<Arc<dyn PushTransport>> {
    Ok(Arc::new(bridge_desktop::SocketIoTransport::new()))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_push_transport() -> Result<Arc<dyn PushTransport>> {
    Err(capability_missing(
        "PushTransport",
        "real-time ride updates",
        "a native Socket.IO client",
    ))
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for constructing [`CoreConfig`] instances.
///
/// Call [`build()`](CoreConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct CoreConfigBuilder {
    api_base_url: Option<String>,
    push_url: Option<String>,
    push_namespace: Option<String>,
    token_key: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    secure_store: Option<Arc<dyn SecureStore>>,
    push_transport: Option<Arc<dyn PushTransport>>,
    clock: Option<Arc<dyn Clock>>,
    tracking: Option<TrackingSettings>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the REST API base URL (required).
    ///
    /// # Examples
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder()
    ///     .api_base_url("https://api.example.com/api");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the push server URL.
    ///
    /// Default: origin of the API base URL
    pub fn push_url(mut self, url: impl Into<String>) -> Self {
        self.push_url = Some(url.into());
        self
    }

    /// Default: `/ride-updates`
    pub fn push_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.push_namespace = Some(namespace.into());
        self
    }

    /// Sets the secure store key of the session bearer token.
    ///
    /// Default: `auth_token`
    pub fn token_key(mut self, key: impl Into<String>) -> Self {
        self.token_key = Some(key.into());
        self
    }

    /// Sets the HTTP client implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) is used when the
    /// `desktop-shims` feature is enabled.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the secure store implementation.
    ///
    /// The secure store is only read: the tracking core looks up the bearer
    /// token the login flow persisted.
    pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
        self.secure_store = Some(store);
        self
    }

    /// Sets the push transport implementation.
    pub fn push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    /// Sets the clock used for snapshot timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the tracking timings and bounds.
    pub fn tracking(mut self, settings: TrackingSettings) -> Self {
        self.tracking = Some(settings);
        self
    }

    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns an error if:
    /// - The API base URL is missing or not http(s)
    /// - A required bridge is missing and no platform default is available
    /// - Tracking settings are invalid
    pub fn build(self) -> Result<CoreConfig> {
        let api_base_url = self
            .api_base_url
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::Config(
                    "API base URL is required. Use .api_base_url() to set it.".to_string(),
                )
            })?;

        let push_url = self
            .push_url
            .unwrap_or_else(|| origin_of(&api_base_url));

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client()?,
        };

        let secure_store = match self.secure_store {
            Some(store) => store,
            None => provide_default_secure_store()?,
        };

        let push_transport = match self.push_transport {
            Some(transport) => transport,
            None => provide_default_push_transport()?,
        };

        let config = CoreConfig {
            api_base_url,
            push_url,
            push_namespace: self
                .push_namespace
                .unwrap_or_else(|| DEFAULT_PUSH_NAMESPACE.to_string()),
            token_key: self
                .token_key
                .unwrap_or_else(|| DEFAULT_TOKEN_KEY.to_string()),
            http_client,
            secure_store,
            push_transport,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            tracking: self.tracking.unwrap_or_default(),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{
        BridgeError, HttpRequest, HttpResponse, PushChannel, PushChannelRequest,
    };

    struct MockHttpClient;

    #[async_trait]
    impl HttpClient for MockHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    struct MockSecureStore;

    #[async_trait]
    impl SecureStore for MockSecureStore {
        async fn set_secret(
            &self,
            _key: &str,
            _value: &[u8],
        ) -> std::result::Result<(), BridgeError> {
            Ok(())
        }

        async fn get_secret(
            &self,
            _key: &str,
        ) -> std::result::Result<Option<Vec<u8>>, BridgeError> {
            Ok(None)
        }

        async fn delete_secret(&self, _key: &str) -> std::result::Result<(), BridgeError> {
            Ok(())
        }
    }

    struct MockPushTransport;

    #[async_trait]
    impl PushTransport for MockPushTransport {
        async fn open(
            &self,
            _request: PushChannelRequest,
        ) -> std::result::Result<PushChannel, BridgeError> {
            Ok(PushChannel::pair().0)
        }
    }

    fn builder_with_bridges() -> CoreConfigBuilder {
        CoreConfig::builder()
            .api_base_url("https://api.example.com/api/")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .push_transport(Arc::new(MockPushTransport))
    }

    #[test]
    fn test_builder_requires_api_base_url() {
        let result = CoreConfig::builder()
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .push_transport(Arc::new(MockPushTransport))
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API base URL is required"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_push_transport() {
        let result = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .secure_store(Arc::new(MockSecureStore))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("PushTransport"));
        assert!(err_msg.contains("real-time ride updates"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_secure_store() {
        let result = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .http_client(Arc::new(MockHttpClient))
            .push_transport(Arc::new(MockPushTransport))
            .build();

        let err_msg = result.unwrap_err().to_string();
        assert!(err_msg.contains("SecureStore"));
        assert!(err_msg.contains("credential persistence"));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder()
            .api_base_url("https://api.example.com")
            .build()
            .expect("desktop defaults should succeed");

        assert_eq!(config.push_url, "https://api.example.com");
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder_with_bridges().build().unwrap();

        assert_eq!(config.api_base_url, "https://api.example.com/api");
        assert_eq!(config.push_url, "https://api.example.com");
        assert_eq!(config.push_namespace, "/ride-updates");
        assert_eq!(config.token_key, "auth_token");
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
        assert_eq!(config.tracking, TrackingSettings::default());
    }

    #[test]
    fn test_builder_overrides() {
        let config = builder_with_bridges()
            .push_url("https://push.example.com")
            .push_namespace("/rides-v2")
            .token_key("session")
            .event_buffer_size(8)
            .build()
            .unwrap();

        assert_eq!(config.push_url, "https://push.example.com");
        assert_eq!(config.push_namespace, "/rides-v2");
        assert_eq!(config.token_key, "session");
        assert_eq!(config.event_buffer_size, 8);
    }

    #[test]
    fn test_validate_rejects_bad_urls_and_namespace() {
        let err = builder_with_bridges()
            .push_url("ws://push.example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("push_url must be an http(s) URL"));

        let err = builder_with_bridges()
            .push_namespace("ride-updates")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must start with '/'"));
    }

    #[test]
    fn test_tracking_settings_defaults() {
        let settings = TrackingSettings::default();
        assert_eq!(settings.reconnect_base_delay, Duration::from_secs(1));
        assert_eq!(settings.reconnect_max_delay, Duration::from_secs(30));
        assert_eq!(settings.max_reconnect_attempts, 5);
        assert_eq!(settings.driver_match_timeout, Duration::from_secs(300));
        assert_eq!(settings.fallback_grace_period, Duration::from_secs(3));
        assert!(!settings.cancel_on_match_timeout);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_tracking_settings_validation() {
        let zero_attempts = TrackingSettings::default().with_max_reconnect_attempts(0);
        assert!(zero_attempts
            .validate()
            .unwrap_err()
            .to_string()
            .contains("max_reconnect_attempts"));

        let zero_grace = TrackingSettings::default().with_fallback_grace_period(Duration::ZERO);
        assert!(zero_grace
            .validate()
            .unwrap_err()
            .to_string()
            .contains("fallback_grace_period"));

        let inverted = TrackingSettings::default()
            .with_reconnect_delays(Duration::from_secs(10), Duration::from_secs(1));
        assert!(inverted
            .validate()
            .unwrap_err()
            .to_string()
            .contains("shorter than"));
    }

    #[test]
    fn test_builder_rejects_invalid_tracking() {
        let result = builder_with_bridges()
            .tracking(TrackingSettings::default().with_driver_match_timeout(Duration::ZERO))
            .build();

        assert!(matches!(result, Err(Error::InvalidSettings(_))));
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(origin_of("https://api.example.com/api/v1"), "https://api.example.com");
        assert_eq!(origin_of("http://localhost:3000"), "http://localhost:3000");
        assert_eq!(origin_of("http://localhost:3000/"), "http://localhost:3000");
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder_with_bridges().build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.api_base_url, config.api_base_url);
        assert!(format!("{:?}", cloned).contains("PushTransport { ... }"));
    }
}
