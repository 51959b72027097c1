//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (HTTP, secure storage,
//! push transport, clock) into the ride tracking core. Desktop apps typically
//! enable the `desktop-shims` feature, which lets [`CoreConfig`] fall back to
//! the `bridge-desktop` implementations for any bridge the host did not inject.
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use core_service::RideService;
//!
//! let config = CoreConfig::builder()
//!     .api_base_url("https://api.example.com/api")
//!     .build()?;
//! let service = RideService::new(config)?;
//!
//! let (handle, mut events) = service.tracker().track("ride_123").await;
//! ```

pub mod error;

pub use error::{CoreError, Result};

pub use core_rides::{RideEvent, RideId, RideStatus, RideTracker};

use std::sync::Arc;

use core_auth::SessionTokenStore;
use core_rides::{ConnectionManager, HttpRideApi, PushEndpoint, ReconnectPolicy, RideApi};
use core_runtime::config::CoreConfig;
use core_runtime::events::EventBus;
use tracing::info;

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct RideService {
    config: Arc<CoreConfig>,
    tokens: Arc<SessionTokenStore>,
    rides: Arc<dyn RideApi>,
    tracker: RideTracker,
    events: EventBus,
}

impl RideService {
    /// Build the tracking stack from a validated configuration.
    ///
    /// Construction spawns nothing; tracking needs a Tokio runtime.
    pub fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let events = EventBus::new(config.event_buffer_size);
        let tokens = Arc::new(SessionTokenStore::new(
            Arc::clone(&config.secure_store),
            config.token_key.clone(),
        ));
        let rides: Arc<dyn RideApi> = Arc::new(HttpRideApi::new(
            Arc::clone(&config.http_client),
            tokens.clone(),
            config.api_base_url.clone(),
        ));

        let connections = ConnectionManager::builder(
            Arc::clone(&config.push_transport),
            tokens.clone(),
            PushEndpoint::new(config.push_url.clone(), config.push_namespace.clone()),
        )
        .policy(ReconnectPolicy::from(&config.tracking))
        .clock(Arc::clone(&config.clock))
        .event_bus(events.clone())
        .credential_key(config.token_key.clone())
        .build();

        let tracker = RideTracker::new(connections, Arc::clone(&rides), config.tracking.clone());

        info!(
            api_base_url = %config.api_base_url,
            push_url = %config.push_url,
            namespace = %config.push_namespace,
            "Ride service initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            tokens,
            rides,
            tracker,
            events,
        })
    }

    pub fn tracker(&self) -> &RideTracker {
        &self.tracker
    }

    /// REST surface: fetch, create, status update, cancel.
    pub fn rides(&self) -> &Arc<dyn RideApi> {
        &self.rides
    }

    /// Diagnostics bus carrying `CoreEvent::Tracking` and `CoreEvent::Auth`.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Session token written by the host's login flow.
    pub fn tokens(&self) -> &SessionTokenStore {
        &self.tokens
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Close every ride channel and cancel pending timers.
    pub async fn shutdown(&self) {
        self.tracker.shutdown().await;
    }
}

impl std::fmt::Debug for RideService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RideService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{
        HttpClient, HttpRequest, HttpResponse, PushChannel, PushChannelRequest, PushTransport,
        SecureStore,
    };
    use core_runtime::TrackingSettings;
    use mockall::mock;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    mock! {
        HttpClient {}

        #[async_trait]
        impl HttpClient for HttpClient {
            async fn execute(&self, request: HttpRequest) -> BridgeResult<HttpResponse>;
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        secrets: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl SecureStore for MemoryStore {
        async fn set_secret(&self, key: &str, value: &[u8]) -> BridgeResult<()> {
            self.secrets
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_vec());
            Ok(())
        }

        async fn get_secret(&self, key: &str) -> BridgeResult<Option<Vec<u8>>> {
            Ok(self.secrets.lock().unwrap().get(key).cloned())
        }

        async fn delete_secret(&self, key: &str) -> BridgeResult<()> {
            self.secrets.lock().unwrap().remove(key);
            Ok(())
        }
    }

    struct RecordingTransport {
        requests: Mutex<Vec<PushChannelRequest>>,
    }

    #[async_trait]
    impl PushTransport for RecordingTransport {
        async fn open(&self, request: PushChannelRequest) -> BridgeResult<PushChannel> {
            self.requests.lock().unwrap().push(request);
            let (channel, _peer) = PushChannel::pair();
            Ok(channel)
        }
    }

    fn config(transport: Arc<RecordingTransport>, store: Arc<MemoryStore>) -> CoreConfig {
        CoreConfig::builder()
            .api_base_url("https://api.example.com/api")
            .token_key("session_token")
            .http_client(Arc::new(MockHttpClient::new()))
            .secure_store(store)
            .push_transport(transport)
            .tracking(
                TrackingSettings::default().with_fallback_grace_period(Duration::from_secs(60)),
            )
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_service_wires_token_into_push_handshake() {
        let transport = Arc::new(RecordingTransport {
            requests: Mutex::new(Vec::new()),
        });
        let store = Arc::new(MemoryStore::default());
        let service = RideService::new(config(transport.clone(), store)).unwrap();

        service.tokens().store_token("tok-123").await.unwrap();
        let (handle, _events) = service.tracker().track("ride_123").await;

        for _ in 0..10 {
            tokio::task::yield_now().await;
            if !transport.requests.lock().unwrap().is_empty() {
                break;
            }
        }

        let requests = transport.requests.lock().unwrap().clone();
        assert!(!requests.is_empty());
        assert_eq!(requests[0].url, "https://api.example.com");
        assert_eq!(requests[0].namespace, "/ride-updates");
        assert_eq!(requests[0].auth_token.as_deref(), Some("tok-123"));

        service
            .tracker()
            .untrack(handle.ride_id(), handle.observer_id())
            .await;
        service.shutdown().await;
    }

    #[test]
    fn test_events_bus_is_shared() {
        let transport = Arc::new(RecordingTransport {
            requests: Mutex::new(Vec::new()),
        });
        let service =
            RideService::new(config(transport, Arc::new(MemoryStore::default()))).unwrap();

        let _receiver = service.events().subscribe();
        assert_eq!(service.tracker().connections().event_bus().subscriber_count(), 1);
        assert_eq!(service.config().token_key, "session_token");
    }
}
