//! # Host Bridge Traits
//!
//! Platform abstraction traits that must be implemented by each host platform.
//!
//! ## Overview
//!
//! This crate defines the contract between the ride core and platform-specific
//! implementations. Each trait represents a capability that the core requires but
//! that must be implemented differently per platform (desktop, iOS, Android).
//!
//! ## Traits
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async REST operations with retry and TLS
//! - [`PushTransport`](push::PushTransport) - Namespaced real-time push channels
//!
//! ### Security
//! - [`SecureStore`](storage::SecureStore) - Credential persistence (Keychain/Keystore)
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ In Progress |
//! | iOS      | TBD                 | 📋 Planned |
//! | Android  | TBD                 | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use the [`BridgeError`](error::BridgeError) type. Platform
//! implementations should convert platform-specific errors to `BridgeError` and
//! keep the message actionable (URL, key name, close reason).
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so a single implementation can be
//! shared across every tracked ride through `Arc<dyn Trait>`.
//!
//! ## Examples
//!
//! ### Implementing PushTransport
//!
//! ```ignore
//! use bridge_traits::push::{PushChannel, PushChannelRequest, PushTransport};
//! use bridge_traits::error::Result;
//! use async_trait::async_trait;
//!
//! pub struct MySocketTransport;
//!
//! #[async_trait]
//! impl PushTransport for MySocketTransport {
//!     async fn open(&self, request: PushChannelRequest) -> Result<PushChannel> {
//!         // Dial, authenticate, then hand back the channel endpoints
//!         todo!()
//!     }
//! }
//! ```

pub mod error;
pub mod http;
pub mod push;
pub mod storage;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use push::{
    PushChannel, PushChannelPeer, PushChannelRequest, PushCommand, PushFrame, PushSignal,
    PushTransport,
};
pub use storage::SecureStore;
pub use time::{Clock, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
