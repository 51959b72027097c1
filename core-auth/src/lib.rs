//! # Authentication Module
//!
//! Credential source for the ride tracking core.
//!
//! ## Overview
//!
//! Login, sign-up and token issuance happen outside the core. This crate only
//! resolves the opaque bearer token the login flow left in secure storage and
//! hands it to the push handshake and REST calls. A missing token is not an
//! error at this layer: callers connect anonymously and let the server reject.
//!
//! ## Features
//!
//! - [`CredentialProvider`] seam for injecting test doubles or host-managed tokens
//! - [`SessionTokenStore`] reading the token from a `SecureStore` under a known key
//! - Token values are never logged

pub mod error;
pub mod provider;
pub mod token_store;

pub use error::{AuthError, Result};
pub use provider::{CredentialProvider, StaticCredentials};
pub use token_store::SessionTokenStore;
