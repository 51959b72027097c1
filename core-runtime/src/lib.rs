//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the ride tracking core:
//! - Logging and tracing infrastructure
//! - Configuration management (bridges and tracking timings)
//! - Diagnostics event bus
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that other modules depend on.
//! It establishes the configuration contract, logging conventions, and event
//! broadcasting mechanisms used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CoreConfig, TrackingSettings};
pub use error::{Error, Result};
