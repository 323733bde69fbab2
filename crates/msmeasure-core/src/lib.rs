//! # msmeasure-core
//!
//! Measurement acquisition and upstream self-registration for a simulated
//! environmental sensor.
//!
//! ## Architecture
//!
//! RandomSource → DeviceTranslator → MeasurementService → HTTP
//!
//! - A [`RandomSource`] draws one integer from an in-process generator, a
//!   shell command or a REST service, selected once from the configured
//!   [`RandomTarget`]. It never fails: errors degrade to a sentinel sample.
//! - [`translate`] maps that integer onto the thermometer or hygrometer range
//!   described by a [`DeviceConfig`].
//! - [`MeasurementService`] serializes sampling and records when the last
//!   measurement was served.
//! - [`RegistrationAgent`] runs beside the server and keeps announcing the
//!   device to the upstream registry while it is idle or unregistered.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use msmeasure_core::{DeviceConfig, MeasurementService, RandomSource, RegistrationState};
//!
//! # async fn demo() {
//! let service = MeasurementService::new(
//!     DeviceConfig::thermometer("lab-1"),
//!     RandomSource::internal_with_seed(42),
//!     Arc::new(RegistrationState::new()),
//! );
//! let measurement = service.measure(&Default::default()).await;
//! println!("{}{}", measurement.reading.formatted_value, measurement.reading.unit);
//! # }
//! ```

pub mod config;
pub mod device;
pub mod error;
pub mod measurement;
pub mod outbound;
pub mod registration;
pub mod source;

pub use config::{ConfigLayer, Settings};
pub use device::{DeviceConfig, DeviceKind, DeviceReading, translate};
pub use error::{ConfigError, RegistrationError, SampleError};
pub use measurement::{Measurement, MeasurementService};
pub use outbound::Identity;
pub use registration::{
    Acknowledgement, RETRY_INTERVAL, RegistrationAgent, RegistrationState, RegistrationStatus,
    STALE_AFTER, Tick,
};
pub use source::{RandomSample, RandomSource, RandomTarget, Sampler};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
