//! Telemetry Configuration Compiler
//!
//! Turns LogPipeline, MetricPipeline and TracePipeline resources into
//! OpenTelemetry Collector configuration documents for the node agents and
//! the cluster gateways, together with the environment variables that carry
//! their secret values.
//!
//! # Modules
//!
//! - [`crd`] - Pipeline Custom Resource Definitions
//! - [`config`] - Collector configuration model, OTTL helpers and shared components
//! - [`builder`] - One builder per collector flavour
//! - [`secrets`] - Secret lookup behind the [`secrets::SecretReader`] trait
//! - [`error`] - Error types

pub mod builder;
pub mod config;
pub mod crd;
pub mod error;
pub mod secrets;

pub use error::{Error, Result};
