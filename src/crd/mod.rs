//! Custom Resource Definitions for telemetry pipelines
//!
//! This module defines the pipeline CRDs whose specs feed the config compiler.

mod log_pipeline;
mod metric_pipeline;
mod trace_pipeline;
mod types;

pub use log_pipeline::{ApplicationInput, LogPipeline, LogPipelineInput, LogPipelineSpec};
pub use metric_pipeline::{
    IstioInput, MetricInputSource, MetricPipeline, MetricPipelineInput, MetricPipelineSpec,
    PrometheusInput, RuntimeInput, RuntimeResource, RuntimeResources, Toggle,
};
pub use trace_pipeline::{TracePipeline, TracePipelineSpec};
pub use types::*;
