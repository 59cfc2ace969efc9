//! TracePipeline Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FilterSpec, PipelineOutput, TransformSpec};

/// The TracePipeline CRD describes one trace flow. Traces are always pushed
/// over OTLP, so there is no input section.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "TracePipeline",
    shortname = "tp",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TracePipelineSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,

    pub output: PipelineOutput,
}
