//! LogPipeline Custom Resource Definition

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FilterSpec, NamespaceSelector, OtlpInput, PipelineOutput, TransformSpec};

/// The LogPipeline CRD describes one log flow: container logs tailed on every
/// node and/or logs pushed over OTLP.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "LogPipeline",
    shortname = "lp",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    #[serde(default)]
    pub input: LogPipelineInput,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,

    pub output: PipelineOutput,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<ApplicationInput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

/// Container log tailing on the nodes
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Keep the unparsed log line in `attributes.original`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_original_body: Option<bool>,
}

impl LogPipelineInput {
    pub fn is_application_enabled(&self) -> bool {
        self.application
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(true)
    }

    pub fn keep_original_body(&self) -> bool {
        self.application
            .as_ref()
            .and_then(|a| a.keep_original_body)
            .unwrap_or(true)
    }

    pub fn is_otlp_enabled(&self) -> bool {
        self.otlp.as_ref().and_then(|o| o.enabled).unwrap_or(true)
    }

    pub fn otlp_namespaces(&self) -> Option<&NamespaceSelector> {
        self.otlp.as_ref()?.namespaces.as_ref()
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(selector) = self.otlp_namespaces() {
            selector.validate().map_err(|e| format!("otlp input: {e}"))?;
        }
        Ok(())
    }
}
