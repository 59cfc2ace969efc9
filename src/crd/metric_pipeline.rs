//! MetricPipeline Custom Resource Definition
//!
//! A MetricPipeline collects metrics from up to four input sources (runtime,
//! prometheus, istio, otlp) and ships them to one OTLP backend.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{FilterSpec, NamespaceSelector, OtlpInput, PipelineOutput, TransformSpec};

/// The MetricPipeline CRD describes one metric flow.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1alpha1",
    kind = "MetricPipeline",
    shortname = "mp",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineSpec {
    #[serde(default)]
    pub input: MetricPipelineInput,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transforms: Vec<TransformSpec>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FilterSpec>,

    pub output: PipelineOutput,
}

/// Metric input sources in their canonical order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MetricInputSource {
    Runtime,
    Prometheus,
    Istio,
    Otlp,
}

impl MetricInputSource {
    pub const ALL: [MetricInputSource; 4] = [
        MetricInputSource::Runtime,
        MetricInputSource::Prometheus,
        MetricInputSource::Istio,
        MetricInputSource::Otlp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricInputSource::Runtime => "runtime",
            MetricInputSource::Prometheus => "prometheus",
            MetricInputSource::Istio => "istio",
            MetricInputSource::Otlp => "otlp",
        }
    }
}

impl std::fmt::Display for MetricInputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kubernetes resources the runtime input can report on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RuntimeResource {
    Pod,
    Container,
    Node,
    Volume,
    Deployment,
    DaemonSet,
    StatefulSet,
    Job,
}

impl RuntimeResource {
    pub const ALL: [RuntimeResource; 8] = [
        RuntimeResource::Pod,
        RuntimeResource::Container,
        RuntimeResource::Node,
        RuntimeResource::Volume,
        RuntimeResource::Deployment,
        RuntimeResource::DaemonSet,
        RuntimeResource::StatefulSet,
        RuntimeResource::Job,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeResource::Pod => "pod",
            RuntimeResource::Container => "container",
            RuntimeResource::Node => "node",
            RuntimeResource::Volume => "volume",
            RuntimeResource::Deployment => "deployment",
            RuntimeResource::DaemonSet => "daemonset",
            RuntimeResource::StatefulSet => "statefulset",
            RuntimeResource::Job => "job",
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MetricPipelineInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<PrometheusInput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub istio: Option<IstioInput>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub otlp: Option<OtlpInput>,
}

/// Node-level runtime metrics (kubelet and cluster state)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<RuntimeResources>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pod: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemonset: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statefulset: Option<Toggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job: Option<Toggle>,
}

impl RuntimeResources {
    fn toggle(&self, resource: RuntimeResource) -> Option<&Toggle> {
        match resource {
            RuntimeResource::Pod => self.pod.as_ref(),
            RuntimeResource::Container => self.container.as_ref(),
            RuntimeResource::Node => self.node.as_ref(),
            RuntimeResource::Volume => self.volume.as_ref(),
            RuntimeResource::Deployment => self.deployment.as_ref(),
            RuntimeResource::DaemonSet => self.daemonset.as_ref(),
            RuntimeResource::StatefulSet => self.statefulset.as_ref(),
            RuntimeResource::Job => self.job.as_ref(),
        }
    }
}

/// Tri-state on/off switch; `None` means "use the default"
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Toggle {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

/// Scraping of annotated workloads
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_metrics: Option<Toggle>,
}

/// Istio sidecar metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IstioInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostic_metrics: Option<Toggle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub envoy_metrics: Option<Toggle>,
}

impl MetricPipelineInput {
    /// Runtime, prometheus and istio are opt-in; otlp is on unless disabled.
    pub fn is_enabled(&self, source: MetricInputSource) -> bool {
        match source {
            MetricInputSource::Runtime => self
                .runtime
                .as_ref()
                .and_then(|i| i.enabled)
                .unwrap_or(false),
            MetricInputSource::Prometheus => self
                .prometheus
                .as_ref()
                .and_then(|i| i.enabled)
                .unwrap_or(false),
            MetricInputSource::Istio => {
                self.istio.as_ref().and_then(|i| i.enabled).unwrap_or(false)
            }
            MetricInputSource::Otlp => self.otlp.as_ref().and_then(|i| i.enabled).unwrap_or(true),
        }
    }

    pub fn namespaces(&self, source: MetricInputSource) -> Option<&NamespaceSelector> {
        match source {
            MetricInputSource::Runtime => self.runtime.as_ref()?.namespaces.as_ref(),
            MetricInputSource::Prometheus => self.prometheus.as_ref()?.namespaces.as_ref(),
            MetricInputSource::Istio => self.istio.as_ref()?.namespaces.as_ref(),
            MetricInputSource::Otlp => self.otlp.as_ref()?.namespaces.as_ref(),
        }
    }

    /// Whether the runtime input reports on `resource`. Every resource is on by default.
    pub fn is_runtime_resource_enabled(&self, resource: RuntimeResource) -> bool {
        self.runtime
            .as_ref()
            .and_then(|i| i.resources.as_ref())
            .and_then(|r| r.toggle(resource))
            .and_then(|t| t.enabled)
            .unwrap_or(true)
    }

    pub fn is_prometheus_diagnostic_enabled(&self) -> bool {
        self.prometheus
            .as_ref()
            .and_then(|i| i.diagnostic_metrics.as_ref())
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    pub fn is_istio_diagnostic_enabled(&self) -> bool {
        self.istio
            .as_ref()
            .and_then(|i| i.diagnostic_metrics.as_ref())
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    pub fn is_envoy_metrics_enabled(&self) -> bool {
        self.istio
            .as_ref()
            .and_then(|i| i.envoy_metrics.as_ref())
            .and_then(|t| t.enabled)
            .unwrap_or(false)
    }

    /// Rejects selectors that set both include and exclude
    pub fn validate(&self) -> Result<(), String> {
        for source in MetricInputSource::ALL {
            if let Some(selector) = self.namespaces(source) {
                selector
                    .validate()
                    .map_err(|e| format!("{source} input: {e}"))?;
            }
        }
        Ok(())
    }
}
