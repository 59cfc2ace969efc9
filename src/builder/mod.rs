//! Signal builders
//!
//! One builder per collector flavour. Gateways take user pipelines and a
//! [`SecretReader`](crate::secrets::SecretReader) because their exporters may
//! reference secrets; agents only forward to the gateway and need neither.
//!
//! Every builder is a pure function of its inputs: callers pass pipelines
//! sorted by name and get byte-identical YAML back on every call.

pub mod log_agent;
pub mod log_gateway;
pub mod metric_agent;
pub mod metric_gateway;
pub mod trace_gateway;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::{Exporter, ExporterTls, OtlpExporter, RetryOnFailure, SendingQueue, OTLP_GRPC_PORT};
use crate::error::{Error, Result};

/// Batches held in memory across all exporters of one gateway
pub const MAX_QUEUE_SIZE: i64 = 256;

/// Per-exporter share of [`MAX_QUEUE_SIZE`]. No pipelines means no queue.
pub fn queue_size(pipeline_count: usize) -> i64 {
    if pipeline_count == 0 {
        return 0;
    }
    MAX_QUEUE_SIZE / pipeline_count as i64
}

/// Kubernetes Service fronting a gateway
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayService {
    pub name: String,
    pub namespace: String,
}

impl GatewayService {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }

    /// Cluster-internal OTLP gRPC address of the service
    pub fn endpoint(&self) -> String {
        format!(
            "{}.{}.svc.cluster.local:{OTLP_GRPC_PORT}",
            self.name, self.namespace
        )
    }
}

/// Exporter agents use to push to their gateway. Agents keep no queue; the
/// gateway does the buffering.
pub(crate) fn gateway_exporter(gateway: &GatewayService) -> Exporter {
    Exporter::Otlp(OtlpExporter {
        endpoint: Some(gateway.endpoint()),
        tls: ExporterTls {
            insecure: true,
            ..Default::default()
        },
        sending_queue: SendingQueue::with_size(0),
        retry_on_failure: RetryOnFailure::default(),
        ..Default::default()
    })
}

/// Runs `validate` and tags the failure with the pipeline name
pub(crate) fn validate_pipeline(
    pipeline_name: &str,
    validate: impl FnOnce() -> std::result::Result<(), String>,
) -> Result<()> {
    validate().map_err(|e| Error::InvalidPipelineInput(format!("pipeline '{pipeline_name}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_size() {
        assert_eq!(queue_size(0), 0);
        assert_eq!(queue_size(1), 256);
        assert_eq!(queue_size(3), 85);
        assert_eq!(queue_size(300), 0);
    }

    #[test]
    fn test_gateway_endpoint() {
        let gateway = GatewayService::new("telemetry-otlp-metrics", "kyma-system");
        assert_eq!(
            gateway.endpoint(),
            "telemetry-otlp-metrics.kyma-system.svc.cluster.local:4317"
        );
    }

    #[test]
    fn test_gateway_exporter() {
        let gateway = GatewayService::new("telemetry-otlp-logs", "kyma-system");
        let value = serde_json::to_value(gateway_exporter(&gateway)).unwrap();
        assert_eq!(
            value["endpoint"],
            "telemetry-otlp-logs.kyma-system.svc.cluster.local:4317"
        );
        assert_eq!(value["tls"]["insecure"], true);
        assert_eq!(value["sending_queue"]["enabled"], false);
        assert_eq!(value["retry_on_failure"]["enabled"], true);
    }

    #[test]
    fn test_validate_pipeline_tags_name() {
        let err = validate_pipeline("cls", || Err("boom".to_string())).unwrap_err();
        assert_eq!(err.to_string(), "invalid pipeline input: pipeline 'cls': boom");
    }
}
