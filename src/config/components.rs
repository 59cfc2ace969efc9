//! Component bodies of the collector configuration
//!
//! One variant per component kind. Field names follow the collector's own
//! YAML schema; optional settings are skipped when unset so the rendered
//! document only carries what a builder asked for.

use std::collections::BTreeMap;

use serde::Serialize;

// ============================================================================
// Shared
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    pub endpoint: String,
}

impl Endpoint {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RetryOnFailure {
    pub enabled: bool,
    pub initial_interval: String,
    pub max_interval: String,
    pub max_elapsed_time: String,
}

impl Default for RetryOnFailure {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_interval: "5s".to_string(),
            max_interval: "30s".to_string(),
            max_elapsed_time: "300s".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MetricToggle {
    pub enabled: bool,
}

// ============================================================================
// Extensions
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Extension {
    /// health_check and pprof
    Endpoint(Endpoint),
    FileStorage(FileStorageExtension),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct FileStorageExtension {
    pub directory: String,
}

// ============================================================================
// Receivers
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Receiver {
    Otlp(OtlpReceiver),
    FileLog(FileLogReceiver),
    KubeletStats(KubeletStatsReceiver),
    Singleton(SingletonReceiverCreator),
    Prometheus(PrometheusReceiver),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct OtlpReceiver {
    pub protocols: OtlpReceiverProtocols,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct OtlpReceiverProtocols {
    pub http: Endpoint,
    pub grpc: Endpoint,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct FileLogReceiver {
    pub exclude: Vec<String>,
    pub include: Vec<String>,
    pub include_file_name: bool,
    pub include_file_path: bool,
    pub start_at: String,
    pub storage: String,
    pub retry_on_failure: RetryOnFailure,
    pub operators: Vec<FileLogOperator>,
}

/// A stanza operator of the filelog receiver
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FileLogOperator {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub if_expr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_from: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_to: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub add_metadata_from_file_path: Option<bool>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct KubeletStatsReceiver {
    pub collection_interval: String,
    pub auth_type: String,
    pub endpoint: String,
    pub insecure_skip_verify: bool,
    pub metric_groups: Vec<String>,
    pub metrics: BTreeMap<String, MetricToggle>,
    pub extra_metadata_labels: Vec<String>,
}

/// Wraps a receiver so only the lease holder runs it
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct SingletonReceiverCreator {
    pub auth_type: String,
    pub leader_election: LeaderElection,
    pub receiver: SingletonReceiver,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct LeaderElection {
    pub lease_name: String,
    pub lease_namespace: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub enum SingletonReceiver {
    #[serde(rename = "k8s_cluster")]
    K8sCluster(K8sClusterReceiver),
    #[serde(rename = "kymastats")]
    KymaStats(KymaStatsReceiver),
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct K8sClusterReceiver {
    pub auth_type: String,
    pub collection_interval: String,
    pub node_conditions_to_report: Vec<String>,
    pub metrics: BTreeMap<String, MetricToggle>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct KymaStatsReceiver {
    pub auth_type: String,
    pub collection_interval: String,
    pub resources: Vec<GroupVersionResource>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct GroupVersionResource {
    pub group: String,
    pub version: String,
    pub resource: String,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PrometheusReceiver {
    pub config: PrometheusConfig,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PrometheusConfig {
    pub scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScrapeConfig {
    pub job_name: String,
    pub sample_limit: u32,
    pub scrape_interval: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_path: Option<String>,
    pub kubernetes_sd_configs: Vec<KubernetesSdConfig>,
    pub relabel_configs: Vec<RelabelConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric_relabel_configs: Vec<RelabelConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_config: Option<ScrapeTlsConfig>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct KubernetesSdConfig {
    pub role: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RelabelConfig {
    pub source_labels: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<String>,
    pub action: RelabelAction,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RelabelAction {
    Keep,
    Drop,
    Replace,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ScrapeTlsConfig {
    pub ca_file: String,
    pub cert_file: String,
    pub key_file: String,
    pub insecure_skip_verify: bool,
}

// ============================================================================
// Processors
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(untagged)]
pub enum Processor {
    MemoryLimiter(MemoryLimiter),
    Batch(BatchProcessor),
    K8sAttributes(K8sAttributesProcessor),
    Resource(ResourceProcessor),
    Transform(TransformProcessor),
    Filter(FilterProcessor),
    ServiceEnrichment(ServiceEnrichmentProcessor),
    IstioNoiseFilter(IstioNoiseFilterProcessor),
    IstioEnrichment(IstioEnrichmentProcessor),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MemoryLimiter {
    pub check_interval: String,
    pub limit_percentage: u8,
    pub spike_limit_percentage: u8,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct BatchProcessor {
    pub send_batch_size: u32,
    pub timeout: String,
    pub send_batch_max_size: u32,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct K8sAttributesProcessor {
    pub auth_type: String,
    pub passthrough: bool,
    pub extract: ExtractK8sMetadata,
    pub pod_association: Vec<PodAssociations>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ExtractK8sMetadata {
    pub metadata: Vec<String>,
    pub labels: Vec<ExtractLabel>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ExtractLabel {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_regex: Option<String>,
    pub tag_name: String,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PodAssociations {
    pub sources: Vec<PodAssociation>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PodAssociation {
    pub from: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ResourceProcessor {
    pub attributes: Vec<AttributeAction>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct AttributeAction {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TransformProcessor {
    pub error_mode: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric_statements: Vec<TransformStatements>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub log_statements: Vec<TransformStatements>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub trace_statements: Vec<TransformStatements>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct TransformStatements {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,
    pub statements: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FilterProcessor {
    pub error_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<FilterMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs: Option<FilterLogs>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces: Option<FilterTraces>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FilterMetrics {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metric: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub datapoint: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FilterLogs {
    pub log_record: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct FilterTraces {
    pub span: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ServiceEnrichmentProcessor {
    pub resource_attributes: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct IstioNoiseFilterProcessor {}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct IstioEnrichmentProcessor {
    pub scope_version: String,
}

// ============================================================================
// Exporters
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Exporter {
    Otlp(OtlpExporter),
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct OtlpExporter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub traces_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics_endpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logs_endpoint: Option<String>,
    pub tls: ExporterTls,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub sending_queue: SendingQueue,
    pub retry_on_failure: RetryOnFailure,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ExporterTls {
    pub insecure: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub insecure_skip_verify: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca_pem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert_pem: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pem: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct SendingQueue {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<i64>,
}

impl SendingQueue {
    /// Non-positive sizes disable the queue
    pub fn with_size(queue_size: i64) -> Self {
        if queue_size <= 0 {
            Self {
                enabled: false,
                queue_size: None,
            }
        } else {
            Self {
                enabled: true,
                queue_size: Some(queue_size),
            }
        }
    }
}

// ============================================================================
// Connectors
// ============================================================================

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Connector {
    Routing(RoutingConnector),
    Forward(ForwardConnector),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RoutingConnector {
    pub default_pipelines: Vec<String>,
    pub error_mode: String,
    pub table: Vec<RoutingTableEntry>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct RoutingTableEntry {
    pub statement: String,
    pub pipelines: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct ForwardConnector {}
