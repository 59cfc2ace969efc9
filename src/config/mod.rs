//! OpenTelemetry Collector configuration model
//!
//! The [`Config`] tree mirrors the collector's YAML document. Struct field
//! order fixes the key order of the rendered output and every component map
//! is a `BTreeMap`, so serialising the same tree always yields the same bytes.

mod components;
pub mod env_vars;
pub mod otlp_exporter;
pub mod ottl;
pub mod processors;
pub mod prometheus;

use std::collections::BTreeMap;

use serde::Serialize;

pub use components::*;
pub use env_vars::EnvVars;

use crate::error::Result;

pub const OTLP_GRPC_PORT: u16 = 4317;
pub const OTLP_HTTP_PORT: u16 = 4318;
pub const HEALTH_CHECK_PORT: u16 = 13133;
pub const PPROF_PORT: u16 = 1777;
pub const METRICS_PORT: u16 = 8888;

pub const HEALTH_CHECK_EXTENSION_ID: &str = "health_check";
pub const PPROF_EXTENSION_ID: &str = "pprof";

/// Telemetry signal a pipeline carries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalType {
    Log,
    Metric,
    Trace,
}

/// Root of a collector configuration
#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Config {
    pub extensions: BTreeMap<String, Extension>,
    pub service: Service,
    pub receivers: BTreeMap<String, Receiver>,
    pub processors: BTreeMap<String, Processor>,
    pub exporters: BTreeMap<String, Exporter>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub connectors: BTreeMap<String, Connector>,
}

#[derive(Clone, Debug, Default, Serialize, PartialEq)]
pub struct Service {
    pub pipelines: BTreeMap<String, Pipeline>,
    pub telemetry: Telemetry,
    pub extensions: Vec<String>,
}

/// One service pipeline. Entries are component IDs.
#[derive(Clone, Debug, Default, Serialize, PartialEq, Eq)]
pub struct Pipeline {
    pub receivers: Vec<String>,
    pub processors: Vec<String>,
    pub exporters: Vec<String>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Telemetry {
    pub metrics: TelemetryMetrics,
    pub logs: TelemetryLogs,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TelemetryMetrics {
    pub readers: Vec<MetricReader>,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct MetricReader {
    pub pull: PullMetricReader,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PullMetricReader {
    pub exporter: PullMetricExporter,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PullMetricExporter {
    pub prometheus: PrometheusMetricExporter,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct PrometheusMetricExporter {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct TelemetryLogs {
    pub level: String,
    pub encoding: String,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            metrics: TelemetryMetrics {
                readers: vec![MetricReader {
                    pull: PullMetricReader {
                        exporter: PullMetricExporter {
                            prometheus: PrometheusMetricExporter {
                                host: pod_ip(),
                                port: METRICS_PORT,
                            },
                        },
                    },
                }],
            },
            logs: TelemetryLogs {
                level: "info".to_string(),
                encoding: "json".to_string(),
            },
        }
    }
}

/// `${MY_POD_IP}`, expanded by the collector at start-up
pub fn pod_ip() -> String {
    env_vars::placeholder("MY_POD_IP")
}

/// `${MY_NODE_NAME}`, expanded by the collector at start-up
pub fn node_name() -> String {
    env_vars::placeholder("MY_NODE_NAME")
}

impl Config {
    /// Skeleton shared by every collector: health_check and pprof
    /// extensions plus self-telemetry, and nothing else.
    pub fn base() -> Self {
        let mut config = Config::default();
        config.add_extension(
            HEALTH_CHECK_EXTENSION_ID,
            Extension::Endpoint(Endpoint::new(format!("{}:{HEALTH_CHECK_PORT}", pod_ip()))),
        );
        config.add_extension(
            PPROF_EXTENSION_ID,
            Extension::Endpoint(Endpoint::new(format!("127.0.0.1:{PPROF_PORT}"))),
        );
        config
    }

    /// Registers an extension and enables it in the service section
    pub fn add_extension(&mut self, id: &str, extension: Extension) {
        if self.extensions.insert(id.to_string(), extension).is_none() {
            self.service.extensions.push(id.to_string());
        }
    }

    /// Each `add_*` call stores the body under `id` and hands the ID back,
    /// so pipelines can only reference components that exist.
    pub fn add_receiver(&mut self, id: &str, receiver: Receiver) -> String {
        self.receivers.insert(id.to_string(), receiver);
        id.to_string()
    }

    pub fn add_processor(&mut self, id: &str, processor: Processor) -> String {
        self.processors.insert(id.to_string(), processor);
        id.to_string()
    }

    pub fn add_exporter(&mut self, id: &str, exporter: Exporter) -> String {
        self.exporters.insert(id.to_string(), exporter);
        id.to_string()
    }

    pub fn add_connector(&mut self, id: &str, connector: Connector) -> String {
        self.connectors.insert(id.to_string(), connector);
        id.to_string()
    }

    /// Adds a service pipeline; its exporters are sorted lexicographically
    pub fn add_pipeline(&mut self, id: impl Into<String>, mut pipeline: Pipeline) {
        pipeline.exporters.sort();
        self.service.pipelines.insert(id.into(), pipeline);
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Standard OTLP push receiver listening on the pod IP
pub fn otlp_receiver() -> Receiver {
    Receiver::Otlp(OtlpReceiver {
        protocols: OtlpReceiverProtocols {
            http: Endpoint::new(format!("{}:{OTLP_HTTP_PORT}", pod_ip())),
            grpc: Endpoint::new(format!("{}:{OTLP_GRPC_PORT}", pod_ip())),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn top_level_line(yaml: &str, key: &str) -> usize {
        yaml.lines()
            .position(|line| line.starts_with(&format!("{key}:")))
            .unwrap()
    }

    #[test]
    fn test_base_config_yaml_key_order() {
        let yaml = Config::base().to_yaml().unwrap();
        let positions: Vec<usize> = ["extensions", "service", "receivers", "processors", "exporters"]
            .iter()
            .map(|key| top_level_line(&yaml, key))
            .collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
        assert!(!yaml.contains("connectors:"));
    }

    #[test]
    fn test_base_config_contents() {
        let value = serde_json::to_value(Config::base()).unwrap();
        assert_eq!(
            value["extensions"]["health_check"]["endpoint"],
            "${MY_POD_IP}:13133"
        );
        assert_eq!(value["extensions"]["pprof"]["endpoint"], "127.0.0.1:1777");
        assert_eq!(
            value["service"]["extensions"],
            serde_json::json!(["health_check", "pprof"])
        );
        assert_eq!(
            value["service"]["telemetry"]["metrics"]["readers"][0]["pull"]["exporter"]["prometheus"]["port"],
            8888
        );
        assert_eq!(value["service"]["telemetry"]["logs"]["encoding"], "json");
        assert!(value["service"]["pipelines"].as_object().unwrap().is_empty());
    }

    #[test]
    fn test_service_key_order() {
        let yaml = serde_yaml::to_string(&Config::base().service).unwrap();
        let pipelines = top_level_line(&yaml, "pipelines");
        let telemetry = top_level_line(&yaml, "telemetry");
        let extensions = top_level_line(&yaml, "extensions");
        assert!(pipelines < telemetry && telemetry < extensions);
    }

    #[test]
    fn test_add_pipeline_sorts_exporters() {
        let mut config = Config::base();
        config.add_pipeline(
            "logs/test",
            Pipeline {
                receivers: vec!["otlp".to_string()],
                processors: vec![],
                exporters: vec!["otlp/b".to_string(), "otlp/a".to_string()],
            },
        );
        assert_eq!(
            config.service.pipelines["logs/test"].exporters,
            vec!["otlp/a".to_string(), "otlp/b".to_string()]
        );
    }

    #[test]
    fn test_add_extension_is_idempotent() {
        let mut config = Config::base();
        config.add_extension(
            HEALTH_CHECK_EXTENSION_ID,
            Extension::Endpoint(Endpoint::new("x")),
        );
        assert_eq!(config.service.extensions.len(), 2);
    }
}
