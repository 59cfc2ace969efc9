//! Metric agent configuration
//!
//! The agent runs on every node and scrapes whatever the enabled inputs ask
//! for: kubelet and cluster-state metrics for `runtime`, annotated workloads
//! for `prometheus` and sidecar proxies for `istio`. It applies no
//! per-pipeline logic; all of it is forwarded to the metric gateway, which
//! does the per-pipeline filtering.

use std::collections::BTreeMap;

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{gateway_exporter, validate_pipeline, GatewayService};
use crate::config::processors::{self, ScopeSource};
use crate::config::prometheus::{self, DiscoveryRole, DEFAULT_ISTIO_CERT_PATH};
use crate::config::{
    node_name, ottl, Config, EnvVars, K8sClusterReceiver, KubeletStatsReceiver, LeaderElection,
    MetricToggle, Pipeline, Processor, Receiver, SignalType, SingletonReceiver,
    SingletonReceiverCreator, TransformStatements,
};
use crate::crd::{MetricInputSource, MetricPipeline, RuntimeResource};
use crate::error::Result;

pub const KUBELET_STATS_RECEIVER_ID: &str = "kubeletstats";
pub const K8S_CLUSTER_RECEIVER_ID: &str = "singleton_receiver_creator/k8s_cluster";
pub const PROMETHEUS_APP_PODS_RECEIVER_ID: &str = "prometheus/app-pods";
pub const PROMETHEUS_APP_SERVICES_RECEIVER_ID: &str = "prometheus/app-services";
pub const PROMETHEUS_ISTIO_RECEIVER_ID: &str = "prometheus/istio";

const INSERT_SKIP_ENRICHMENT_ID: &str = "transform/insert-skip-enrichment-attribute";
const DROP_NON_PVC_VOLUMES_ID: &str = "filter/drop-non-pvc-volumes-metrics";
const K8S_CLUSTER_LEASE: &str = "telemetry-metric-agent-k8scluster";
const COLLECTION_INTERVAL: &str = "30s";

/// Cluster-state metrics the agent never reports
const K8S_CLUSTER_ALWAYS_DISABLED: [&str; 16] = [
    "k8s.container.storage_request",
    "k8s.container.storage_limit",
    "k8s.container.ephemeralstorage_request",
    "k8s.container.ephemeralstorage_limit",
    "k8s.container.ready",
    "k8s.namespace.phase",
    "k8s.hpa.current_replicas",
    "k8s.hpa.desired_replicas",
    "k8s.hpa.min_replicas",
    "k8s.hpa.max_replicas",
    "k8s.replicaset.available",
    "k8s.replicaset.desired",
    "k8s.replication_controller.available",
    "k8s.replication_controller.desired",
    "k8s.resource_quota.hard_limit",
    "k8s.resource_quota.used",
];

const KUBELET_ENABLED_METRICS: [&str; 3] = [
    "container.cpu.usage",
    "k8s.pod.cpu.usage",
    "k8s.node.cpu.usage",
];

const KUBELET_DISABLED_METRICS: [&str; 8] = [
    "container.cpu.utilization",
    "k8s.pod.cpu.utilization",
    "k8s.node.cpu.utilization",
    "k8s.node.cpu.time",
    "k8s.node.memory.major_page_faults",
    "k8s.node.memory.page_faults",
    "k8s.node.network.io",
    "k8s.node.network.errors",
];

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Service of the metric gateway everything is forwarded to
    pub gateway: GatewayService,
    /// Namespace holding the k8s_cluster leader-election lease
    #[serde(default)]
    pub agent_namespace: String,
    #[serde(default)]
    pub module_version: String,
    /// Scrape annotated workloads over mTLS as well when the mesh is installed
    #[serde(default)]
    pub istio_enabled: bool,
    /// Mount path of the Istio workload certificates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub istio_cert_path: Option<String>,
}

impl BuildOptions {
    fn istio_cert_path(&self) -> Option<&str> {
        if !self.istio_enabled {
            return None;
        }
        Some(
            self.istio_cert_path
                .as_deref()
                .unwrap_or(DEFAULT_ISTIO_CERT_PATH),
        )
    }
}

/// Inputs the agent has to serve, merged over all pipelines
#[derive(Debug, Default)]
struct EnabledInputs {
    runtime: bool,
    prometheus: bool,
    istio: bool,
    runtime_resources: Vec<RuntimeResource>,
}

impl EnabledInputs {
    fn collect(pipelines: &[MetricPipeline]) -> Self {
        let inputs: Vec<_> = pipelines.iter().map(|p| &p.spec.input).collect();
        let runtime_inputs: Vec<_> = inputs
            .iter()
            .filter(|input| input.is_enabled(MetricInputSource::Runtime))
            .collect();

        Self {
            runtime: !runtime_inputs.is_empty(),
            prometheus: inputs
                .iter()
                .any(|input| input.is_enabled(MetricInputSource::Prometheus)),
            istio: inputs
                .iter()
                .any(|input| input.is_enabled(MetricInputSource::Istio)),
            runtime_resources: RuntimeResource::ALL
                .into_iter()
                .filter(|resource| {
                    runtime_inputs
                        .iter()
                        .any(|input| input.is_runtime_resource_enabled(*resource))
                })
                .collect(),
        }
    }

    fn has(&self, resource: RuntimeResource) -> bool {
        self.runtime_resources.contains(&resource)
    }
}

/// Builds the agent config. The agent holds no secrets, so the returned
/// env-var table is always empty.
#[instrument(skip_all, fields(pipelines = pipelines.len()))]
pub fn build(pipelines: &[MetricPipeline], opts: &BuildOptions) -> Result<(Config, EnvVars)> {
    for pipeline in pipelines {
        validate_pipeline(&pipeline.name_any(), || pipeline.spec.input.validate())?;
    }

    let inputs = EnabledInputs::collect(pipelines);
    debug!(?inputs, "Collected enabled metric inputs");

    let mut config = Config::base();
    if inputs.runtime || inputs.prometheus || inputs.istio {
        config.add_exporter("otlp", gateway_exporter(&opts.gateway));
    }

    if inputs.runtime {
        add_runtime_pipeline(&mut config, &inputs, opts);
    }
    if inputs.prometheus {
        add_prometheus_pipeline(&mut config, opts);
    }
    if inputs.istio {
        add_istio_pipeline(&mut config, opts);
    }

    info!(
        runtime = inputs.runtime,
        prometheus = inputs.prometheus,
        istio = inputs.istio,
        "Built metric agent config"
    );
    Ok((config, EnvVars::new()))
}

fn memory_limiter(config: &mut Config) -> String {
    config.add_processor(
        processors::MEMORY_LIMITER_ID,
        processors::memory_limiter("1s", 75, 15),
    )
}

fn batch(config: &mut Config) -> String {
    config.add_processor(processors::BATCH_ID, processors::batch(1024, "10s", 1024))
}

fn delete_service_name(config: &mut Config) -> String {
    config.add_processor(
        processors::DELETE_SERVICE_NAME_ID,
        processors::delete_service_name(),
    )
}

fn set_scope(config: &mut Config, id: &str, version: &str, sources: &[ScopeSource]) -> String {
    config.add_processor(
        id,
        processors::instrumentation_scope(SignalType::Metric, version, sources),
    )
}

fn add_runtime_pipeline(config: &mut Config, inputs: &EnabledInputs, opts: &BuildOptions) {
    let receivers = vec![
        config.add_receiver(KUBELET_STATS_RECEIVER_ID, kubelet_stats_receiver(inputs)),
        config.add_receiver(K8S_CLUSTER_RECEIVER_ID, k8s_cluster_receiver(inputs, opts)),
    ];

    let mut processor_ids = vec![memory_limiter(config)];
    if inputs.has(RuntimeResource::Volume) {
        processor_ids.push(config.add_processor(
            DROP_NON_PVC_VOLUMES_ID,
            processors::metric_filter(vec![ottl::join_with_and(&[
                ottl::resource_attribute_is_not_nil("k8s.volume.name"),
                ottl::resource_attribute_not_equals("k8s.volume.type", "persistentVolumeClaim"),
            ])]),
        ));
    }
    processor_ids.push(delete_service_name(config));
    processor_ids.push(set_scope(
        config,
        "transform/set-instrumentation-scope-runtime",
        &opts.module_version,
        &[ScopeSource::Runtime, ScopeSource::K8sCluster],
    ));
    processor_ids.push(config.add_processor(INSERT_SKIP_ENRICHMENT_ID, insert_skip_enrichment()));
    processor_ids.push(batch(config));

    config.add_pipeline(
        "metrics/runtime",
        Pipeline {
            receivers,
            processors: processor_ids,
            exporters: vec!["otlp".to_string()],
        },
    );
}

fn add_prometheus_pipeline(config: &mut Config, opts: &BuildOptions) {
    let cert_path = opts.istio_cert_path();
    let receivers = vec![
        config.add_receiver(
            PROMETHEUS_APP_PODS_RECEIVER_ID,
            prometheus::app_receiver(DiscoveryRole::Pod, cert_path),
        ),
        config.add_receiver(
            PROMETHEUS_APP_SERVICES_RECEIVER_ID,
            prometheus::app_receiver(DiscoveryRole::Endpoints, cert_path),
        ),
    ];
    let processor_ids = vec![
        memory_limiter(config),
        delete_service_name(config),
        set_scope(
            config,
            "transform/set-instrumentation-scope-prometheus",
            &opts.module_version,
            &[ScopeSource::Prometheus],
        ),
        batch(config),
    ];

    config.add_pipeline(
        "metrics/prometheus",
        Pipeline {
            receivers,
            processors: processor_ids,
            exporters: vec!["otlp".to_string()],
        },
    );
}

fn add_istio_pipeline(config: &mut Config, opts: &BuildOptions) {
    let receivers = vec![config.add_receiver(
        PROMETHEUS_ISTIO_RECEIVER_ID,
        prometheus::istio_receiver(),
    )];
    let processor_ids = vec![
        memory_limiter(config),
        config.add_processor(
            processors::ISTIO_NOISE_FILTER_ID,
            processors::istio_noise_filter(),
        ),
        delete_service_name(config),
        set_scope(
            config,
            "transform/set-instrumentation-scope-istio",
            &opts.module_version,
            &[ScopeSource::Istio],
        ),
        batch(config),
    ];

    config.add_pipeline(
        "metrics/istio",
        Pipeline {
            receivers,
            processors: processor_ids,
            exporters: vec!["otlp".to_string()],
        },
    );
}

// ============================================================================
// Receivers
// ============================================================================

fn toggles<'a>(names: impl IntoIterator<Item = &'a str>, enabled: bool) -> BTreeMap<String, MetricToggle> {
    names
        .into_iter()
        .map(|name| (name.to_string(), MetricToggle { enabled }))
        .collect()
}

fn kubelet_stats_receiver(inputs: &EnabledInputs) -> Receiver {
    let metric_groups = [
        (RuntimeResource::Container, "container"),
        (RuntimeResource::Pod, "pod"),
        (RuntimeResource::Node, "node"),
        (RuntimeResource::Volume, "volume"),
    ]
    .into_iter()
    .filter(|(resource, _)| inputs.has(*resource))
    .map(|(_, group)| group.to_string())
    .collect();

    let mut metrics = toggles(KUBELET_ENABLED_METRICS, true);
    metrics.extend(toggles(KUBELET_DISABLED_METRICS, false));

    Receiver::KubeletStats(KubeletStatsReceiver {
        collection_interval: COLLECTION_INTERVAL.to_string(),
        auth_type: "serviceAccount".to_string(),
        endpoint: format!("https://{}:10250", node_name()),
        insecure_skip_verify: true,
        metric_groups,
        metrics,
        extra_metadata_labels: vec!["k8s.volume.type".to_string()],
    })
}

/// Cluster-state metrics reported for `resource`
fn k8s_cluster_resource_metrics(resource: RuntimeResource) -> &'static [&'static str] {
    match resource {
        RuntimeResource::Pod => &["k8s.pod.phase"],
        RuntimeResource::Container => &[
            "k8s.container.cpu_request",
            "k8s.container.cpu_limit",
            "k8s.container.memory_request",
            "k8s.container.memory_limit",
        ],
        RuntimeResource::Deployment => &["k8s.deployment.available", "k8s.deployment.desired"],
        RuntimeResource::StatefulSet => &[
            "k8s.statefulset.current_pods",
            "k8s.statefulset.desired_pods",
            "k8s.statefulset.ready_pods",
            "k8s.statefulset.updated_pods",
        ],
        RuntimeResource::DaemonSet => &[
            "k8s.daemonset.current_scheduled_nodes",
            "k8s.daemonset.desired_scheduled_nodes",
            "k8s.daemonset.misscheduled_nodes",
            "k8s.daemonset.ready_nodes",
        ],
        RuntimeResource::Job => &[
            "k8s.job.active_pods",
            "k8s.job.desired_successful_pods",
            "k8s.job.failed_pods",
            "k8s.job.max_parallel_pods",
            "k8s.job.successful_pods",
        ],
        RuntimeResource::Node | RuntimeResource::Volume => &[],
    }
}

fn k8s_cluster_receiver(inputs: &EnabledInputs, opts: &BuildOptions) -> Receiver {
    let mut metrics = toggles(K8S_CLUSTER_ALWAYS_DISABLED, false);
    for resource in RuntimeResource::ALL {
        if !inputs.has(resource) {
            metrics.extend(toggles(
                k8s_cluster_resource_metrics(resource).iter().copied(),
                false,
            ));
        }
    }

    Receiver::Singleton(SingletonReceiverCreator {
        auth_type: "serviceAccount".to_string(),
        leader_election: LeaderElection {
            lease_name: K8S_CLUSTER_LEASE.to_string(),
            lease_namespace: opts.agent_namespace.clone(),
        },
        receiver: SingletonReceiver::K8sCluster(K8sClusterReceiver {
            auth_type: "serviceAccount".to_string(),
            collection_interval: COLLECTION_INTERVAL.to_string(),
            node_conditions_to_report: vec![],
            metrics,
        }),
    })
}

/// Marks metrics of resources without a backing pod so the gateway routes
/// them past k8s attribute enrichment
fn insert_skip_enrichment() -> Processor {
    let conditions = ["node", "statefulset", "daemonset", "deployment", "job"]
        .iter()
        .map(|resource| ottl::is_match("metric.name", &format!("^k8s.{resource}.*")))
        .collect();

    processors::transform(
        SignalType::Metric,
        vec![TransformStatements {
            context: None,
            conditions,
            statements: vec![format!(
                r#"set(resource.attributes["{}"], "true")"#,
                processors::SKIP_ENRICHMENT_ATTRIBUTE
            )],
        }],
    )
}
