//! Metric gateway configuration
//!
//! Each MetricPipeline is split into three service pipelines joined by a
//! routing and a forward connector:
//!
//! ```text
//! metrics/<name>-input ──routing/<name>──┬──────────────────────────────┐
//!                                        │                              ▼
//!                                        └─► metrics/<name>-attributes-enrichment ─forward/<name>─► metrics/<name>-output
//! ```
//!
//! Data carrying the skip-enrichment attribute goes straight to the output
//! pipeline; everything else passes through k8s attribute enrichment first.
//! Input-source selection happens in the output pipeline, where every metric
//! is recognised by its instrumentation scope.

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{queue_size, validate_pipeline};
use crate::config::otlp_exporter::OtlpExporterBuilder;
use crate::config::processors::{self, ClusterAttributes, Enrichments, ScopeSource};
use crate::config::{
    ottl, otlp_receiver, Config, Connector, EnvVars, ForwardConnector, GroupVersionResource,
    KymaStatsReceiver, LeaderElection, Pipeline, Receiver, RoutingConnector, RoutingTableEntry,
    SignalType, SingletonReceiver, SingletonReceiverCreator,
};
use crate::crd::{MetricInputSource, MetricPipeline, MetricPipelineInput, RuntimeResource};
use crate::error::Result;
use crate::secrets::SecretReader;

pub const KYMA_STATS_RECEIVER_ID: &str = "singleton_receiver_creator/kymastats";
const KYMA_STATS_LEASE: &str = "telemetry-metric-gateway-kymastats";

const SET_SCOPE_RUNTIME_ID: &str = "transform/set-instrumentation-scope-runtime";
const SET_SCOPE_KYMA_ID: &str = "transform/set-instrumentation-scope-kyma";
const DROP_ENVOY_METRICS_ID: &str = "filter/drop-envoy-metrics-if-disabled";

const DIAGNOSTIC_METRICS: [&str; 5] = [
    "up",
    "scrape_duration_seconds",
    "scrape_samples_scraped",
    "scrape_samples_post_metric_relabeling",
    "scrape_series_added",
];

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(flatten)]
    pub cluster: ClusterAttributes,
    #[serde(default)]
    pub enrichments: Enrichments,
    /// Version written to rewritten instrumentation scopes
    #[serde(default)]
    pub module_version: String,
    /// Namespace holding the kymastats leader-election lease
    #[serde(default)]
    pub gateway_namespace: String,
    /// Scrape the module's own resources with the kymastats receiver
    #[serde(default)]
    pub kyma_input_allowed: bool,
}

pub struct Builder<'a> {
    reader: &'a dyn SecretReader,
}

impl<'a> Builder<'a> {
    pub fn new(reader: &'a dyn SecretReader) -> Self {
        Self { reader }
    }

    #[instrument(skip_all, fields(pipelines = pipelines.len()))]
    pub async fn build(
        &self,
        ctx: &CancellationToken,
        pipelines: &[MetricPipeline],
        opts: &BuildOptions,
    ) -> Result<(Config, EnvVars)> {
        for pipeline in pipelines {
            validate_pipeline(&pipeline.name_any(), || pipeline.spec.input.validate())?;
        }

        let mut config = Config::base();
        let mut env = EnvVars::new();
        config.add_receiver("otlp", otlp_receiver());

        let queue_size = queue_size(pipelines.len());
        for pipeline in pipelines {
            let name = pipeline.name_any();

            let exporter = OtlpExporterBuilder::new(
                self.reader,
                &pipeline.spec.output.otlp,
                &name,
                queue_size,
                SignalType::Metric,
            );
            let (body, exporter_env) = exporter.build(ctx).await?;
            let exporter_id = config.add_exporter(&exporter.exporter_id(), body);
            env.extend(exporter_env);

            add_service_pipelines(&mut config, pipeline, &name, &exporter_id, opts);
        }

        info!(
            pipelines = pipelines.len(),
            env_vars = env.len(),
            "Built metric gateway config"
        );
        Ok((config, env))
    }
}

fn input_pipeline_id(name: &str) -> String {
    format!("metrics/{name}-input")
}

fn enrichment_pipeline_id(name: &str) -> String {
    format!("metrics/{name}-attributes-enrichment")
}

fn output_pipeline_id(name: &str) -> String {
    format!("metrics/{name}-output")
}

fn add_service_pipelines(
    config: &mut Config,
    pipeline: &MetricPipeline,
    name: &str,
    exporter_id: &str,
    opts: &BuildOptions,
) {
    let routing_id = config.add_connector(&format!("routing/{name}"), routing_connector(name));
    let forward_id = config.add_connector(
        &format!("forward/{name}"),
        Connector::Forward(ForwardConnector {}),
    );

    let mut receivers = vec!["otlp".to_string()];
    if opts.kyma_input_allowed {
        receivers.push(config.add_receiver(KYMA_STATS_RECEIVER_ID, kyma_stats_receiver(opts)));
    }
    let input = Pipeline {
        receivers,
        processors: vec![config.add_processor(
            processors::MEMORY_LIMITER_ID,
            processors::memory_limiter("1s", 75, 15),
        )],
        exporters: vec![routing_id.clone()],
    };

    let enrichment = Pipeline {
        receivers: vec![routing_id.clone()],
        processors: vec![
            config.add_processor(
                processors::K8S_ATTRIBUTES_ID,
                processors::k8s_attributes(&opts.enrichments),
            ),
            config.add_processor(
                processors::RESOLVE_SERVICE_NAME_ID,
                processors::resolve_service_name(),
            ),
        ],
        exporters: vec![forward_id.clone()],
    };

    let output = Pipeline {
        receivers: vec![routing_id, forward_id],
        processors: output_processors(config, pipeline, name, opts),
        exporters: vec![exporter_id.to_string()],
    };

    for (id, service_pipeline) in [
        (input_pipeline_id(name), input),
        (enrichment_pipeline_id(name), enrichment),
        (output_pipeline_id(name), output),
    ] {
        debug!(pipeline = %id, "Adding service pipeline");
        config.add_pipeline(id, service_pipeline);
    }
}

fn routing_connector(name: &str) -> Connector {
    Connector::Routing(RoutingConnector {
        default_pipelines: vec![enrichment_pipeline_id(name)],
        error_mode: "ignore".to_string(),
        table: vec![RoutingTableEntry {
            statement: format!(
                r#"route() where attributes["{}"] == "true""#,
                processors::SKIP_ENRICHMENT_ATTRIBUTE
            ),
            pipelines: vec![output_pipeline_id(name)],
        }],
    })
}

fn kyma_stats_receiver(opts: &BuildOptions) -> Receiver {
    let resource = |group: &str, resource: &str| GroupVersionResource {
        group: group.to_string(),
        version: "v1alpha1".to_string(),
        resource: resource.to_string(),
    };
    Receiver::Singleton(SingletonReceiverCreator {
        auth_type: "serviceAccount".to_string(),
        leader_election: LeaderElection {
            lease_name: KYMA_STATS_LEASE.to_string(),
            lease_namespace: opts.gateway_namespace.clone(),
        },
        receiver: SingletonReceiver::KymaStats(KymaStatsReceiver {
            auth_type: "serviceAccount".to_string(),
            collection_interval: "30s".to_string(),
            resources: vec![
                resource("operator.kyma-project.io", "telemetries"),
                resource("telemetry.kyma-project.io", "logpipelines"),
                resource("telemetry.kyma-project.io", "metricpipelines"),
                resource("telemetry.kyma-project.io", "tracepipelines"),
            ],
        }),
    })
}

// ============================================================================
// Output chain
// ============================================================================

/// OTTL condition matching metrics that came in through `source`. OTLP
/// metrics carry no scope of their own and are matched by exclusion.
fn input_source_condition(source: MetricInputSource) -> String {
    let scope = match source {
        MetricInputSource::Runtime => ScopeSource::Runtime,
        MetricInputSource::Prometheus => ScopeSource::Prometheus,
        MetricInputSource::Istio => ScopeSource::Istio,
        MetricInputSource::Otlp => {
            let known: Vec<String> = [
                ScopeSource::Runtime,
                ScopeSource::Prometheus,
                ScopeSource::Istio,
                ScopeSource::Kyma,
            ]
            .iter()
            .map(|scope| ottl::scope_name_equals(scope.canonical()))
            .collect();
            return ottl::not(&ottl::join_with_or(&known));
        }
    };
    ottl::scope_name_equals(scope.canonical())
}

fn runtime_resource_regex(resource: RuntimeResource) -> &'static str {
    match resource {
        RuntimeResource::Pod => "^k8s.pod.*",
        RuntimeResource::Container => "(^k8s.container.*)|(^container.*)",
        RuntimeResource::Node => "^k8s.node.*",
        RuntimeResource::Volume => "^k8s.volume.*",
        RuntimeResource::Deployment => "^k8s.deployment.*",
        RuntimeResource::DaemonSet => "^k8s.daemonset.*",
        RuntimeResource::StatefulSet => "^k8s.statefulset.*",
        RuntimeResource::Job => "^k8s.job.*",
    }
}

fn diagnostic_metrics_expression(source: MetricInputSource) -> String {
    let names: Vec<String> = DIAGNOSTIC_METRICS
        .iter()
        .map(|name| ottl::name_attribute_equals(name))
        .collect();
    ottl::join_with_and(&[input_source_condition(source), ottl::join_with_or(&names)])
}

fn output_processors(
    config: &mut Config,
    pipeline: &MetricPipeline,
    name: &str,
    opts: &BuildOptions,
) -> Vec<String> {
    let input = &pipeline.spec.input;
    let mut ids = Vec::new();

    if input.is_enabled(MetricInputSource::Runtime) {
        ids.push(config.add_processor(
            SET_SCOPE_RUNTIME_ID,
            processors::instrumentation_scope(
                SignalType::Metric,
                &opts.module_version,
                &[ScopeSource::Runtime],
            ),
        ));
    }
    ids.push(config.add_processor(
        SET_SCOPE_KYMA_ID,
        processors::instrumentation_scope(
            SignalType::Metric,
            &opts.module_version,
            &[ScopeSource::Kyma],
        ),
    ));

    for source in MetricInputSource::ALL {
        if !input.is_enabled(source) {
            ids.push(config.add_processor(
                &format!("filter/drop-if-input-source-{source}"),
                processors::metric_filter(vec![input_source_condition(source)]),
            ));
        }
    }

    for source in MetricInputSource::ALL {
        if !input.is_enabled(source) {
            continue;
        }
        let condition = input_source_condition(source);
        let expression = input.namespaces(source).and_then(|selector| {
            processors::namespace_filter_expression(
                &selector.include,
                &selector.exclude,
                Some(&condition),
            )
        });
        if let Some(expression) = expression {
            ids.push(config.add_processor(
                &format!("filter/{name}-filter-by-namespace-{source}-input"),
                processors::metric_filter(vec![expression]),
            ));
        }
    }

    if input.is_enabled(MetricInputSource::Runtime) {
        add_runtime_resource_filters(config, input, &mut ids);
    }

    if input.is_enabled(MetricInputSource::Prometheus) && !input.is_prometheus_diagnostic_enabled() {
        ids.push(config.add_processor(
            "filter/drop-diagnostic-metrics-if-input-source-prometheus",
            processors::metric_filter(vec![diagnostic_metrics_expression(
                MetricInputSource::Prometheus,
            )]),
        ));
    }
    if input.is_enabled(MetricInputSource::Istio) && !input.is_istio_diagnostic_enabled() {
        ids.push(config.add_processor(
            "filter/drop-diagnostic-metrics-if-input-source-istio",
            processors::metric_filter(vec![diagnostic_metrics_expression(
                MetricInputSource::Istio,
            )]),
        ));
    }
    if input.is_enabled(MetricInputSource::Istio) && !input.is_envoy_metrics_enabled() {
        ids.push(config.add_processor(
            DROP_ENVOY_METRICS_ID,
            processors::metric_filter(vec![ottl::join_with_and(&[
                ottl::is_match("name", "^envoy_.*"),
                input_source_condition(MetricInputSource::Istio),
            ])]),
        ));
    }

    ids.extend([
        config.add_processor(
            processors::INSERT_CLUSTER_ATTRIBUTES_ID,
            processors::insert_cluster_attributes(&opts.cluster),
        ),
        config.add_processor(
            processors::DELETE_SKIP_ENRICHMENT_ATTRIBUTE_ID,
            processors::delete_skip_enrichment_attribute(),
        ),
        config.add_processor(
            processors::DROP_KYMA_ATTRIBUTES_ID,
            processors::drop_kyma_attributes(),
        ),
    ]);

    if let Some(transform) =
        processors::user_defined_transform(SignalType::Metric, &pipeline.spec.transforms)
    {
        ids.push(config.add_processor(&processors::user_defined_transform_id(name), transform));
    }
    if let Some(filter) =
        processors::user_defined_filter(SignalType::Metric, &pipeline.spec.filters)
    {
        ids.push(config.add_processor(&processors::user_defined_filter_id(name), filter));
    }

    ids.push(config.add_processor(processors::BATCH_ID, processors::batch(1024, "10s", 1024)));
    ids
}

fn add_runtime_resource_filters(
    config: &mut Config,
    input: &MetricPipelineInput,
    ids: &mut Vec<String>,
) {
    let runtime = input_source_condition(MetricInputSource::Runtime);
    for resource in RuntimeResource::ALL {
        if input.is_runtime_resource_enabled(resource) {
            continue;
        }
        let expression = ottl::join_with_and(&[
            runtime.clone(),
            ottl::is_match("name", runtime_resource_regex(resource)),
        ]);
        ids.push(config.add_processor(
            &format!("filter/drop-runtime-{}-metrics", resource.as_str()),
            processors::metric_filter(vec![expression]),
        ));
    }
}
