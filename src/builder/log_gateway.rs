//! Log gateway configuration
//!
//! Receives OTLP logs from applications and from the log agent, enriches
//! them with Kubernetes metadata and ships each LogPipeline's share to its
//! own backend.

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::{queue_size, validate_pipeline};
use crate::config::otlp_exporter::OtlpExporterBuilder;
use crate::config::processors::{self, ClusterAttributes, Enrichments};
use crate::config::{
    otlp_receiver, Config, EnvVars, Pipeline, Processor, SignalType, TransformStatements,
};
use crate::crd::LogPipeline;
use crate::error::Result;
use crate::secrets::SecretReader;

const SET_OBSERVED_TIME_IF_ZERO_ID: &str = "transform/set-observed-time-if-zero";
const DROP_IF_INPUT_SOURCE_OTLP_ID: &str = "filter/drop-if-input-source-otlp";

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(flatten)]
    pub cluster: ClusterAttributes,
    #[serde(default)]
    pub enrichments: Enrichments,
    /// Version stamped on the instrumentation scope by `istio_enrichment`
    #[serde(default)]
    pub module_version: String,
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
        pipelines: &[LogPipeline],
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
            let processor_ids = add_processors(&mut config, pipeline, &name, opts);

            let exporter = OtlpExporterBuilder::new(
                self.reader,
                &pipeline.spec.output.otlp,
                &name,
                queue_size,
                SignalType::Log,
            );
            let (body, exporter_env) = exporter.build(ctx).await?;
            let exporter_id = config.add_exporter(&exporter.exporter_id(), body);
            env.extend(exporter_env);

            let pipeline_id = format!("logs/{name}");
            debug!(pipeline = %pipeline_id, "Adding service pipeline");
            config.add_pipeline(
                pipeline_id,
                Pipeline {
                    receivers: vec!["otlp".to_string()],
                    processors: processor_ids,
                    exporters: vec![exporter_id],
                },
            );
        }

        info!(
            pipelines = pipelines.len(),
            env_vars = env.len(),
            "Built log gateway config"
        );
        Ok((config, env))
    }
}

/// Registers the processors of one pipeline and returns their IDs in chain order
fn add_processors(
    config: &mut Config,
    pipeline: &LogPipeline,
    name: &str,
    opts: &BuildOptions,
) -> Vec<String> {
    let input = &pipeline.spec.input;
    let mut ids = vec![
        config.add_processor(
            processors::MEMORY_LIMITER_ID,
            processors::memory_limiter("1s", 75, 15),
        ),
        config.add_processor(SET_OBSERVED_TIME_IF_ZERO_ID, set_observed_time_if_zero()),
        config.add_processor(
            processors::ISTIO_NOISE_FILTER_ID,
            processors::istio_noise_filter(),
        ),
        config.add_processor(
            processors::K8S_ATTRIBUTES_ID,
            processors::k8s_attributes(&opts.enrichments),
        ),
    ];

    if !input.is_otlp_enabled() {
        ids.push(config.add_processor(
            DROP_IF_INPUT_SOURCE_OTLP_ID,
            processors::log_filter(vec!["(log.observed_time != nil or log.time != nil)".to_string()]),
        ));
    }

    ids.extend([
        config.add_processor(
            processors::INSERT_CLUSTER_ATTRIBUTES_ID,
            processors::insert_cluster_attributes(&opts.cluster),
        ),
        config.add_processor(
            processors::SERVICE_ENRICHMENT_ID,
            processors::service_enrichment(),
        ),
        config.add_processor(
            processors::DROP_KYMA_ATTRIBUTES_ID,
            processors::drop_kyma_attributes(),
        ),
        config.add_processor(
            processors::ISTIO_ENRICHMENT_ID,
            processors::istio_enrichment(&opts.module_version),
        ),
    ]);

    if input.is_otlp_enabled() {
        let expression = input.otlp_namespaces().and_then(|selector| {
            processors::namespace_filter_expression(&selector.include, &selector.exclude, None)
        });
        if let Some(expression) = expression {
            ids.push(config.add_processor(
                &format!("filter/{name}-filter-by-namespace"),
                processors::log_filter(vec![expression]),
            ));
        }
    }

    if let Some(transform) =
        processors::user_defined_transform(SignalType::Log, &pipeline.spec.transforms)
    {
        ids.push(config.add_processor(&processors::user_defined_transform_id(name), transform));
    }
    if let Some(filter) = processors::user_defined_filter(SignalType::Log, &pipeline.spec.filters) {
        ids.push(config.add_processor(&processors::user_defined_filter_id(name), filter));
    }

    ids.push(config.add_processor(processors::BATCH_ID, processors::batch(512, "10s", 512)));
    ids
}

fn set_observed_time_if_zero() -> Processor {
    processors::transform(
        SignalType::Log,
        vec![TransformStatements {
            context: None,
            conditions: vec!["log.observed_time_unix_nano == 0".to_string()],
            statements: vec!["set(log.observed_time, Now())".to_string()],
        }],
    )
}
