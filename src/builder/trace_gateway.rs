//! Trace gateway configuration
//!
//! Every TracePipeline becomes one `traces/<name>` service pipeline fed by
//! the shared OTLP receiver and ending in its own exporter.

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::queue_size;
use crate::config::otlp_exporter::OtlpExporterBuilder;
use crate::config::processors::{self, ClusterAttributes, Enrichments};
use crate::config::{otlp_receiver, Config, EnvVars, Pipeline, SignalType};
use crate::crd::TracePipeline;
use crate::error::Result;
use crate::secrets::SecretReader;

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(flatten)]
    pub cluster: ClusterAttributes,
    #[serde(default)]
    pub enrichments: Enrichments,
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
        pipelines: &[TracePipeline],
        opts: &BuildOptions,
    ) -> Result<(Config, EnvVars)> {
        let mut config = Config::base();
        let mut env = EnvVars::new();
        config.add_receiver("otlp", otlp_receiver());

        let queue_size = queue_size(pipelines.len());
        for pipeline in pipelines {
            let name = pipeline.name_any();
            let mut processor_ids = vec![
                config.add_processor(
                    processors::MEMORY_LIMITER_ID,
                    processors::memory_limiter("1s", 60, 40),
                ),
                config.add_processor(
                    processors::K8S_ATTRIBUTES_ID,
                    processors::k8s_attributes(&opts.enrichments),
                ),
                config.add_processor(
                    processors::ISTIO_NOISE_FILTER_ID,
                    processors::istio_noise_filter(),
                ),
            ];

            if let Some(transform) =
                processors::user_defined_transform(SignalType::Trace, &pipeline.spec.transforms)
            {
                processor_ids.push(
                    config.add_processor(&processors::user_defined_transform_id(&name), transform),
                );
            }
            if let Some(filter) =
                processors::user_defined_filter(SignalType::Trace, &pipeline.spec.filters)
            {
                processor_ids
                    .push(config.add_processor(&processors::user_defined_filter_id(&name), filter));
            }

            processor_ids.extend([
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
                config.add_processor(processors::BATCH_ID, processors::batch(512, "10s", 512)),
            ]);

            let exporter = OtlpExporterBuilder::new(
                self.reader,
                &pipeline.spec.output.otlp,
                &name,
                queue_size,
                SignalType::Trace,
            );
            let (body, exporter_env) = exporter.build(ctx).await?;
            let exporter_id = config.add_exporter(&exporter.exporter_id(), body);
            env.extend(exporter_env);

            let pipeline_id = format!("traces/{name}");
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
            "Built trace gateway config"
        );
        Ok((config, env))
    }
}
