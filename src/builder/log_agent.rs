//! Log agent configuration
//!
//! Tails container logs on each node and forwards them unfiltered to the log
//! gateway. Per-pipeline selection happens in the gateway.

use kube::ResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::{gateway_exporter, validate_pipeline, GatewayService};
use crate::config::processors::{self, ScopeSource};
use crate::config::{
    Config, EnvVars, Extension, FileLogOperator, FileLogReceiver, FileStorageExtension, Pipeline,
    Processor, Receiver, RetryOnFailure, SignalType, TransformStatements,
};
use crate::crd::LogPipeline;
use crate::error::Result;

pub const FILE_STORAGE_EXTENSION_ID: &str = "file_storage";
pub const FILELOG_RECEIVER_ID: &str = "filelog";
pub const CHECKPOINT_DIRECTORY: &str = "/var/lib/otelcol";

const LOG_PODS_DIR: &str = "/var/log/pods";

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    /// Service of the log gateway everything is forwarded to
    pub gateway: GatewayService,
    /// Namespace the agent itself runs in; its own logs are not collected
    #[serde(default)]
    pub agent_namespace: String,
    #[serde(default)]
    pub module_version: String,
}

/// Builds the agent config. Without any application input the agent has no
/// pipeline and only the base extensions are rendered.
#[instrument(skip_all, fields(pipelines = pipelines.len()))]
pub fn build(pipelines: &[LogPipeline], opts: &BuildOptions) -> Result<(Config, EnvVars)> {
    for pipeline in pipelines {
        validate_pipeline(&pipeline.name_any(), || pipeline.spec.input.validate())?;
    }

    let mut config = Config::base();
    let application: Vec<&LogPipeline> = pipelines
        .iter()
        .filter(|p| p.spec.input.is_application_enabled())
        .collect();
    if application.is_empty() {
        info!("No application input enabled, skipping logs pipeline");
        return Ok((config, EnvVars::new()));
    }

    let keep_original_body = application
        .iter()
        .any(|p| p.spec.input.keep_original_body());

    config.add_extension(
        FILE_STORAGE_EXTENSION_ID,
        Extension::FileStorage(FileStorageExtension {
            directory: CHECKPOINT_DIRECTORY.to_string(),
        }),
    );

    let receiver_id = config.add_receiver(
        FILELOG_RECEIVER_ID,
        filelog_receiver(&opts.agent_namespace, keep_original_body),
    );
    let processor_ids = vec![
        config.add_processor(
            processors::MEMORY_LIMITER_ID,
            processors::memory_limiter("5s", 80, 25),
        ),
        config.add_processor(
            "transform/set-instrumentation-scope-runtime",
            set_scope_runtime(&opts.module_version),
        ),
    ];
    let exporter_id = config.add_exporter("otlp", gateway_exporter(&opts.gateway));

    config.add_pipeline(
        "logs",
        Pipeline {
            receivers: vec![receiver_id],
            processors: processor_ids,
            exporters: vec![exporter_id],
        },
    );

    info!(
        pipelines = application.len(),
        keep_original_body, "Built log agent config"
    );
    Ok((config, EnvVars::new()))
}

fn set_scope_runtime(version: &str) -> Processor {
    processors::transform(
        SignalType::Log,
        vec![TransformStatements {
            context: Some("scope".to_string()),
            conditions: vec![],
            statements: vec![
                format!(r#"set(version, "{version}")"#),
                format!(r#"set(name, "{}")"#, ScopeSource::Runtime.canonical()),
            ],
        }],
    )
}

fn filelog_receiver(agent_namespace: &str, keep_original_body: bool) -> Receiver {
    Receiver::FileLog(FileLogReceiver {
        exclude: ["telemetry-log-agent", "telemetry-fluent-bit"]
            .iter()
            .map(|pod| format!("{LOG_PODS_DIR}/{agent_namespace}_{pod}*/*/*.log"))
            .collect(),
        include: vec![format!("{LOG_PODS_DIR}/*/*/*.log")],
        include_file_name: false,
        include_file_path: true,
        start_at: "beginning".to_string(),
        storage: FILE_STORAGE_EXTENSION_ID.to_string(),
        retry_on_failure: RetryOnFailure::default(),
        operators: operators(keep_original_body),
    })
}

fn operators(keep_original_body: bool) -> Vec<FileLogOperator> {
    let mut operators = vec![
        FileLogOperator {
            id: "containerd-parser".to_string(),
            kind: "container".to_string(),
            format: Some("containerd".to_string()),
            add_metadata_from_file_path: Some(true),
            ..Default::default()
        },
        FileLogOperator {
            id: "move-to-log-stream".to_string(),
            kind: "move".to_string(),
            if_expr: Some(r#"attributes["stream"] != nil"#.to_string()),
            from: Some(r#"attributes["stream"]"#.to_string()),
            to: Some(r#"attributes["log.iostream"]"#.to_string()),
            ..Default::default()
        },
        FileLogOperator {
            id: "json-parser".to_string(),
            kind: "json_parser".to_string(),
            if_expr: Some(r#"body matches "^{.*}$""#.to_string()),
            parse_from: Some("body".to_string()),
            parse_to: Some("attributes".to_string()),
            ..Default::default()
        },
    ];

    if keep_original_body {
        operators.push(FileLogOperator {
            id: "copy-body-to-attributes-original".to_string(),
            kind: "copy".to_string(),
            from: Some("body".to_string()),
            to: Some(r#"attributes["original"]"#.to_string()),
            ..Default::default()
        });
    }

    operators.extend([
        FileLogOperator {
            id: "move-message-to-body".to_string(),
            kind: "move".to_string(),
            if_expr: Some(r#"attributes["message"] != nil"#.to_string()),
            from: Some(r#"attributes["message"]"#.to_string()),
            to: Some("body".to_string()),
            ..Default::default()
        },
        FileLogOperator {
            id: "parse-level".to_string(),
            kind: "severity_parser".to_string(),
            if_expr: Some(r#"attributes["level"] != nil"#.to_string()),
            parse_from: Some(r#"attributes["level"]"#.to_string()),
            ..Default::default()
        },
    ]);
    operators
}
