//! Property tests over randomly generated pipeline sets.
//!
//! For any set of pipelines the compiled output must be:
//! - deterministic (same input, same bytes)
//! - closed over env vars: every `${VAR}` is backed by the env table, and
//!   every env entry is referenced
//! - closed over components: every ID a service pipeline names exists
//! - within the shared sending-queue budget

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use proptest::prelude::*;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use telemetry_config::builder::{
    log_agent, log_gateway, metric_agent, metric_gateway, trace_gateway, GatewayService,
    MAX_QUEUE_SIZE,
};
use telemetry_config::config::env_vars::RUNTIME_ENV_VARS;
use telemetry_config::config::{Config, EnvVars};
use telemetry_config::crd::{
    ApplicationInput, AuthenticationOptions, BasicAuthOptions, FilterSpec, Header, IstioInput,
    LogPipeline, LogPipelineInput, LogPipelineSpec, MetricPipeline, MetricPipelineInput,
    MetricPipelineSpec, NamespaceSelector, OtlpInput, OtlpOutput, OtlpProtocol, OutputTls,
    PipelineOutput, PrometheusInput, RuntimeInput, RuntimeResources, Toggle, TracePipeline,
    TracePipelineSpec, TransformSpec, ValueType,
};
use telemetry_config::secrets::InMemorySecretReader;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z0-9_]+)\}").expect("failed creating regex"));

// --- Strategies ---

fn toggle() -> impl Strategy<Value = Option<Toggle>> {
    proptest::option::of(proptest::option::of(any::<bool>()).prop_map(|enabled| Toggle { enabled }))
}

fn namespaces() -> impl Strategy<Value = Option<NamespaceSelector>> {
    let list = prop::collection::vec("[a-z]{1,6}", 1..3);
    prop_oneof![
        Just(None),
        list.clone().prop_map(|include| Some(NamespaceSelector {
            include,
            exclude: vec![],
        })),
        list.prop_map(|exclude| Some(NamespaceSelector {
            include: vec![],
            exclude,
        })),
    ]
}

fn runtime_resources() -> impl Strategy<Value = Option<RuntimeResources>> {
    proptest::option::of(
        (toggle(), toggle(), toggle(), toggle(), toggle(), toggle(), toggle(), toggle()).prop_map(
            |(pod, container, node, volume, deployment, daemonset, statefulset, job)| {
                RuntimeResources {
                    pod,
                    container,
                    node,
                    volume,
                    deployment,
                    daemonset,
                    statefulset,
                    job,
                }
            },
        ),
    )
}

fn enabled() -> impl Strategy<Value = Option<bool>> {
    proptest::option::of(any::<bool>())
}

fn metric_input() -> impl Strategy<Value = MetricPipelineInput> {
    (
        (enabled(), namespaces(), runtime_resources()),
        (enabled(), namespaces(), toggle()),
        (enabled(), namespaces(), toggle(), toggle()),
        (enabled(), namespaces()),
    )
        .prop_map(|(runtime, prometheus, istio, otlp)| MetricPipelineInput {
            runtime: Some(RuntimeInput {
                enabled: runtime.0,
                namespaces: runtime.1,
                resources: runtime.2,
            }),
            prometheus: Some(PrometheusInput {
                enabled: prometheus.0,
                namespaces: prometheus.1,
                diagnostic_metrics: prometheus.2,
            }),
            istio: Some(IstioInput {
                enabled: istio.0,
                namespaces: istio.1,
                diagnostic_metrics: istio.2,
                envoy_metrics: istio.3,
            }),
            otlp: Some(OtlpInput {
                enabled: otlp.0,
                namespaces: otlp.1,
            }),
        })
}

fn output() -> impl Strategy<Value = PipelineOutput> {
    (
        prop_oneof![Just(OtlpProtocol::Grpc), Just(OtlpProtocol::Http)],
        prop_oneof![Just("http://"), Just("https://")],
        "[a-z]{1,8}",
        proptest::option::of("/[a-z]{1,6}"),
        any::<bool>(),
        // distinct lowercase names never share an env var
        prop::collection::btree_map("[a-z][a-z-]{0,8}", "[a-z]{1,6}", 0..3),
        any::<bool>(),
    )
        .prop_map(|(protocol, scheme, host, path, basic_auth, headers, mtls)| {
            PipelineOutput {
                otlp: OtlpOutput {
                    protocol,
                    endpoint: ValueType::from_value(format!("{scheme}{host}:4317")),
                    path,
                    authentication: basic_auth.then(|| AuthenticationOptions {
                        basic: Some(BasicAuthOptions {
                            user: ValueType::from_value("user"),
                            password: ValueType::from_value("secret"),
                        }),
                    }),
                    headers: headers
                        .into_iter()
                        .map(|(name, value)| Header {
                            name,
                            prefix: String::new(),
                            value: ValueType::from_value(value),
                        })
                        .collect(),
                    tls: mtls.then(|| OutputTls {
                        ca: Some(ValueType::from_value("ca")),
                        cert: Some(ValueType::from_value("cert")),
                        key: Some(ValueType::from_value("key")),
                        ..Default::default()
                    }),
                },
            }
        })
}

/// Distinct names, already sorted
fn names(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::btree_set("[a-z]{1,8}", 0..max)
        .prop_map(|set| set.into_iter().collect())
}

fn metric_pipelines() -> impl Strategy<Value = Vec<MetricPipeline>> {
    names(5).prop_flat_map(|names| {
        let len = names.len();
        (
            Just(names),
            prop::collection::vec((metric_input(), output()), len),
        )
            .prop_map(|(names, specs)| {
                names
                    .iter()
                    .zip(specs)
                    .map(|(name, (input, output))| {
                        MetricPipeline::new(
                            name,
                            MetricPipelineSpec {
                                input,
                                output,
                                ..Default::default()
                            },
                        )
                    })
                    .collect()
            })
    })
}

fn log_pipelines() -> impl Strategy<Value = Vec<LogPipeline>> {
    names(5).prop_flat_map(|names| {
        let len = names.len();
        (
            Just(names),
            prop::collection::vec(
                (enabled(), enabled(), enabled(), namespaces(), output()),
                len,
            ),
        )
            .prop_map(|(names, specs)| {
                names
                    .iter()
                    .zip(specs)
                    .map(|(name, (app, keep_body, otlp, selector, output))| {
                        LogPipeline::new(
                            name,
                            LogPipelineSpec {
                                input: LogPipelineInput {
                                    application: Some(ApplicationInput {
                                        enabled: app,
                                        keep_original_body: keep_body,
                                    }),
                                    otlp: Some(OtlpInput {
                                        enabled: otlp,
                                        namespaces: selector,
                                    }),
                                },
                                output,
                                ..Default::default()
                            },
                        )
                    })
                    .collect()
            })
    })
}

fn trace_pipelines() -> impl Strategy<Value = Vec<TracePipeline>> {
    names(5).prop_flat_map(|names| {
        let len = names.len();
        (
            Just(names),
            prop::collection::vec((any::<bool>(), any::<bool>(), output()), len),
        )
            .prop_map(|(names, specs)| {
                names
                    .iter()
                    .zip(specs)
                    .map(|(name, (transform, filter, output))| {
                        TracePipeline::new(
                            name,
                            TracePipelineSpec {
                                transforms: transform
                                    .then(|| TransformSpec {
                                        conditions: vec![],
                                        statements: vec![
                                            r#"set(span.attributes["team"], "a")"#.to_string(),
                                        ],
                                    })
                                    .into_iter()
                                    .collect(),
                                filters: filter
                                    .then(|| FilterSpec {
                                        conditions: vec![r#"span.name == "health""#.to_string()],
                                    })
                                    .into_iter()
                                    .collect(),
                                output,
                            },
                        )
                    })
                    .collect()
            })
    })
}

// --- Build helpers ---

fn build_metric_gateway(pipelines: &[MetricPipeline]) -> (Config, EnvVars) {
    let reader = InMemorySecretReader::new();
    let opts = metric_gateway::BuildOptions {
        module_version: "1.0.0".to_string(),
        gateway_namespace: "kyma-system".to_string(),
        kyma_input_allowed: true,
        ..Default::default()
    };
    tokio_test::block_on(
        metric_gateway::Builder::new(&reader).build(&CancellationToken::new(), pipelines, &opts),
    )
    .unwrap()
}

fn build_log_gateway(pipelines: &[LogPipeline]) -> (Config, EnvVars) {
    let reader = InMemorySecretReader::new();
    let opts = log_gateway::BuildOptions {
        module_version: "1.0.0".to_string(),
        ..Default::default()
    };
    tokio_test::block_on(
        log_gateway::Builder::new(&reader).build(&CancellationToken::new(), pipelines, &opts),
    )
    .unwrap()
}

fn build_trace_gateway(pipelines: &[TracePipeline]) -> (Config, EnvVars) {
    let reader = InMemorySecretReader::new();
    let opts = trace_gateway::BuildOptions::default();
    tokio_test::block_on(
        trace_gateway::Builder::new(&reader).build(&CancellationToken::new(), pipelines, &opts),
    )
    .unwrap()
}

// --- Checks ---

fn check_env_closure(config: &Config, env: &EnvVars) -> Result<(), TestCaseError> {
    let yaml = config.to_yaml().unwrap();
    let referenced: BTreeSet<&str> = PLACEHOLDER
        .captures_iter(&yaml)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .filter(|name| !RUNTIME_ENV_VARS.contains(name))
        .collect();
    let provided: BTreeSet<&str> = env.keys().map(String::as_str).collect();
    prop_assert_eq!(referenced, provided);
    Ok(())
}

fn check_component_closure(config: &Config) -> Result<(), TestCaseError> {
    for (pipeline_id, pipeline) in &config.service.pipelines {
        for id in &pipeline.receivers {
            prop_assert!(
                config.receivers.contains_key(id) || config.connectors.contains_key(id),
                "{pipeline_id}: unknown receiver {id}"
            );
        }
        for id in &pipeline.processors {
            prop_assert!(
                config.processors.contains_key(id),
                "{pipeline_id}: unknown processor {id}"
            );
        }
        for id in &pipeline.exporters {
            prop_assert!(
                config.exporters.contains_key(id) || config.connectors.contains_key(id),
                "{pipeline_id}: unknown exporter {id}"
            );
        }
    }
    for id in &config.service.extensions {
        prop_assert!(config.extensions.contains_key(id), "unknown extension {id}");
    }
    Ok(())
}

fn check_queue_budget(config: &Config, pipeline_count: usize) -> Result<(), TestCaseError> {
    let value = serde_json::to_value(&config.exporters).unwrap();
    let total: i64 = value
        .as_object()
        .unwrap()
        .values()
        .filter_map(|exporter| exporter["sending_queue"]["queue_size"].as_i64())
        .sum();
    let expected = if pipeline_count == 0 {
        0
    } else {
        MAX_QUEUE_SIZE / pipeline_count as i64 * pipeline_count as i64
    };
    prop_assert_eq!(total, expected);
    prop_assert!(total <= MAX_QUEUE_SIZE);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn metric_gateway_properties(pipelines in metric_pipelines()) {
        let (config, env) = build_metric_gateway(&pipelines);
        let (again, again_env) = build_metric_gateway(&pipelines);

        prop_assert_eq!(config.to_yaml().unwrap(), again.to_yaml().unwrap());
        prop_assert_eq!(&env, &again_env);
        check_env_closure(&config, &env)?;
        check_component_closure(&config)?;
        check_queue_budget(&config, pipelines.len())?;
    }

    #[test]
    fn log_gateway_properties(pipelines in log_pipelines()) {
        let (config, env) = build_log_gateway(&pipelines);
        let (again, _) = build_log_gateway(&pipelines);

        prop_assert_eq!(config.to_yaml().unwrap(), again.to_yaml().unwrap());
        check_env_closure(&config, &env)?;
        check_component_closure(&config)?;
        check_queue_budget(&config, pipelines.len())?;
    }

    #[test]
    fn metric_agent_properties(pipelines in metric_pipelines()) {
        let opts = metric_agent::BuildOptions {
            gateway: GatewayService::new("telemetry-otlp-metrics", "kyma-system"),
            agent_namespace: "kyma-system".to_string(),
            istio_enabled: true,
            ..Default::default()
        };
        let (config, env) = metric_agent::build(&pipelines, &opts).unwrap();
        let (again, _) = metric_agent::build(&pipelines, &opts).unwrap();

        prop_assert_eq!(config.to_yaml().unwrap(), again.to_yaml().unwrap());
        prop_assert!(env.is_empty());
        check_env_closure(&config, &env)?;
        check_component_closure(&config)?;
    }

    #[test]
    fn trace_gateway_properties(pipelines in trace_pipelines()) {
        let (config, env) = build_trace_gateway(&pipelines);
        let (again, again_env) = build_trace_gateway(&pipelines);

        prop_assert_eq!(config.to_yaml().unwrap(), again.to_yaml().unwrap());
        prop_assert_eq!(&env, &again_env);
        check_env_closure(&config, &env)?;
        check_component_closure(&config)?;
        check_queue_budget(&config, pipelines.len())?;
    }

    #[test]
    fn log_agent_properties(pipelines in log_pipelines()) {
        let opts = log_agent::BuildOptions {
            gateway: GatewayService::new("telemetry-otlp-logs", "kyma-system"),
            agent_namespace: "kyma-system".to_string(),
            module_version: "1.0.0".to_string(),
        };
        let (config, env) = log_agent::build(&pipelines, &opts).unwrap();
        let (again, _) = log_agent::build(&pipelines, &opts).unwrap();

        prop_assert_eq!(config.to_yaml().unwrap(), again.to_yaml().unwrap());
        prop_assert!(env.is_empty());
        check_env_closure(&config, &env)?;
        check_component_closure(&config)?;
    }
}
