//! Processor bodies shared by several signal builders

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::components::*;
use super::ottl;
use super::SignalType;
use crate::crd::{FilterSpec, TransformSpec};

pub const MEMORY_LIMITER_ID: &str = "memory_limiter";
pub const BATCH_ID: &str = "batch";
pub const K8S_ATTRIBUTES_ID: &str = "k8sattributes";
pub const INSERT_CLUSTER_ATTRIBUTES_ID: &str = "resource/insert-cluster-attributes";
pub const DROP_KYMA_ATTRIBUTES_ID: &str = "resource/drop-kyma-attributes";
pub const DELETE_SKIP_ENRICHMENT_ATTRIBUTE_ID: &str = "resource/delete-skip-enrichment-attribute";
pub const DELETE_SERVICE_NAME_ID: &str = "resource/delete-service-name";
pub const SERVICE_ENRICHMENT_ID: &str = "service_enrichment";
pub const RESOLVE_SERVICE_NAME_ID: &str = "transform/resolve-service-name";
pub const ISTIO_NOISE_FILTER_ID: &str = "istio_noise_filter";
pub const ISTIO_ENRICHMENT_ID: &str = "istio_enrichment";

pub const SKIP_ENRICHMENT_ATTRIBUTE: &str = "io.kyma-project.telemetry.skip_enrichment";

const ERROR_MODE_IGNORE: &str = "ignore";
const KYMA_K8S_IO_APP_NAME: &str = "kyma.kubernetes_io_app_name";
const KYMA_APP_NAME: &str = "kyma.app_name";

/// Origin of a metric, as told by its instrumentation scope
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeSource {
    Runtime,
    K8sCluster,
    Prometheus,
    Istio,
    Kyma,
}

impl ScopeSource {
    /// Scope name set by the upstream receiver
    pub fn upstream(&self) -> &'static str {
        match self {
            ScopeSource::Runtime => "otelcol/kubeletstatsreceiver",
            ScopeSource::K8sCluster => "otelcol/k8sclusterreceiver",
            ScopeSource::Prometheus | ScopeSource::Istio => "otelcol/prometheusreceiver",
            ScopeSource::Kyma => {
                "github.com/kyma-project/opentelemetry-collector-components/receiver/kymastatsreceiver"
            }
        }
    }

    /// Scope name after rewriting
    pub fn canonical(&self) -> &'static str {
        match self {
            ScopeSource::Runtime | ScopeSource::K8sCluster => "io.kyma-project.telemetry/runtime",
            ScopeSource::Prometheus => "io.kyma-project.telemetry/prometheus",
            ScopeSource::Istio => "io.kyma-project.telemetry/istio",
            ScopeSource::Kyma => "io.kyma-project.telemetry/kyma",
        }
    }
}

/// Operator-level pod label extraction rule. Exactly one of `key` and
/// `key_prefix` is expected; the prefix wins when both are given.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodLabel {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub key_prefix: String,
}

/// Cluster-wide enrichment settings
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Enrichments {
    #[serde(default)]
    pub extract_pod_labels: Vec<PodLabel>,
}

/// Cluster identity stamped onto every resource
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAttributes {
    #[serde(default)]
    pub cluster_name: String,
    #[serde(default)]
    pub cluster_uid: String,
    #[serde(default)]
    pub cloud_provider: String,
}

pub fn memory_limiter(
    check_interval: &str,
    limit_percentage: u8,
    spike_limit_percentage: u8,
) -> Processor {
    Processor::MemoryLimiter(MemoryLimiter {
        check_interval: check_interval.to_string(),
        limit_percentage,
        spike_limit_percentage,
    })
}

pub fn batch(send_batch_size: u32, timeout: &str, send_batch_max_size: u32) -> Processor {
    Processor::Batch(BatchProcessor {
        send_batch_size,
        timeout: timeout.to_string(),
        send_batch_max_size,
    })
}

pub fn k8s_attributes(enrichments: &Enrichments) -> Processor {
    let metadata = [
        "k8s.pod.name",
        "k8s.node.name",
        "k8s.namespace.name",
        "k8s.deployment.name",
        "k8s.statefulset.name",
        "k8s.daemonset.name",
        "k8s.cronjob.name",
        "k8s.job.name",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let mut labels = vec![
        pod_label("app.kubernetes.io/name", KYMA_K8S_IO_APP_NAME),
        pod_label("app", KYMA_APP_NAME),
    ];
    labels.extend(enrichments.extract_pod_labels.iter().map(|label| {
        let key_regex = if label.key_prefix.is_empty() {
            format!("(^{}$)", label.key)
        } else {
            format!("({}.*)", label.key_prefix)
        };
        ExtractLabel {
            from: "pod".to_string(),
            key: None,
            key_regex: Some(key_regex),
            tag_name: "k8s.pod.label.$0".to_string(),
        }
    }));

    Processor::K8sAttributes(K8sAttributesProcessor {
        auth_type: "serviceAccount".to_string(),
        passthrough: false,
        extract: ExtractK8sMetadata { metadata, labels },
        pod_association: vec![
            pod_association("resource_attribute", Some("k8s.pod.ip")),
            pod_association("resource_attribute", Some("k8s.pod.uid")),
            pod_association("connection", None),
        ],
    })
}

fn pod_label(key: &str, tag_name: &str) -> ExtractLabel {
    ExtractLabel {
        from: "pod".to_string(),
        key: Some(key.to_string()),
        key_regex: None,
        tag_name: tag_name.to_string(),
    }
}

fn pod_association(from: &str, name: Option<&str>) -> PodAssociations {
    PodAssociations {
        sources: vec![PodAssociation {
            from: from.to_string(),
            name: name.map(str::to_string),
        }],
    }
}

/// Inserts cluster name, uid and (when known) cloud provider without
/// overwriting values the producer already set
pub fn insert_cluster_attributes(cluster: &ClusterAttributes) -> Processor {
    let mut attributes = vec![
        insert_action("k8s.cluster.name", &cluster.cluster_name),
        insert_action("k8s.cluster.uid", &cluster.cluster_uid),
    ];
    if !cluster.cloud_provider.is_empty() {
        attributes.push(insert_action("cloud.provider", &cluster.cloud_provider));
    }
    Processor::Resource(ResourceProcessor { attributes })
}

fn insert_action(key: &str, value: &str) -> AttributeAction {
    AttributeAction {
        action: "insert".to_string(),
        key: Some(key.to_string()),
        value: Some(value.to_string()),
        pattern: None,
    }
}

fn delete_key_action(key: &str) -> AttributeAction {
    AttributeAction {
        action: "delete".to_string(),
        key: Some(key.to_string()),
        ..Default::default()
    }
}

pub fn drop_kyma_attributes() -> Processor {
    Processor::Resource(ResourceProcessor {
        attributes: vec![AttributeAction {
            action: "delete".to_string(),
            pattern: Some("kyma.*".to_string()),
            ..Default::default()
        }],
    })
}

pub fn delete_skip_enrichment_attribute() -> Processor {
    Processor::Resource(ResourceProcessor {
        attributes: vec![delete_key_action(SKIP_ENRICHMENT_ATTRIBUTE)],
    })
}

pub fn delete_service_name() -> Processor {
    Processor::Resource(ResourceProcessor {
        attributes: vec![delete_key_action("service.name")],
    })
}

pub fn service_enrichment() -> Processor {
    Processor::ServiceEnrichment(ServiceEnrichmentProcessor {
        resource_attributes: vec![KYMA_K8S_IO_APP_NAME.to_string(), KYMA_APP_NAME.to_string()],
    })
}

pub fn istio_noise_filter() -> Processor {
    Processor::IstioNoiseFilter(IstioNoiseFilterProcessor {})
}

pub fn istio_enrichment(scope_version: &str) -> Processor {
    Processor::IstioEnrichment(IstioEnrichmentProcessor {
        scope_version: scope_version.to_string(),
    })
}

/// Derives `service.name` from well-known workload attributes, falling back
/// to `unknown_service`
pub fn resolve_service_name() -> Processor {
    let basic_condition = r#"attributes["service.name"] == nil or attributes["service.name"] == """#;
    let unresolved_condition = format!(
        "{basic_condition} or {}",
        ottl::is_match(r#"attributes["service.name"]"#, "^unknown_service(:.+)?$")
    );

    let mut statements: Vec<String> = [
        KYMA_K8S_IO_APP_NAME,
        KYMA_APP_NAME,
        "k8s.deployment.name",
        "k8s.daemonset.name",
        "k8s.statefulset.name",
        "k8s.job.name",
        "k8s.pod.name",
    ]
    .iter()
    .map(|attr| {
        format!(r#"set(attributes["service.name"], attributes["{attr}"]) where {unresolved_condition}"#)
    })
    .collect();
    statements.push(format!(
        r#"set(attributes["service.name"], "unknown_service") where {basic_condition}"#
    ));

    transform(
        SignalType::Metric,
        vec![TransformStatements {
            context: Some("resource".to_string()),
            conditions: vec![],
            statements,
        }],
    )
}

/// Rewrites upstream receiver scopes to the canonical Kyma scope names
pub fn instrumentation_scope(
    signal: SignalType,
    version: &str,
    sources: &[ScopeSource],
) -> Processor {
    let statements = sources
        .iter()
        .flat_map(|source| {
            let upstream = source.upstream();
            [
                format!(r#"set(version, "{version}") where name == "{upstream}""#),
                format!(
                    r#"set(name, "{}") where name == "{upstream}""#,
                    source.canonical()
                ),
            ]
        })
        .collect();

    transform(
        signal,
        vec![TransformStatements {
            context: Some("scope".to_string()),
            conditions: vec![],
            statements,
        }],
    )
}

/// Transform processor with the statements placed under the signal's key
pub fn transform(signal: SignalType, statements: Vec<TransformStatements>) -> Processor {
    let mut processor = TransformProcessor {
        error_mode: ERROR_MODE_IGNORE.to_string(),
        ..Default::default()
    };
    match signal {
        SignalType::Metric => processor.metric_statements = statements,
        SignalType::Log => processor.log_statements = statements,
        SignalType::Trace => processor.trace_statements = statements,
    }
    Processor::Transform(processor)
}

pub fn user_defined_transform_id(pipeline_name: &str) -> String {
    format!("transform/user-defined-{pipeline_name}")
}

pub fn user_defined_filter_id(pipeline_name: &str) -> String {
    format!("filter/user-defined-{pipeline_name}")
}

/// `None` when the pipeline declares no transforms
pub fn user_defined_transform(signal: SignalType, specs: &[TransformSpec]) -> Option<Processor> {
    if specs.is_empty() {
        return None;
    }
    let statements = specs
        .iter()
        .map(|spec| TransformStatements {
            context: None,
            conditions: spec.conditions.clone(),
            statements: spec.statements.clone(),
        })
        .collect();
    Some(transform(signal, statements))
}

/// `None` when the pipeline declares no filter conditions
pub fn user_defined_filter(signal: SignalType, specs: &[FilterSpec]) -> Option<Processor> {
    let conditions: Vec<String> = specs
        .iter()
        .flat_map(|spec| spec.conditions.iter().cloned())
        .collect();
    if conditions.is_empty() {
        return None;
    }

    Some(match signal {
        SignalType::Metric => datapoint_filter(conditions),
        SignalType::Log => log_filter(conditions),
        SignalType::Trace => Processor::Filter(FilterProcessor {
            error_mode: ERROR_MODE_IGNORE.to_string(),
            traces: Some(FilterTraces { span: conditions }),
            ..Default::default()
        }),
    })
}

/// Drops metrics matching any of `expressions`
pub fn metric_filter(expressions: Vec<String>) -> Processor {
    Processor::Filter(FilterProcessor {
        error_mode: ERROR_MODE_IGNORE.to_string(),
        metrics: Some(FilterMetrics {
            metric: expressions,
            datapoint: vec![],
        }),
        ..Default::default()
    })
}

/// Drops datapoints matching any of `expressions`
pub fn datapoint_filter(expressions: Vec<String>) -> Processor {
    Processor::Filter(FilterProcessor {
        error_mode: ERROR_MODE_IGNORE.to_string(),
        metrics: Some(FilterMetrics {
            metric: vec![],
            datapoint: expressions,
        }),
        ..Default::default()
    })
}

/// Drops log records matching any of `expressions`
pub fn log_filter(expressions: Vec<String>) -> Processor {
    Processor::Filter(FilterProcessor {
        error_mode: ERROR_MODE_IGNORE.to_string(),
        logs: Some(FilterLogs {
            log_record: expressions,
        }),
        ..Default::default()
    })
}

/// Namespace filter expression: exclude drops the listed namespaces, include
/// drops everything with a namespace outside the list. Returns `None` for an
/// empty selector.
pub fn namespace_filter_expression(
    include: &[String],
    exclude: &[String],
    source_condition: Option<&str>,
) -> Option<String> {
    let mut parts: Vec<String> = source_condition.map(str::to_string).into_iter().collect();
    if !exclude.is_empty() {
        let conditions: Vec<String> = exclude.iter().map(|ns| ottl::namespace_equals(ns)).collect();
        parts.push(ottl::join_with_or(&conditions));
    } else if !include.is_empty() {
        let conditions: Vec<String> = include.iter().map(|ns| ottl::namespace_equals(ns)).collect();
        parts.push(ottl::resource_attribute_is_not_nil("k8s.namespace.name"));
        parts.push(ottl::not(&ottl::join_with_or(&conditions)));
    } else {
        return None;
    }
    Some(ottl::join_with_and(&parts))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_json(processor: &Processor) -> serde_json::Value {
        serde_json::to_value(processor).unwrap()
    }

    #[test]
    fn test_k8s_attributes_with_operator_labels() {
        let enrichments = Enrichments {
            extract_pod_labels: vec![
                PodLabel {
                    key: String::new(),
                    key_prefix: "app.kubernetes.io".to_string(),
                },
                PodLabel {
                    key: "team".to_string(),
                    key_prefix: String::new(),
                },
            ],
        };
        let value = to_json(&k8s_attributes(&enrichments));

        assert_eq!(value["auth_type"], "serviceAccount");
        assert_eq!(value["passthrough"], false);
        assert_eq!(value["extract"]["metadata"].as_array().unwrap().len(), 8);
        let labels = value["extract"]["labels"].as_array().unwrap();
        assert_eq!(labels.len(), 4);
        assert_eq!(labels[0]["tag_name"], "kyma.kubernetes_io_app_name");
        assert_eq!(labels[1]["key"], "app");
        assert_eq!(labels[2]["key_regex"], "(app.kubernetes.io.*)");
        assert_eq!(labels[3]["key_regex"], "(^team$)");
        assert_eq!(labels[3]["tag_name"], "k8s.pod.label.$0");

        let associations = value["pod_association"].as_array().unwrap();
        assert_eq!(associations[0]["sources"][0]["name"], "k8s.pod.ip");
        assert_eq!(associations[1]["sources"][0]["name"], "k8s.pod.uid");
        assert_eq!(associations[2]["sources"][0]["from"], "connection");
        assert!(associations[2]["sources"][0].get("name").is_none());
    }

    #[test]
    fn test_insert_cluster_attributes_without_cloud_provider() {
        let cluster = ClusterAttributes {
            cluster_name: "test-cluster".to_string(),
            cluster_uid: "uid".to_string(),
            cloud_provider: String::new(),
        };
        let value = to_json(&insert_cluster_attributes(&cluster));
        let attributes = value["attributes"].as_array().unwrap();
        assert_eq!(attributes.len(), 2);
        assert!(attributes.iter().all(|a| a["action"] == "insert"));
        assert_eq!(attributes[0]["value"], "test-cluster");
    }

    #[test]
    fn test_insert_cluster_attributes_with_cloud_provider() {
        let cluster = ClusterAttributes {
            cluster_name: "test-cluster".to_string(),
            cluster_uid: "uid".to_string(),
            cloud_provider: "azure".to_string(),
        };
        let value = to_json(&insert_cluster_attributes(&cluster));
        assert_eq!(value["attributes"][2]["key"], "cloud.provider");
        assert_eq!(value["attributes"][2]["value"], "azure");
    }

    #[test]
    fn test_drop_kyma_attributes() {
        let value = to_json(&drop_kyma_attributes());
        assert_eq!(value["attributes"][0]["action"], "delete");
        assert_eq!(value["attributes"][0]["pattern"], "kyma.*");
    }

    #[test]
    fn test_resolve_service_name_statements() {
        let value = to_json(&resolve_service_name());
        let statements = value["metric_statements"][0]["statements"].as_array().unwrap();
        assert_eq!(value["metric_statements"][0]["context"], "resource");
        assert_eq!(statements.len(), 8);
        assert_eq!(
            statements[0],
            r#"set(attributes["service.name"], attributes["kyma.kubernetes_io_app_name"]) where attributes["service.name"] == nil or attributes["service.name"] == "" or IsMatch(attributes["service.name"], "^unknown_service(:.+)?$")"#
        );
        assert_eq!(
            statements[7],
            r#"set(attributes["service.name"], "unknown_service") where attributes["service.name"] == nil or attributes["service.name"] == """#
        );
    }

    #[test]
    fn test_instrumentation_scope_statements() {
        let value = to_json(&instrumentation_scope(
            SignalType::Metric,
            "1.0.0",
            &[ScopeSource::Prometheus],
        ));
        assert_eq!(value["error_mode"], "ignore");
        assert_eq!(value["metric_statements"][0]["context"], "scope");
        assert_eq!(
            value["metric_statements"][0]["statements"],
            serde_json::json!([
                r#"set(version, "1.0.0") where name == "otelcol/prometheusreceiver""#,
                r#"set(name, "io.kyma-project.telemetry/prometheus") where name == "otelcol/prometheusreceiver""#,
            ])
        );
    }

    #[test]
    fn test_user_defined_transform_and_filter() {
        assert!(user_defined_transform(SignalType::Log, &[]).is_none());
        assert!(user_defined_filter(SignalType::Log, &[FilterSpec::default()]).is_none());

        let transforms = vec![TransformSpec {
            conditions: vec!["IsMatch(body, \".*error.*\")".to_string()],
            statements: vec!["set(severity_text, \"ERROR\")".to_string()],
        }];
        let value = to_json(&user_defined_transform(SignalType::Log, &transforms).unwrap());
        assert_eq!(value["log_statements"][0]["statements"][0], "set(severity_text, \"ERROR\")");
        assert!(value.get("metric_statements").is_none());

        let filters = vec![FilterSpec {
            conditions: vec!["span.name == \"health\"".to_string()],
        }];
        let value = to_json(&user_defined_filter(SignalType::Trace, &filters).unwrap());
        assert_eq!(value["traces"]["span"][0], "span.name == \"health\"");
    }

    #[test]
    fn test_namespace_filter_expression_exclude() {
        let expr = namespace_filter_expression(
            &[],
            &["kyma-system".to_string(), "default".to_string()],
            None,
        )
        .unwrap();
        assert_eq!(
            expr,
            r#"(resource.attributes["k8s.namespace.name"] == "kyma-system" or resource.attributes["k8s.namespace.name"] == "default")"#
        );
    }

    #[test]
    fn test_namespace_filter_expression_include() {
        let expr = namespace_filter_expression(
            &["kyma-system".to_string(), "default".to_string()],
            &[],
            None,
        )
        .unwrap();
        assert_eq!(
            expr,
            r#"resource.attributes["k8s.namespace.name"] != nil and not(resource.attributes["k8s.namespace.name"] == "kyma-system" or resource.attributes["k8s.namespace.name"] == "default")"#
        );
    }

    #[test]
    fn test_namespace_filter_expression_empty() {
        assert!(namespace_filter_expression(&[], &[], Some("x")).is_none());
    }
}
