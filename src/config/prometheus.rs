//! Prometheus scrape jobs and relabel rules for the metric agent
//!
//! Pods and service endpoints opt into scraping through the usual
//! `prometheus.io/*` annotations. Each agent only scrapes targets on its own
//! node.

use super::components::*;
use super::node_name;

pub const APP_PODS_JOB: &str = "app-pods";
pub const APP_SERVICES_JOB: &str = "app-services";
pub const ISTIO_PROXY_JOB: &str = "istio-proxy";

pub const DEFAULT_ISTIO_CERT_PATH: &str = "/etc/istio-output-certs";

const SAMPLE_LIMIT: u32 = 50_000;
const SCRAPE_INTERVAL: &str = "30s";
const ISTIO_PROXY_CONTAINER: &str = "istio-proxy";

/// Kubernetes service discovery role of a scrape job
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryRole {
    Pod,
    Endpoints,
}

impl DiscoveryRole {
    fn as_str(&self) -> &'static str {
        match self {
            DiscoveryRole::Pod => "pod",
            DiscoveryRole::Endpoints => "endpoints",
        }
    }

    /// Meta label segment carrying the scrape annotations
    fn annotated_object(&self) -> &'static str {
        match self {
            DiscoveryRole::Pod => "pod",
            DiscoveryRole::Endpoints => "service",
        }
    }

    /// Meta label segment carrying the node name
    fn node_object(&self) -> &'static str {
        match self {
            DiscoveryRole::Pod => "pod",
            DiscoveryRole::Endpoints => "endpoint",
        }
    }
}

fn relabel(
    source_labels: &[&str],
    regex: &str,
    action: RelabelAction,
    target_label: Option<&str>,
    replacement: Option<&str>,
) -> RelabelConfig {
    RelabelConfig {
        source_labels: source_labels.iter().map(|s| s.to_string()).collect(),
        regex: Some(regex.to_string()),
        target_label: target_label.map(str::to_string),
        replacement: replacement.map(str::to_string),
        action,
    }
}

fn annotation_label(role: DiscoveryRole, annotation: &str) -> String {
    format!(
        "__meta_kubernetes_{}_annotation_prometheus_io_{annotation}",
        role.annotated_object()
    )
}

pub fn keep_if_running_on_same_node(role: DiscoveryRole) -> RelabelConfig {
    let label = format!("__meta_kubernetes_{}_node_name", role.node_object());
    relabel(&[&label], &node_name(), RelabelAction::Keep, None, None)
}

pub fn keep_if_scraping_enabled(role: DiscoveryRole) -> RelabelConfig {
    relabel(
        &[&annotation_label(role, "scrape")],
        "true",
        RelabelAction::Keep,
        None,
        None,
    )
}

pub fn drop_if_pod_not_running() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_phase"],
        "Pending|Succeeded|Failed",
        RelabelAction::Drop,
        None,
        None,
    )
}

pub fn drop_if_init_container() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_container_init"],
        "(true)",
        RelabelAction::Drop,
        None,
        None,
    )
}

pub fn drop_if_istio_proxy() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_container_name"],
        &format!("({ISTIO_PROXY_CONTAINER})"),
        RelabelAction::Drop,
        None,
        None,
    )
}

pub fn infer_scheme_from_istio_injected_label() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_label_security_istio_io_tlsMode"],
        "(istio)",
        RelabelAction::Replace,
        Some("__scheme__"),
        Some("https"),
    )
}

pub fn infer_scheme_from_annotation(role: DiscoveryRole) -> RelabelConfig {
    relabel(
        &[&annotation_label(role, "scheme")],
        "(https?)",
        RelabelAction::Replace,
        Some("__scheme__"),
        None,
    )
}

pub fn drop_if_scheme_http() -> RelabelConfig {
    relabel(&["__scheme__"], "(http)", RelabelAction::Drop, None, None)
}

pub fn drop_if_scheme_https() -> RelabelConfig {
    relabel(&["__scheme__"], "(https)", RelabelAction::Drop, None, None)
}

pub fn infer_metrics_path_from_annotation(role: DiscoveryRole) -> RelabelConfig {
    relabel(
        &[&annotation_label(role, "path")],
        "(.+)",
        RelabelAction::Replace,
        Some("__metrics_path__"),
        None,
    )
}

/// Replaces the target port with the one from the `prometheus.io/port` annotation
pub fn infer_address_from_annotation(role: DiscoveryRole) -> RelabelConfig {
    relabel(
        &["__address__", &annotation_label(role, "port")],
        r"([^:]+)(?::\d+)?;(\d+)",
        RelabelAction::Replace,
        Some("__address__"),
        Some("$$1:$$2"),
    )
}

pub fn infer_service_from_meta_label() -> RelabelConfig {
    RelabelConfig {
        source_labels: vec!["__meta_kubernetes_service_name".to_string()],
        regex: None,
        target_label: Some("service".to_string()),
        replacement: None,
        action: RelabelAction::Replace,
    }
}

pub fn keep_if_istio_proxy() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_container_name"],
        ISTIO_PROXY_CONTAINER,
        RelabelAction::Keep,
        None,
        None,
    )
}

pub fn keep_if_container_with_envoy_port() -> RelabelConfig {
    relabel(
        &["__meta_kubernetes_pod_container_port_name"],
        "http-envoy-prom",
        RelabelAction::Keep,
        None,
        None,
    )
}

/// Relabel chain of an annotation-driven scrape job. Plain jobs drop
/// targets resolved to https, secure jobs drop targets resolved to http.
pub fn annotated_relabel_configs(role: DiscoveryRole, require_https: bool) -> Vec<RelabelConfig> {
    let mut configs = vec![
        keep_if_running_on_same_node(role),
        keep_if_scraping_enabled(role),
        drop_if_pod_not_running(),
        drop_if_init_container(),
        drop_if_istio_proxy(),
        infer_scheme_from_istio_injected_label(),
        infer_scheme_from_annotation(role),
    ];
    configs.push(if require_https {
        drop_if_scheme_http()
    } else {
        drop_if_scheme_https()
    });
    configs.push(infer_metrics_path_from_annotation(role));
    configs.push(infer_address_from_annotation(role));
    if role == DiscoveryRole::Endpoints {
        configs.push(infer_service_from_meta_label());
    }
    configs
}

fn istio_tls_config(cert_path: &str) -> ScrapeTlsConfig {
    let cert_path = cert_path.trim_end_matches('/');
    ScrapeTlsConfig {
        ca_file: format!("{cert_path}/root-cert.pem"),
        cert_file: format!("{cert_path}/cert-chain.pem"),
        key_file: format!("{cert_path}/key.pem"),
        insecure_skip_verify: true,
    }
}

fn scrape_config(
    job_name: String,
    role: DiscoveryRole,
    relabel_configs: Vec<RelabelConfig>,
) -> ScrapeConfig {
    ScrapeConfig {
        job_name,
        sample_limit: SAMPLE_LIMIT,
        scrape_interval: SCRAPE_INTERVAL.to_string(),
        metrics_path: None,
        kubernetes_sd_configs: vec![KubernetesSdConfig {
            role: role.as_str().to_string(),
        }],
        relabel_configs,
        metric_relabel_configs: vec![],
        tls_config: None,
    }
}

/// Scrape jobs for annotated workloads of `role`. With an Istio mesh a
/// `-secure` job using the mounted sidecar certificates is added.
pub fn annotated_scrape_configs(
    job_name: &str,
    role: DiscoveryRole,
    istio_cert_path: Option<&str>,
) -> Vec<ScrapeConfig> {
    let mut configs = vec![scrape_config(
        job_name.to_string(),
        role,
        annotated_relabel_configs(role, false),
    )];
    if let Some(cert_path) = istio_cert_path {
        let mut secure = scrape_config(
            format!("{job_name}-secure"),
            role,
            annotated_relabel_configs(role, true),
        );
        secure.tls_config = Some(istio_tls_config(cert_path));
        configs.push(secure);
    }
    configs
}

/// Receiver scraping annotated pods (`role` pod) or service endpoints
/// (`role` endpoints)
pub fn app_receiver(role: DiscoveryRole, istio_cert_path: Option<&str>) -> Receiver {
    let job_name = match role {
        DiscoveryRole::Pod => APP_PODS_JOB,
        DiscoveryRole::Endpoints => APP_SERVICES_JOB,
    };
    Receiver::Prometheus(PrometheusReceiver {
        config: PrometheusConfig {
            scrape_configs: annotated_scrape_configs(job_name, role, istio_cert_path),
        },
    })
}

/// Receiver scraping the Envoy admin endpoint of every local sidecar,
/// keeping only `istio_*` series
pub fn istio_receiver() -> Receiver {
    let mut config = scrape_config(
        ISTIO_PROXY_JOB.to_string(),
        DiscoveryRole::Pod,
        vec![
            keep_if_running_on_same_node(DiscoveryRole::Pod),
            keep_if_istio_proxy(),
            keep_if_container_with_envoy_port(),
            drop_if_pod_not_running(),
        ],
    );
    config.metrics_path = Some("/stats/prometheus".to_string());
    config.metric_relabel_configs = vec![relabel(
        &["__name__"],
        "istio_.*",
        RelabelAction::Keep,
        None,
        None,
    )];
    Receiver::Prometheus(PrometheusReceiver {
        config: PrometheusConfig {
            scrape_configs: vec![config],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_node_rule_per_role() {
        let pods = keep_if_running_on_same_node(DiscoveryRole::Pod);
        assert_eq!(pods.source_labels, vec!["__meta_kubernetes_pod_node_name"]);
        assert_eq!(pods.regex.as_deref(), Some("${MY_NODE_NAME}"));
        assert_eq!(pods.action, RelabelAction::Keep);

        let endpoints = keep_if_running_on_same_node(DiscoveryRole::Endpoints);
        assert_eq!(
            endpoints.source_labels,
            vec!["__meta_kubernetes_endpoint_node_name"]
        );
    }

    #[test]
    fn test_address_rule() {
        let rule = infer_address_from_annotation(DiscoveryRole::Endpoints);
        assert_eq!(
            rule.source_labels,
            vec![
                "__address__",
                "__meta_kubernetes_service_annotation_prometheus_io_port"
            ]
        );
        assert_eq!(rule.regex.as_deref(), Some(r"([^:]+)(?::\d+)?;(\d+)"));
        assert_eq!(rule.replacement.as_deref(), Some("$$1:$$2"));
        assert_eq!(rule.target_label.as_deref(), Some("__address__"));
    }

    #[test]
    fn test_pod_relabel_chain_order() {
        let chain = annotated_relabel_configs(DiscoveryRole::Pod, false);
        assert_eq!(chain.len(), 10);
        assert_eq!(chain[0], keep_if_running_on_same_node(DiscoveryRole::Pod));
        assert_eq!(chain[4], drop_if_istio_proxy());
        assert_eq!(chain[7], drop_if_scheme_https());
        assert_eq!(chain[9], infer_address_from_annotation(DiscoveryRole::Pod));
    }

    #[test]
    fn test_service_relabel_chain_ends_with_service_label() {
        let chain = annotated_relabel_configs(DiscoveryRole::Endpoints, true);
        assert_eq!(chain.len(), 11);
        assert_eq!(chain[7], drop_if_scheme_http());
        assert_eq!(chain[10], infer_service_from_meta_label());
    }

    #[test]
    fn test_secure_job_only_with_istio() {
        let plain = annotated_scrape_configs(APP_PODS_JOB, DiscoveryRole::Pod, None);
        assert_eq!(plain.len(), 1);
        assert!(plain[0].tls_config.is_none());

        let with_istio = annotated_scrape_configs(
            APP_SERVICES_JOB,
            DiscoveryRole::Endpoints,
            Some(DEFAULT_ISTIO_CERT_PATH),
        );
        assert_eq!(with_istio.len(), 2);
        assert_eq!(with_istio[1].job_name, "app-services-secure");
        let tls = with_istio[1].tls_config.as_ref().unwrap();
        assert_eq!(tls.ca_file, "/etc/istio-output-certs/root-cert.pem");
        assert_eq!(tls.cert_file, "/etc/istio-output-certs/cert-chain.pem");
        assert_eq!(tls.key_file, "/etc/istio-output-certs/key.pem");
        assert!(tls.insecure_skip_verify);
        assert_eq!(with_istio[1].kubernetes_sd_configs[0].role, "endpoints");
    }

    #[test]
    fn test_istio_receiver() {
        let value = serde_json::to_value(istio_receiver()).unwrap();
        let job = &value["config"]["scrape_configs"][0];
        assert_eq!(job["job_name"], "istio-proxy");
        assert_eq!(job["metrics_path"], "/stats/prometheus");
        assert_eq!(job["sample_limit"], 50000);
        assert_eq!(job["relabel_configs"].as_array().unwrap().len(), 4);
        assert_eq!(job["metric_relabel_configs"][0]["regex"], "istio_.*");
        assert!(job.get("tls_config").is_none());
    }
}
