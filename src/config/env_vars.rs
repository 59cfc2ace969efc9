//! Environment variable naming for secret-backed exporter settings
//!
//! Secret material never lands in the collector YAML. It is referenced as
//! `${NAME}` and delivered separately through this table.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Env-var name to raw value. Ordered so the produced Secret is stable.
pub type EnvVars = BTreeMap<String, Vec<u8>>;

pub const OTLP_ENDPOINT_PREFIX: &str = "OTLP_ENDPOINT";
pub const BASIC_AUTH_HEADER_PREFIX: &str = "BASIC_AUTH_HEADER";
pub const HEADER_PREFIX: &str = "HEADER";
pub const TLS_CA_PREFIX: &str = "OTLP_TLS_CA_PEM";
pub const TLS_CERT_PREFIX: &str = "OTLP_TLS_CERT_PEM";
pub const TLS_KEY_PREFIX: &str = "OTLP_TLS_KEY_PEM";

/// Provided by the collector pod itself, never by the compiler
pub const RUNTIME_ENV_VARS: [&str; 3] = ["MY_POD_IP", "MY_NODE_NAME", "KUBERNETES_SERVICE_HOST"];

static NON_COMPLIANT: Lazy<Regex> =
    Lazy::new(|| Regex::new("[^A-Z0-9_]").expect("failed creating regex"));

/// Uppercases `name` and replaces every character outside `[A-Z0-9_]` with `_`
pub fn make_env_var_compliant(name: &str) -> String {
    NON_COMPLIANT
        .replace_all(&name.to_uppercase(), "_")
        .into_owned()
}

fn prefixed(prefix: &str, pipeline_name: &str) -> String {
    format!("{prefix}_{}", make_env_var_compliant(pipeline_name))
}

pub fn otlp_endpoint(pipeline_name: &str) -> String {
    prefixed(OTLP_ENDPOINT_PREFIX, pipeline_name)
}

pub fn basic_auth_header(pipeline_name: &str) -> String {
    prefixed(BASIC_AUTH_HEADER_PREFIX, pipeline_name)
}

/// `HEADER_<PIPELINE>_<HEADER>`
pub fn header(pipeline_name: &str, header_name: &str) -> String {
    format!(
        "{}_{}",
        prefixed(HEADER_PREFIX, pipeline_name),
        make_env_var_compliant(header_name)
    )
}

pub fn tls_ca(pipeline_name: &str) -> String {
    prefixed(TLS_CA_PREFIX, pipeline_name)
}

pub fn tls_cert(pipeline_name: &str) -> String {
    prefixed(TLS_CERT_PREFIX, pipeline_name)
}

pub fn tls_key(pipeline_name: &str) -> String {
    prefixed(TLS_KEY_PREFIX, pipeline_name)
}

/// `${NAME}`, the collector's env-var expansion syntax
pub fn placeholder(name: &str) -> String {
    format!("${{{name}}}")
}
