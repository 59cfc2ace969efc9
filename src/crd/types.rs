//! Shared types used by the LogPipeline, MetricPipeline and TracePipeline CRDs

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A value that is either given inline or read from a Secret key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueType {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ValueFromSource>,
}

impl ValueType {
    pub fn from_value(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            value_from: None,
        }
    }

    pub fn from_secret(
        name: impl Into<String>,
        namespace: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            value: String::new(),
            value_from: Some(ValueFromSource {
                secret_key_ref: Some(SecretKeyRef {
                    name: name.into(),
                    namespace: namespace.into(),
                    key: key.into(),
                }),
            }),
        }
    }

    /// Secret reference, if this value is backed by one
    pub fn secret_key_ref(&self) -> Option<&SecretKeyRef> {
        self.value_from.as_ref()?.secret_key_ref.as_ref()
    }

    /// True when either an inline value or a secret reference is present
    pub fn is_defined(&self) -> bool {
        !self.value.is_empty() || self.secret_key_ref().is_some()
    }
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValueFromSource {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

/// Reference to a single key of a namespaced Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecretKeyRef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub key: String,
}

impl SecretKeyRef {
    /// A reference is usable only when all three coordinates are set
    pub fn is_complete(&self) -> bool {
        !self.name.is_empty() && !self.namespace.is_empty() && !self.key.is_empty()
    }
}

/// Transport protocol of an OTLP output
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

/// Pipeline output; only OTLP backends are supported
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PipelineOutput {
    pub otlp: OtlpOutput,
}

/// OTLP backend definition
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OtlpOutput {
    /// Protocol used to talk to the backend (grpc or http)
    #[serde(default)]
    pub protocol: OtlpProtocol,

    /// Backend endpoint, e.g. `https://backend.example.com:4317`
    pub endpoint: ValueType,

    /// Signal-specific URL path, only honoured for the http protocol
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication: Option<AuthenticationOptions>,

    /// Custom headers sent with every export request
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<OutputTls>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basic: Option<BasicAuthOptions>,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BasicAuthOptions {
    pub user: ValueType,
    pub password: ValueType,
}

impl BasicAuthOptions {
    pub fn is_defined(&self) -> bool {
        self.user.is_defined() && self.password.is_defined()
    }
}

/// Custom export header; the optional prefix is prepended to the value
/// (for example `Api-Token <value>`)
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prefix: String,

    #[serde(flatten)]
    pub value: ValueType,
}

/// TLS settings of an OTLP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutputTls {
    #[serde(default)]
    pub insecure: bool,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    /// PEM encoded CA bundle
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueType>,

    /// PEM encoded client certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<ValueType>,

    /// PEM encoded client key
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueType>,
}

/// Namespaces to collect from. Only one of `include` and `exclude` may be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

impl NamespaceSelector {
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.include.is_empty() && !self.exclude.is_empty() {
            return Err("namespace selector must not set both include and exclude".to_string());
        }
        Ok(())
    }
}

/// OTLP push input, shared by logs and metrics
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OtlpInput {
    /// Defaults to true when omitted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespaces: Option<NamespaceSelector>,
}

/// User-supplied OTTL transformation
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<String>,

    #[serde(default)]
    pub statements: Vec<String>,
}

/// User-supplied OTTL drop conditions
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    #[serde(default)]
    pub conditions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_type_is_defined() {
        assert!(ValueType::from_value("http://localhost").is_defined());
        assert!(ValueType::from_secret("creds", "default", "endpoint").is_defined());
        assert!(!ValueType::default().is_defined());
    }

    #[test]
    fn test_secret_key_ref_completeness() {
        let mut secret_ref = SecretKeyRef {
            name: "creds".to_string(),
            namespace: "default".to_string(),
            key: "user".to_string(),
        };
        assert!(secret_ref.is_complete());

        secret_ref.namespace.clear();
        assert!(!secret_ref.is_complete());
    }

    #[test]
    fn test_namespace_selector_rejects_include_and_exclude() {
        let selector = NamespaceSelector {
            include: vec!["default".to_string()],
            exclude: vec!["kube-system".to_string()],
        };
        assert!(selector.validate().is_err());

        let selector = NamespaceSelector {
            include: vec!["default".to_string()],
            exclude: vec![],
        };
        assert!(selector.validate().is_ok());
        assert!(!selector.is_empty());
    }

    #[test]
    fn test_output_deserializes_from_yaml() {
        let yaml = r#"
protocol: http
endpoint:
  valueFrom:
    secretKeyRef:
      name: backend
      namespace: default
      key: endpoint
path: /v1/metrics
headers:
  - name: Authorization
    prefix: Api-Token
    value: secret-token
tls:
  insecureSkipVerify: true
"#;
        let output: OtlpOutput = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(output.protocol, OtlpProtocol::Http);
        assert_eq!(output.path.as_deref(), Some("/v1/metrics"));
        assert_eq!(
            output.endpoint.secret_key_ref().map(|r| r.key.as_str()),
            Some("endpoint")
        );
        assert_eq!(output.headers[0].prefix, "Api-Token");
        assert_eq!(output.headers[0].value.value, "secret-token");
        assert!(output.tls.unwrap().insecure_skip_verify);
    }
}
