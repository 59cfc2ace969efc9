//! Error types for the telemetry config compiler

use thiserror::Error;

/// Errors surfaced by a build. The compiler never recovers locally; every
/// variant reaches the caller unchanged.
#[derive(Error, Debug)]
pub enum Error {
    /// A referenced secret, or a key inside it, does not exist
    #[error("secret '{namespace}/{name}' not found or missing key '{key}'")]
    SecretNotFound {
        namespace: String,
        name: String,
        key: String,
    },

    /// A value has neither a literal nor a complete secret reference
    #[error("invalid value source: {0}")]
    InvalidValueSource(String),

    /// The pipeline declaration combines settings that cannot be compiled
    #[error("invalid pipeline input: {0}")]
    InvalidPipelineInput(String),

    /// The caller cancelled the build while secrets were being resolved
    #[error("build cancelled")]
    Cancelled,

    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Stable reason string for status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::SecretNotFound { .. } => "SecretNotFound",
            Error::InvalidValueSource(_) => "InvalidValueSource",
            Error::InvalidPipelineInput(_) => "InvalidPipelineInput",
            Error::Cancelled => "Cancelled",
            Error::KubeError(_) => "KubernetesError",
            Error::SerializationError(_) => "SerializationError",
            Error::ConfigError(_) => "ConfigError",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_not_found_display() {
        let err = Error::SecretNotFound {
            namespace: "default".to_string(),
            name: "creds".to_string(),
            key: "password".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "secret 'default/creds' not found or missing key 'password'"
        );
        assert_eq!(err.reason(), "SecretNotFound");
    }

    #[test]
    fn test_invalid_pipeline_input_display() {
        let err = Error::InvalidPipelineInput("both include and exclude set".to_string());
        assert_eq!(
            err.to_string(),
            "invalid pipeline input: both include and exclude set"
        );
        assert_eq!(err.reason(), "InvalidPipelineInput");
    }

    #[test]
    fn test_cancelled_reason() {
        assert_eq!(Error::Cancelled.to_string(), "build cancelled");
        assert_eq!(Error::Cancelled.reason(), "Cancelled");
    }

    #[test]
    fn test_config_error_reason() {
        let err = Error::ConfigError("options.yaml: missing field `gateway`".to_string());
        assert_eq!(
            err.to_string(),
            "configuration error: options.yaml: missing field `gateway`"
        );
        assert_eq!(err.reason(), "ConfigError");
    }
}
