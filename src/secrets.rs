//! Secret resolution for pipeline values
//!
//! Builders never talk to the API server directly. They go through
//! [`SecretReader`], which is backed by a live [`kube::Client`] inside the
//! cluster and by [`InMemorySecretReader`] for offline rendering and tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client, ResourceExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::crd::ValueType;
use crate::error::{Error, Result};

/// Read access to namespaced Secrets
#[async_trait]
pub trait SecretReader: Send + Sync {
    /// Returns `Ok(None)` when the secret does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;
}

#[async_trait]
impl SecretReader for Client {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.clone(), namespace);
        match api.get(name).await {
            Ok(secret) => Ok(Some(secret)),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(None),
            Err(e) => Err(Error::KubeError(e)),
        }
    }
}

/// Secrets held in memory, keyed by namespace and name
#[derive(Clone, Debug, Default)]
pub struct InMemorySecretReader {
    secrets: BTreeMap<(String, String), Secret>,
}

impl InMemorySecretReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Secrets without a namespace are stored under `default`
    pub fn from_secrets(secrets: impl IntoIterator<Item = Secret>) -> Self {
        let mut reader = Self::new();
        for secret in secrets {
            reader.insert(secret);
        }
        reader
    }

    pub fn insert(&mut self, secret: Secret) {
        let namespace = secret.namespace().unwrap_or_else(|| "default".to_string());
        self.secrets.insert((namespace, secret.name_any()), secret);
    }

    /// Convenience for tests and fixtures: one secret with string values
    pub fn with_string_data(
        mut self,
        namespace: &str,
        name: &str,
        data: &[(&str, &str)],
    ) -> Self {
        let mut secret = Secret::default();
        secret.metadata.name = Some(name.to_string());
        secret.metadata.namespace = Some(namespace.to_string());
        secret.string_data = Some(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self.insert(secret);
        self
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}

#[async_trait]
impl SecretReader for InMemorySecretReader {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        Ok(self
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// Looks up `key` in `data`, falling back to `stringData` for manifests that
/// were never round-tripped through the API server
fn secret_value(secret: &Secret, key: &str) -> Option<Vec<u8>> {
    if let Some(value) = secret.data.as_ref().and_then(|data| data.get(key)) {
        return Some(value.0.clone());
    }
    secret
        .string_data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.as_bytes().to_vec())
}

/// Resolves a [`ValueType`] to raw bytes.
///
/// Inline values win. Secret-backed values are read through `reader`; the
/// read is abandoned with [`Error::Cancelled`] as soon as `ctx` fires.
#[instrument(skip_all)]
pub async fn resolve_value(
    ctx: &CancellationToken,
    reader: &dyn SecretReader,
    value: &ValueType,
) -> Result<Vec<u8>> {
    if !value.value.is_empty() {
        return Ok(value.value.as_bytes().to_vec());
    }

    let key_ref = match value.secret_key_ref() {
        Some(key_ref) if key_ref.is_complete() => key_ref,
        Some(key_ref) => {
            return Err(Error::InvalidValueSource(format!(
                "secretKeyRef requires name, namespace and key (got '{}/{}' key '{}')",
                key_ref.namespace, key_ref.name, key_ref.key
            )))
        }
        None => {
            return Err(Error::InvalidValueSource(
                "neither value nor valueFrom.secretKeyRef is set".to_string(),
            ))
        }
    };

    if ctx.is_cancelled() {
        return Err(Error::Cancelled);
    }

    debug!(
        namespace = %key_ref.namespace,
        name = %key_ref.name,
        key = %key_ref.key,
        "Reading secret"
    );

    let secret = tokio::select! {
        biased;
        _ = ctx.cancelled() => return Err(Error::Cancelled),
        secret = reader.get_secret(&key_ref.namespace, &key_ref.name) => secret?,
    };

    secret
        .as_ref()
        .and_then(|secret| secret_value(secret, &key_ref.key))
        .ok_or_else(|| Error::SecretNotFound {
            namespace: key_ref.namespace.clone(),
            name: key_ref.name.clone(),
            key: key_ref.key.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;

    fn reader() -> InMemorySecretReader {
        InMemorySecretReader::new().with_string_data(
            "default",
            "creds",
            &[("user", "u"), ("password", "p")],
        )
    }

    #[tokio::test]
    async fn test_inline_value() {
        let ctx = CancellationToken::new();
        let value = resolve_value(&ctx, &reader(), &ValueType::from_value("http://localhost"))
            .await
            .unwrap();
        assert_eq!(value, b"http://localhost");
    }

    #[tokio::test]
    async fn test_secret_value() {
        let ctx = CancellationToken::new();
        let value = resolve_value(
            &ctx,
            &reader(),
            &ValueType::from_secret("creds", "default", "user"),
        )
        .await
        .unwrap();
        assert_eq!(value, b"u");
    }

    #[tokio::test]
    async fn test_secret_data_preferred_over_string_data() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("tls".to_string());
        secret.metadata.namespace = Some("kyma-system".to_string());
        secret.data = Some(BTreeMap::from([(
            "ca".to_string(),
            ByteString(b"from-data".to_vec()),
        )]));
        secret.string_data = Some(BTreeMap::from([(
            "ca".to_string(),
            "from-string-data".to_string(),
        )]));
        let reader = InMemorySecretReader::from_secrets(vec![secret]);

        let ctx = CancellationToken::new();
        let value = resolve_value(
            &ctx,
            &reader,
            &ValueType::from_secret("tls", "kyma-system", "ca"),
        )
        .await
        .unwrap();
        assert_eq!(value, b"from-data");
    }

    #[tokio::test]
    async fn test_missing_secret() {
        let ctx = CancellationToken::new();
        let err = resolve_value(
            &ctx,
            &reader(),
            &ValueType::from_secret("other", "default", "user"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SecretNotFound { ref name, .. } if name == "other"));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let ctx = CancellationToken::new();
        let err = resolve_value(
            &ctx,
            &reader(),
            &ValueType::from_secret("creds", "default", "token"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::SecretNotFound { ref key, .. } if key == "token"));
    }

    #[tokio::test]
    async fn test_invalid_value_source() {
        let ctx = CancellationToken::new();
        let err = resolve_value(&ctx, &reader(), &ValueType::default())
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "InvalidValueSource");

        let err = resolve_value(&ctx, &reader(), &ValueType::from_secret("creds", "", "user"))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "InvalidValueSource");
    }

    #[tokio::test]
    async fn test_cancelled_before_read() {
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = resolve_value(
            &ctx,
            &reader(),
            &ValueType::from_secret("creds", "default", "user"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[test]
    fn test_in_memory_reader_default_namespace() {
        let mut secret = Secret::default();
        secret.metadata.name = Some("creds".to_string());
        let reader = InMemorySecretReader::from_secrets(vec![secret]);
        assert_eq!(reader.len(), 1);
        let found = tokio_test::block_on(reader.get_secret("default", "creds")).unwrap();
        assert!(found.is_some());
    }
}
