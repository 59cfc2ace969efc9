//! OTLP exporter builder
//!
//! Turns a pipeline's output into an exporter body plus the env vars its
//! `${...}` placeholders point at. Resolved secret material only ever lands
//! in the returned [`EnvVars`].

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use url::Url;

use super::components::{Exporter, ExporterTls, OtlpExporter, RetryOnFailure, SendingQueue};
use super::env_vars::{self, placeholder, EnvVars};
use super::SignalType;
use crate::crd::{OtlpOutput, OtlpProtocol};
use crate::error::{Error, Result};
use crate::secrets::{resolve_value, SecretReader};

/// `otlphttp/<name>` for http outputs, `otlp/<name>` otherwise
pub fn exporter_id(protocol: OtlpProtocol, pipeline_name: &str) -> String {
    match protocol {
        OtlpProtocol::Http => format!("otlphttp/{pipeline_name}"),
        OtlpProtocol::Grpc => format!("otlp/{pipeline_name}"),
    }
}

pub struct OtlpExporterBuilder<'a> {
    reader: &'a dyn SecretReader,
    output: &'a OtlpOutput,
    pipeline_name: &'a str,
    queue_size: i64,
    signal: SignalType,
}

impl<'a> OtlpExporterBuilder<'a> {
    pub fn new(
        reader: &'a dyn SecretReader,
        output: &'a OtlpOutput,
        pipeline_name: &'a str,
        queue_size: i64,
        signal: SignalType,
    ) -> Self {
        Self {
            reader,
            output,
            pipeline_name,
            queue_size,
            signal,
        }
    }

    pub fn exporter_id(&self) -> String {
        exporter_id(self.output.protocol, self.pipeline_name)
    }

    #[instrument(skip_all, fields(pipeline = %self.pipeline_name))]
    pub async fn build(&self, ctx: &CancellationToken) -> Result<(Exporter, EnvVars)> {
        let mut env = EnvVars::new();
        let mut exporter = OtlpExporter {
            sending_queue: SendingQueue::with_size(self.queue_size),
            retry_on_failure: RetryOnFailure::default(),
            ..Default::default()
        };

        let endpoint = resolve_value(ctx, self.reader, &self.output.endpoint).await?;
        let insecure = endpoint.starts_with(b"http://")
            || self.output.tls.as_ref().is_some_and(|tls| tls.insecure);

        let endpoint_var = env_vars::otlp_endpoint(self.pipeline_name);
        let endpoint_ref = placeholder(&endpoint_var);
        match self.signal_path() {
            Some(path) => {
                env.insert(endpoint_var, join_path(&endpoint, path));
                match self.signal {
                    SignalType::Metric => exporter.metrics_endpoint = Some(endpoint_ref),
                    SignalType::Log => exporter.logs_endpoint = Some(endpoint_ref),
                    SignalType::Trace => exporter.traces_endpoint = Some(endpoint_ref),
                }
            }
            None => {
                env.insert(endpoint_var, endpoint);
                exporter.endpoint = Some(endpoint_ref);
            }
        }

        self.add_basic_auth(ctx, &mut exporter, &mut env).await?;
        self.add_headers(ctx, &mut exporter, &mut env).await?;
        exporter.tls = self.build_tls(ctx, insecure, &mut env).await?;

        debug!(
            exporter = %self.exporter_id(),
            env_vars = env.len(),
            "Built OTLP exporter"
        );
        Ok((Exporter::Otlp(exporter), env))
    }

    /// The path is only honoured for http outputs
    fn signal_path(&self) -> Option<&str> {
        match self.output.protocol {
            OtlpProtocol::Http => self.output.path.as_deref().filter(|p| !p.is_empty()),
            OtlpProtocol::Grpc => None,
        }
    }

    async fn add_basic_auth(
        &self,
        ctx: &CancellationToken,
        exporter: &mut OtlpExporter,
        env: &mut EnvVars,
    ) -> Result<()> {
        let Some(basic) = self
            .output
            .authentication
            .as_ref()
            .and_then(|auth| auth.basic.as_ref())
            .filter(|basic| basic.is_defined())
        else {
            return Ok(());
        };

        let user = resolve_value(ctx, self.reader, &basic.user).await?;
        let password = resolve_value(ctx, self.reader, &basic.password).await?;

        let mut credentials = user;
        credentials.push(b':');
        credentials.extend_from_slice(&password);

        let var = env_vars::basic_auth_header(self.pipeline_name);
        exporter
            .headers
            .insert("Authorization".to_string(), placeholder(&var));
        env.insert(var, format!("Basic {}", STANDARD.encode(credentials)).into_bytes());
        Ok(())
    }

    async fn add_headers(
        &self,
        ctx: &CancellationToken,
        exporter: &mut OtlpExporter,
        env: &mut EnvVars,
    ) -> Result<()> {
        for header in &self.output.headers {
            let var = env_vars::header(self.pipeline_name, &header.name);
            let duplicate = exporter
                .headers
                .keys()
                .any(|name| name.eq_ignore_ascii_case(&header.name));
            if duplicate || env.contains_key(&var) {
                return Err(Error::InvalidPipelineInput(format!(
                    "pipeline '{}': header '{}' collides with another header or basic authentication",
                    self.pipeline_name, header.name
                )));
            }

            let raw = resolve_value(ctx, self.reader, &header.value).await?;
            let prefix = header.prefix.trim();
            let value = if prefix.is_empty() {
                raw
            } else {
                let mut prefixed = format!("{prefix} ").into_bytes();
                prefixed.extend_from_slice(&raw);
                prefixed
            };

            exporter.headers.insert(header.name.clone(), placeholder(&var));
            env.insert(var, value);
        }
        Ok(())
    }

    async fn build_tls(
        &self,
        ctx: &CancellationToken,
        insecure: bool,
        env: &mut EnvVars,
    ) -> Result<ExporterTls> {
        if insecure {
            return Ok(ExporterTls {
                insecure: true,
                ..Default::default()
            });
        }

        let Some(tls) = self.output.tls.as_ref() else {
            return Ok(ExporterTls::default());
        };

        let mut exporter_tls = ExporterTls {
            insecure: false,
            insecure_skip_verify: tls.insecure_skip_verify,
            ..Default::default()
        };

        if let Some(ca) = tls.ca.as_ref().filter(|ca| ca.is_defined()) {
            let var = env_vars::tls_ca(self.pipeline_name);
            env.insert(var.clone(), resolve_value(ctx, self.reader, ca).await?);
            exporter_tls.ca_pem = Some(placeholder(&var));
        }

        let cert = tls.cert.as_ref().filter(|cert| cert.is_defined());
        let key = tls.key.as_ref().filter(|key| key.is_defined());
        if let (Some(cert), Some(key)) = (cert, key) {
            let cert = sanitize_pem(resolve_value(ctx, self.reader, cert).await?);
            let key = sanitize_pem(resolve_value(ctx, self.reader, key).await?);

            let cert_var = env_vars::tls_cert(self.pipeline_name);
            let key_var = env_vars::tls_key(self.pipeline_name);
            exporter_tls.cert_pem = Some(placeholder(&cert_var));
            exporter_tls.key_pem = Some(placeholder(&key_var));
            env.insert(cert_var, cert);
            env.insert(key_var, key);
        }

        Ok(exporter_tls)
    }
}

/// Replaces literal `\n` sequences, as pasted from single-line sources, with
/// real newlines
fn sanitize_pem(pem: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(pem) {
        Ok(text) => text.replace("\\n", "\n").into_bytes(),
        Err(e) => e.into_bytes(),
    }
}

/// Appends `path` to the endpoint's URL path. Endpoints that do not parse
/// as absolute URLs are joined textually.
fn join_path(endpoint: &[u8], path: &str) -> Vec<u8> {
    let endpoint = String::from_utf8_lossy(endpoint);
    let suffix = path.trim_start_matches('/');

    match Url::parse(&endpoint) {
        Ok(mut url) if !url.cannot_be_a_base() => {
            let base = url.path().trim_end_matches('/').to_string();
            url.set_path(&format!("{base}/{suffix}"));
            url.to_string().into_bytes()
        }
        _ => format!("{}/{suffix}", endpoint.trim_end_matches('/')).into_bytes(),
    }
}
