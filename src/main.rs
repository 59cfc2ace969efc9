//! otelcol-config entry point
//!
//! Compiles pipeline manifests into a collector configuration for one
//! collector flavour. Secrets come from a local manifest file or, with
//! `--in-cluster`, from the Kubernetes API.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use telemetry_config::builder::{log_agent, log_gateway, metric_agent, metric_gateway, trace_gateway};
use telemetry_config::config::{Config, EnvVars};
use telemetry_config::crd::{LogPipeline, MetricPipeline, TracePipeline};
use telemetry_config::secrets::{InMemorySecretReader, SecretReader};
use telemetry_config::Error;

const CONFIG_FILE: &str = "config.yaml";
const ENV_FILE: &str = "env.yaml";

#[derive(Parser)]
#[command(name = "otelcol-config")]
#[command(about = "Compile telemetry pipelines into OpenTelemetry Collector configuration", long_about = None)]
#[command(version, long_version = long_version())]
struct Cli {
    /// Collector flavour to build the configuration for
    #[arg(value_enum)]
    signal: Signal,

    /// Pipeline manifests; each file may hold several YAML documents
    #[arg(short, long = "pipelines", required = true, num_args = 1..)]
    pipelines: Vec<PathBuf>,

    /// Build options for the selected collector (YAML)
    #[arg(short, long, env = "OTELCOL_CONFIG_OPTIONS")]
    options: Option<PathBuf>,

    /// Secret manifests used to resolve secret references
    #[arg(short, long, env = "OTELCOL_CONFIG_SECRETS", conflicts_with = "in_cluster")]
    secrets: Option<PathBuf>,

    /// Read referenced secrets from the cluster instead of a file
    #[arg(long)]
    in_cluster: bool,

    /// Write config.yaml and env.yaml here instead of printing the config
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Signal {
    LogAgent,
    LogGateway,
    MetricAgent,
    MetricGateway,
    TraceGateway,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (",
        env!("GIT_SHA"),
        " ",
        env!("BUILD_DATE"),
        ")"
    )
}

fn init_tracing(format: LogFormat) {
    let env_filter = EnvFilter::builder()
        .with_default_directive(Level::INFO.into())
        .from_env_lossy();
    let registry = tracing_subscriber::registry().with(env_filter);

    // stdout carries the rendered config
    match format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            let reason = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<Error>())
                .map(Error::reason)
                .unwrap_or("Error");
            error!(reason, "{e:#}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    info!(
        signal = ?cli.signal,
        "Starting otelcol-config v{}",
        env!("CARGO_PKG_VERSION")
    );

    let ctx = CancellationToken::new();
    let cancel = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling build");
            cancel.cancel();
        }
    });

    let reader = secret_reader(&cli).await?;
    let options = cli.options.as_deref();

    let (config, env) = match cli.signal {
        Signal::LogAgent => {
            let pipelines: Vec<LogPipeline> = load_pipelines(&cli.pipelines)?;
            log_agent::build(&pipelines, &load_options(options)?)?
        }
        Signal::LogGateway => {
            let pipelines: Vec<LogPipeline> = load_pipelines(&cli.pipelines)?;
            log_gateway::Builder::new(reader.as_ref())
                .build(&ctx, &pipelines, &load_options(options)?)
                .await?
        }
        Signal::MetricAgent => {
            let pipelines: Vec<MetricPipeline> = load_pipelines(&cli.pipelines)?;
            metric_agent::build(&pipelines, &load_options(options)?)?
        }
        Signal::MetricGateway => {
            let pipelines: Vec<MetricPipeline> = load_pipelines(&cli.pipelines)?;
            metric_gateway::Builder::new(reader.as_ref())
                .build(&ctx, &pipelines, &load_options(options)?)
                .await?
        }
        Signal::TraceGateway => {
            let pipelines: Vec<TracePipeline> = load_pipelines(&cli.pipelines)?;
            trace_gateway::Builder::new(reader.as_ref())
                .build(&ctx, &pipelines, &load_options(options)?)
                .await?
        }
    };

    write_output(cli.output_dir.as_deref(), &config, &env)
}

async fn secret_reader(cli: &Cli) -> Result<Box<dyn SecretReader>> {
    if cli.in_cluster {
        let client = kube::Client::try_default()
            .await
            .context("failed to create Kubernetes client")?;
        info!("Connected to Kubernetes cluster");
        return Ok(Box::new(client));
    }

    let secrets: Vec<Secret> = match &cli.secrets {
        Some(path) => load_documents(path)?,
        None => Vec::new(),
    };
    info!(secrets = secrets.len(), "Loaded secret manifests");
    Ok(Box::new(InMemorySecretReader::from_secrets(secrets)))
}

/// Every non-empty YAML document in `path`
fn load_documents<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    let mut documents = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(&contents).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .with_context(|| format!("invalid YAML in {} (document {index})", path.display()))?;
        if value.is_null() {
            continue;
        }
        let document = serde_yaml::from_value(value).map_err(|e| {
            Error::ConfigError(format!("{} (document {index}): {e}", path.display()))
        })?;
        documents.push(document);
    }
    Ok(documents)
}

/// Pipelines from all files, sorted by name so the output is stable
fn load_pipelines<K>(paths: &[PathBuf]) -> Result<Vec<K>>
where
    K: kube::Resource + DeserializeOwned,
{
    let mut pipelines = Vec::new();
    for path in paths {
        pipelines.extend(load_documents::<K>(path)?);
    }
    pipelines.sort_by_key(|p| p.name_any());
    debug!(
        pipelines = ?pipelines.iter().map(|p| p.name_any()).collect::<Vec<_>>(),
        "Loaded pipelines"
    );
    Ok(pipelines)
}

fn load_options<T: DeserializeOwned + Default>(path: Option<&Path>) -> Result<T> {
    let Some(path) = path else {
        return Ok(T::default());
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let options = serde_yaml::from_str(&contents).map_err(|e| {
        Error::ConfigError(format!("build options in {}: {e}", path.display()))
    })?;
    Ok(options)
}

fn write_output(output_dir: Option<&Path>, config: &Config, env: &EnvVars) -> Result<()> {
    let config_yaml = config.to_yaml()?;

    let Some(dir) = output_dir else {
        // env values are secret material and never go to stdout
        print!("{config_yaml}");
        info!(env_vars = env.len(), "Rendered config to stdout");
        return Ok(());
    };

    // env.yaml holds UTF-8 strings only
    let env_strings = env
        .iter()
        .map(|(name, value)| match std::str::from_utf8(value) {
            Ok(text) => Ok((name.as_str(), text)),
            Err(_) => Err(Error::ConfigError(format!(
                "env var {name} holds non-UTF-8 data and cannot be written to {ENV_FILE}"
            ))),
        })
        .collect::<Result<BTreeMap<&str, &str>, Error>>()?;

    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;

    let config_path = dir.join(CONFIG_FILE);
    std::fs::write(&config_path, config_yaml)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    let env_path = dir.join(ENV_FILE);
    std::fs::write(&env_path, serde_yaml::to_string(&env_strings)?)
        .with_context(|| format!("failed to write {}", env_path.display()))?;

    info!(
        config = %config_path.display(),
        env = %env_path.display(),
        env_vars = env.len(),
        "Wrote collector config"
    );
    Ok(())
}
