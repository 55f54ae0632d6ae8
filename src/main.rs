//! Command-line front end for the over-the-air update client.
//!
//! Runs a single check, fetch or signature verification against the
//! configured update server and prints the outcome as JSON.

use anyhow::Context;
use clap::{Parser, Subcommand};
use ota_updater::{
    CheckOutcome, FetchOutcome, HttpFetcher, HttpKeySource, SignatureVerifier, SignedPayload,
    UpdatesClient, UpdatesConfig, UpdatesError, VerificationOutcome,
};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

/// Command-line arguments for the update client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; defaults are used for anything it leaves out
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the manifest URL from the config
    #[arg(long)]
    manifest_url: Option<Url>,

    /// Override the runtime version from the config
    #[arg(long)]
    runtime_version: Option<String>,

    /// Override the updates directory from the config
    #[arg(long)]
    updates_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check whether the server publishes an update newer than the launched one
    Check,

    /// Download the newest update into the updates directory
    Fetch,

    /// Verify a detached signature against the published key
    Verify {
        /// File holding the exact signed text
        #[arg(long)]
        plaintext_file: PathBuf,

        /// Base64 encoded signature
        #[arg(long)]
        signature: String,
    },
}

fn load_config(args: &Args) -> anyhow::Result<UpdatesConfig> {
    let mut config = match &args.config {
        Some(path) => UpdatesConfig::from_file(path)?,
        None => UpdatesConfig::default(),
    };
    if let Some(url) = &args.manifest_url {
        config.manifest_url = Some(url.clone());
    }
    if let Some(version) = &args.runtime_version {
        config.runtime_version = version.clone();
    }
    if let Some(dir) = &args.updates_dir {
        config.updates_directory = dir.clone();
    }
    Ok(config)
}

async fn connect(config: &UpdatesConfig) -> anyhow::Result<UpdatesClient> {
    UpdatesClient::from_config(config)
        .await
        .context("failed to set up the update client")
}

/// JSON for an operation result, paired with whether it succeeded.
fn report<T>(
    result: Result<T, UpdatesError>,
    to_json: impl FnOnce(&T) -> serde_json::Value,
) -> (serde_json::Value, bool) {
    match result {
        Ok(outcome) => (to_json(&outcome), true),
        Err(err) => (error_json(&err), false),
    }
}

fn error_json(err: &UpdatesError) -> serde_json::Value {
    json!({
        "code": err.code(),
        "message": err.to_string(),
        "isNetworkError": err.is_network_error(),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("debug,ota_updater=debug")
    } else {
        EnvFilter::new("info,ota_updater=info")
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let config = load_config(&args)?;
    tracing::debug!(?config, "loaded configuration");

    let (output, succeeded) = match &args.command {
        Commands::Check => {
            let client = connect(&config).await?;
            report(client.orchestrator.check_for_update().await, CheckOutcome::to_json)
        }
        Commands::Fetch => {
            let client = connect(&config).await?;
            report(client.orchestrator.fetch_update().await, FetchOutcome::to_json)
        }
        Commands::Verify {
            plaintext_file,
            signature,
        } => {
            let plaintext = std::fs::read_to_string(plaintext_file)
                .with_context(|| format!("failed to read {}", plaintext_file.display()))?;
            let fetcher = match &config.cache_directory {
                Some(dir) => HttpFetcher::builder().cache_dir(dir).build(),
                None => HttpFetcher::builder().build(),
            };
            let keys = HttpKeySource::new(config.public_key_url.clone(), fetcher);
            let outcome = SignatureVerifier::new(Arc::new(keys))
                .verify(SignedPayload::new(plaintext, signature.clone()))
                .await;
            let output = match &outcome {
                VerificationOutcome::Valid => json!({ "valid": true }),
                VerificationOutcome::Invalid => json!({ "valid": false }),
                VerificationOutcome::Error {
                    cause,
                    is_network_error,
                } => json!({
                    "valid": false,
                    "error": cause.to_string(),
                    "isNetworkError": is_network_error,
                }),
            };
            (output, outcome.is_valid())
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(if succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
