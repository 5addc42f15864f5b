use anyhow::{Context, anyhow};
use clap::{Args, Parser, Subcommand, ValueEnum};
use s3reader::{
    Config, MemoryOutcome, OutputFormat, Payload, Session, download_keys, download_keys_to_memory,
    list_object_keys,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// s3reader: list and download files from S3 compatible object stores
#[derive(Parser, Debug)]
#[command(name = "s3reader")]
#[command(about = "List and download files from S3 compatible object stores", long_about = None)]
struct Cli {
    /// Path to a JSON or YAML configuration file
    #[arg(short, long, env = "S3READER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// AWS region (overrides the configuration file)
    #[arg(long, env = "AWS_REGION_NAME", global = true)]
    region: Option<String>,

    /// AWS profile name (overrides the configuration file)
    #[arg(long, env = "AWS_PROFILE_NAME", global = true)]
    profile: Option<String>,

    /// Custom endpoint for S3 compatible stores
    #[arg(long, env = "S3_ENDPOINT_URL", global = true)]
    endpoint: Option<String>,

    /// Maximum number of concurrent listings or downloads
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Get the list of keys under one or more prefixes
    #[command(alias = "s3list")]
    List {
        /// Bucket name
        #[arg(short, long)]
        bucket: String,

        /// Key prefixes to list
        #[arg(short, long, num_args = 1.., required = true)]
        prefixes: Vec<String>,
    },

    /// Download objects by key or by prefix
    #[command(alias = "s3download")]
    Download {
        /// Bucket name
        #[arg(short, long)]
        bucket: String,

        #[command(flatten)]
        target: DownloadTarget,

        /// Download target directory
        #[arg(short = 'd', long, default_value = ".", conflicts_with = "format")]
        output_dir: PathBuf,

        /// Print objects to stdout instead of writing files: `json` prints one
        /// `{"<key>": <document>}` line per object, `bytes` the raw contents
        #[arg(short, long, value_enum)]
        format: Option<Format>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Json,
    Bytes,
}

impl From<Format> for OutputFormat {
    fn from(format: Format) -> Self {
        match format {
            Format::Json => OutputFormat::Json,
            Format::Bytes => OutputFormat::Bytes,
        }
    }
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct DownloadTarget {
    /// Object keys to download
    #[arg(short, long, num_args = 1..)]
    keys: Vec<String>,

    /// Key prefixes whose objects are downloaded
    #[arg(short, long, num_args = 1..)]
    prefixes: Vec<String>,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path).map_err(|e| {
                anyhow!("Failed to load config file '{}': {}", path.display(), e)
            })?;
            tracing::info!("Loaded configuration from {}", path.display());
            config
        }
        None => Config::default(),
    };

    // Command line flags win over the configuration file
    if let Some(region) = &cli.region {
        config.client.region = region.clone();
    }
    if let Some(profile) = &cli.profile {
        config.client.profile = Some(profile.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.client.endpoint = Some(endpoint.clone());
        config.client.force_path_style = true;
    }
    if let Some(concurrency) = cli.concurrency {
        config.concurrency = concurrency;
    }

    Ok(config)
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<ExitCode> {
    let config = load_config(&cli)?;
    let concurrency = config.concurrency;

    let session = Session::connect(config)
        .await
        .context("Failed to initialize S3 client")?;

    let code = match cli.command {
        Command::List { bucket, prefixes } => {
            let keys = session
                .lister()
                .list_prefixes(&bucket, &prefixes, concurrency, cancel)
                .await
                .with_context(|| format!("Failed to list s3://{}", bucket))?;

            for key in &keys {
                println!("{}", key);
            }
            tracing::info!("Listed {} keys", keys.len());
            ExitCode::SUCCESS
        }
        Command::Download {
            bucket,
            target,
            output_dir,
            format,
        } => {
            let keys = if target.keys.is_empty() {
                list_object_keys(
                    &session.lister(),
                    &bucket,
                    &target.prefixes,
                    concurrency,
                    cancel.clone(),
                )
                .await
                .with_context(|| format!("Failed to list s3://{}", bucket))?
            } else {
                target.keys
            };

            let reader = session.reader();
            let (total, failed) = match format {
                Some(format) => {
                    let outcomes = download_keys_to_memory(
                        &reader,
                        &bucket,
                        &keys,
                        format.into(),
                        concurrency,
                        cancel,
                    )
                    .await;
                    print_payloads(&outcomes).await?;
                    (outcomes.len(), outcomes.iter().filter(|o| o.result.is_err()).count())
                }
                None => {
                    let outcomes =
                        download_keys(&reader, &bucket, &keys, &output_dir, concurrency, cancel)
                            .await;
                    tracing::info!("Wrote objects into {}", output_dir.display());
                    (outcomes.len(), outcomes.iter().filter(|o| o.result.is_err()).count())
                }
            };

            tracing::info!("Downloaded {} of {} objects", total - failed, total);

            if failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
    };

    session.close();
    Ok(code)
}

async fn print_payloads(outcomes: &[MemoryOutcome]) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    for outcome in outcomes {
        match &outcome.result {
            Ok(Payload::Json(document)) => {
                let mut line = serde_json::Map::new();
                line.insert(outcome.key.clone(), document.clone());
                let line = serde_json::Value::Object(line).to_string();
                stdout.write_all(line.as_bytes()).await?;
                stdout.write_all(b"\n").await?;
            }
            Ok(Payload::Bytes(data)) => stdout.write_all(data).await?,
            Err(_) => {}
        }
    }
    stdout.flush().await?;
    Ok(())
}

/// Load `.env` from the working directory so clap's `env` fallbacks can
/// pick up values from it. A missing file is not an error.
fn load_dotenv() -> Option<dotenvy::Error> {
    match dotenvy::dotenv() {
        Err(err) if !err.not_found() => Some(err),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let dotenv_error = load_dotenv();

    // Logs go to stderr so stdout carries only program output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(err) = dotenv_error {
        tracing::warn!("Failed to load .env file: {}", err);
    }

    let cli = Cli::parse();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling in-flight requests");
            ctrl_c.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_download_format_flag() {
        let cli = Cli::try_parse_from([
            "s3reader", "download", "-b", "data", "-k", "a.json", "b.json", "--format", "json",
        ])
        .unwrap();

        let Command::Download { target, format, .. } = cli.command else {
            panic!("Expected the download command");
        };
        assert_eq!(target.keys, vec!["a.json", "b.json"]);
        assert_eq!(format, Some(Format::Json));
        assert_eq!(OutputFormat::from(Format::Bytes), OutputFormat::Bytes);
    }

    #[test]
    fn test_format_conflicts_with_output_dir() {
        let result = Cli::try_parse_from([
            "s3reader", "download", "-b", "data", "-k", "a.json", "-d", "out", "--format", "bytes",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_dotenv_values_feed_env_fallbacks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "AWS_PROFILE_NAME=from-dotenv").unwrap();
        dotenvy::from_path_override(file.path()).unwrap();

        let cli = Cli::try_parse_from(["s3reader", "list", "-b", "data", "-p", "logs/"]).unwrap();
        assert_eq!(cli.profile.as_deref(), Some("from-dotenv"));
    }
}
