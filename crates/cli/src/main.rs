//! fileledger Command Line Interface
//!
//! Opens a data directory and prints ledger, contract and verification views
//! as JSON, or records uploads, downloads, grants and votes against it.

use anyhow::{Context, Result};
use chrono::Duration;
use clap::{Args, Parser, Subcommand, ValueEnum};
use fileledger_core::ledger::{FileQuery, DEFAULT_TOP_N};
use fileledger_core::types::content_hash;
use fileledger_core::verification::DEFAULT_TOP_VERIFIERS;
use fileledger_core::{AccessPolicy, FileLedger, FileLedgerConfig, LogFormat, UploadRequest};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::num::NonZeroU32;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fileledger-cli")]
#[command(about = "fileledger operator command line interface", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Data directory, overrides the configuration
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Log level, overrides the configuration
    #[arg(long)]
    log_level: Option<String>,

    /// Log format, overrides the configuration
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check every block's hash, linkage and proof of work
    Validate,
    /// Ledger, contract and verification counters
    Stats,
    /// All recorded files with their verification status
    Files,
    /// Version history of a file name
    Versions {
        /// File name, any version of it
        name: String,
    },
    /// Activity timeline, hourly activity, top users and file types
    Analytics {
        #[arg(long, default_value_t = DEFAULT_TOP_N)]
        top: usize,
    },
    /// Access contract of a file
    Contract {
        /// File content hash
        hash: String,
    },
    /// Peer verification of a file
    Verification {
        /// File content hash
        hash: String,
    },
    /// Aggregate verification statistics
    VerificationStats,
    /// Users ranked by reputation
    TopVerifiers {
        #[arg(long, default_value_t = DEFAULT_TOP_VERIFIERS)]
        limit: usize,
    },
    /// Search recorded files
    Search(SearchArgs),
    /// Record a file already on disk
    Upload(UploadArgs),
    /// Request a download and record it when allowed
    Download {
        /// File content hash
        hash: String,
        #[arg(long)]
        user: String,
    },
    /// Grant a user access to a private file
    Grant {
        /// File content hash
        hash: String,
        user: String,
        /// Grant lifetime in hours
        #[arg(long)]
        hours: Option<i64>,
        #[arg(long)]
        max_downloads: Option<NonZeroU32>,
    },
    /// Revoke a user's grant
    Revoke {
        /// File content hash
        hash: String,
        user: String,
    },
    /// Vote on a file's authenticity
    Verify {
        /// File content hash
        hash: String,
        #[arg(long)]
        user: String,
        #[arg(long, value_enum)]
        verdict: Verdict,
        #[arg(long, default_value = "")]
        comment: String,
    },
}

#[derive(Args)]
struct SearchArgs {
    /// Substring of the file name
    #[arg(long)]
    text: Option<String>,
    /// Substring of the uploader
    #[arg(long)]
    uploader: Option<String>,
    /// File extension
    #[arg(long = "ext")]
    extension: Option<String>,
    /// Only encrypted files
    #[arg(long)]
    encrypted: bool,
}

#[derive(Args)]
struct UploadArgs {
    /// File to record
    path: PathBuf,
    #[arg(long)]
    uploader: String,
    /// Display name, defaults to the file name
    #[arg(long)]
    name: Option<String>,
    /// Allow anyone to download
    #[arg(long)]
    public: bool,
    /// Cap on public downloads
    #[arg(long)]
    max_downloads: Option<NonZeroU32>,
    /// Contract lifetime in hours
    #[arg(long)]
    expires_in_hours: Option<i64>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Verdict {
    Authentic,
    Fake,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = FileLedgerConfig::load(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }
    if let Some(log_format) = cli.log_format {
        config.log_format = log_format.into();
    }
    init_logging(&config);
    debug!(
        data_dir = %config.data_dir.display(),
        difficulty = config.difficulty,
        "Configuration loaded"
    );

    let service = FileLedger::open(&config)
        .with_context(|| format!("failed to open {}", config.data_dir.display()))?;

    run(&service, cli.command).await?;

    if service.pending_flush() {
        service.flush().context("state could not be written to disk")?;
    }
    Ok(())
}

async fn run(service: &FileLedger, command: Commands) -> Result<()> {
    match command {
        Commands::Validate => {
            let valid = service.with_ledger(|ledger| ledger.verify_integrity());
            match valid {
                Ok(()) => print_json(&json!({ "valid": true }))?,
                Err(violation) => print_json(&json!({
                    "valid": false,
                    "violation": violation.to_string(),
                }))?,
            }
        }
        Commands::Stats => print_json(&service.stats())?,
        Commands::Files => print_json(&service.files())?,
        Commands::Versions { name } => print_json(&service.file_versions(&name))?,
        Commands::Analytics { top } => print_json(&service.analytics(top))?,
        Commands::Contract { hash } => {
            let view = service.with_contracts(|contracts| {
                contracts.get(&hash).map(|contract| {
                    json!({
                        "contract": contract,
                        "state": contract.state(),
                        "stats": contract.stats(),
                    })
                })
            });
            let view = view.with_context(|| format!("no contract for {hash}"))?;
            print_json(&view)?;
        }
        Commands::Verification { hash } => print_json(&service.file_verification(&hash))?,
        Commands::VerificationStats => print_json(&service.verification_stats())?,
        Commands::TopVerifiers { limit } => print_json(&service.top_verifiers(limit))?,
        Commands::Search(args) => {
            let query = FileQuery {
                text: args.text,
                uploader: args.uploader,
                extension: args.extension,
                encrypted_only: args.encrypted,
            };
            print_json(&service.search(&query))?;
        }
        Commands::Upload(args) => {
            let receipt = service.upload(upload_request(service, args)?).await?;
            print_json(&receipt)?;
        }
        Commands::Download { hash, user } => {
            print_json(&service.download(&hash, &user).await?)?;
        }
        Commands::Grant {
            hash,
            user,
            hours,
            max_downloads,
        } => {
            let duration = hours.map(hours_to_duration).transpose()?;
            let granted = service.with_contracts(|contracts| {
                contracts.grant_permission(&hash, &user, duration, max_downloads)
            })?;
            print_json(&json!({ "granted": granted }))?;
        }
        Commands::Revoke { hash, user } => {
            let revoked =
                service.with_contracts(|contracts| contracts.revoke_permission(&hash, &user));
            print_json(&json!({ "revoked": revoked }))?;
        }
        Commands::Verify {
            hash,
            user,
            verdict,
            comment,
        } => {
            let is_authentic = matches!(verdict, Verdict::Authentic);
            print_json(&service.verify(&hash, &user, is_authentic, &comment)?)?;
        }
    }
    Ok(())
}

fn upload_request(service: &FileLedger, args: UploadArgs) -> Result<UploadRequest> {
    let bytes =
        fs::read(&args.path).with_context(|| format!("failed to read {}", args.path.display()))?;
    let name = match args.name {
        Some(name) => name,
        None => args
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .with_context(|| format!("{} has no file name", args.path.display()))?,
    };

    let plan = service.plan_upload(&name);
    let policy = AccessPolicy {
        is_public: Some(args.public),
        max_downloads: args.max_downloads,
        expiration: args.expires_in_hours.map(hours_to_duration).transpose()?,
    };
    Ok(UploadRequest::new(
        name,
        content_hash(&bytes),
        bytes.len() as u64,
        args.uploader,
        args.path.display().to_string(),
    )
    .versioned(&plan)
    .with_policy(policy))
}

fn hours_to_duration(hours: i64) -> Result<Duration> {
    Duration::try_hours(hours).with_context(|| format!("{hours} hours is out of range"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(config: &FileLedgerConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
}
