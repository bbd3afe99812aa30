//! stellar-archivist - inspect, mirror and repair Stellar history archives.
//!
//! # Quick Start
//!
//! ```bash
//! # Show the latest checkpoint an archive publishes
//! stellar-archivist status https://history.stellar.org/prd/core-testnet/core_testnet_001
//!
//! # Look for missing files in the last 10000 ledgers, verifying hashes
//! stellar-archivist scan --last 10000 --verify file:///srv/history
//!
//! # Copy a public archive into a local directory
//! stellar-archivist mirror --concurrency 64 \
//!     https://history.stellar.org/prd/core-testnet/core_testnet_001 file:///srv/history
//!
//! # Fill gaps in a local copy from the public archive
//! stellar-archivist repair \
//!     https://history.stellar.org/prd/core-testnet/core_testnet_001 file:///srv/history
//! ```
//!
//! Archives are named by URL: `file://`, `http(s)://`, `s3://bucket/prefix`
//! or `gcs://bucket/prefix`.

mod config;
mod logging;

use std::path::PathBuf;

use anyhow::Context;
use archivist_history::{
    mirror, repair, Archive, ArchiveInterface, CommandOptions, CopyReport, Range, StatsSnapshot,
};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use crate::config::Config;
use crate::logging::{LogConfig, LogFormat};

/// Inspect, mirror and repair Stellar history archives
#[derive(Parser, Debug)]
#[command(name = "stellar-archivist")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Log output format
    #[arg(long, global = true)]
    log_format: Option<CliLogFormat>,

    #[command(flatten)]
    opts: CliOptions,

    #[command(subcommand)]
    command: Commands,
}

/// Log output format for CLI
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogFormat {
    Text,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(fmt: CliLogFormat) -> Self {
        match fmt {
            CliLogFormat::Text => LogFormat::Text,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

/// Flags shared by every command.
#[derive(Args, Debug, Default)]
struct CliOptions {
    /// First ledger of the range to operate on
    #[arg(long, global = true)]
    low: Option<u32>,

    /// Last ledger of the range to operate on
    #[arg(long, global = true)]
    high: Option<u32>,

    /// Operate on the last N ledgers the (source) archive publishes
    #[arg(long, value_name = "N", global = true, conflicts_with_all = ["low", "high"])]
    last: Option<u32>,

    /// Number of parallel requests
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Log what would be copied without writing anything
    #[arg(long = "dryrun", global = true)]
    dry_run: bool,

    /// Overwrite files that already exist at the destination
    #[arg(long, global = true)]
    force: bool,

    /// Verify hashes of ledgers, transactions, results and buckets
    #[arg(long, global = true)]
    verify: bool,

    /// Decode every bucket entry when verifying
    #[arg(long, global = true)]
    thorough: bool,

    /// Ignore optional (scp) files
    #[arg(long, global = true)]
    skip_optional: bool,

    /// Network passphrase archives must publish
    #[arg(long, global = true)]
    network_passphrase: Option<String>,

    /// Directory for the on-disk cache of downloaded files
    #[arg(long, value_name = "DIR", global = true)]
    cache_path: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the state an archive currently publishes
    Status {
        /// Archive URL
        url: String,
    },

    /// Scan an archive for missing (and, with --verify, corrupt) files
    Scan {
        /// Archive URL
        url: String,
    },

    /// Copy a range of checkpoints from one archive to another
    Mirror {
        /// Source archive URL
        src: String,
        /// Destination archive URL
        dst: String,
    },

    /// Copy files missing from the destination archive out of the source
    Repair {
        /// Source archive URL
        src: String,
        /// Destination archive URL
        dst: String,
    },

    /// Print a history archive state file as JSON
    DumpHas {
        /// Archive URL
        url: String,

        /// Checkpoint to dump instead of the root state
        #[arg(long)]
        checkpoint: Option<u32>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli_overrides(&mut config, &cli.opts);

    init_logging(&cli, &config)?;
    if let Some(path) = &cli.config {
        info!(path = %path.display(), "Loaded configuration");
    }

    match &cli.command {
        Commands::Status { url } => cmd_status(&config, url),
        Commands::Scan { url } => cmd_scan(&config, &cli.opts, url),
        Commands::Mirror { src, dst } => cmd_mirror(&config, &cli.opts, src, dst),
        Commands::Repair { src, dst } => cmd_repair(&config, &cli.opts, src, dst),
        Commands::DumpHas { url, checkpoint } => cmd_dump_has(&config, url, *checkpoint),
    }
}

/// Initialize the logging subsystem. Flags win over the configuration file.
fn init_logging(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    let level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let format = match cli.log_format {
        Some(format) => format.into(),
        None => config.logging.format.parse()?,
    };

    let log_config = LogConfig {
        ansi_colors: config.logging.colors,
        with_source_location: cli.trace,
        with_thread_ids: cli.verbose || cli.trace,
        ..LogConfig::default()
    }
    .with_level(level)
    .with_format(format);

    logging::init(&log_config)?;
    tracing::debug!("Logging initialized");
    Ok(())
}

fn apply_cli_overrides(config: &mut Config, opts: &CliOptions) {
    if let Some(passphrase) = &opts.network_passphrase {
        config.archive.network_passphrase = passphrase.clone();
    }
    if let Some(concurrency) = opts.concurrency {
        config.archive.concurrency = concurrency;
    }
    if let Some(path) = &opts.cache_path {
        config.cache.path = Some(path.clone());
    }
}

fn connect(config: &Config, url: &str) -> anyhow::Result<Archive> {
    Archive::connect(url, &config.archive_options())
        .with_context(|| format!("connecting to archive {url}"))
}

/// Build command options, resolving `--last` against `archive`'s root state.
fn command_options(
    config: &Config,
    opts: &CliOptions,
    archive: &Archive,
) -> anyhow::Result<CommandOptions> {
    let range = match opts.last {
        Some(last) => {
            let current = archive
                .get_latest_ledger_sequence()
                .with_context(|| format!("reading root state of {}", archive.name()))?;
            archive
                .checkpoint_manager()
                .make_range(current.saturating_sub(last), current)
        }
        None => Range::new(opts.low.unwrap_or(0), opts.high.unwrap_or(u32::MAX)),
    };
    if range.low > range.high {
        anyhow::bail!("invalid range {range}: low is above high");
    }

    Ok(CommandOptions {
        concurrency: config.archive.concurrency,
        range,
        dry_run: opts.dry_run,
        force: opts.force,
        verify: opts.verify,
        thorough: opts.thorough,
        skip_optional: opts.skip_optional,
    })
}

/// Command options for copying from `src` to `dst`. `--last` counts back from the source.
fn copy_options(
    config: &Config,
    opts: &CliOptions,
    src: &Archive,
) -> anyhow::Result<CommandOptions> {
    command_options(config, opts, src)
}

fn log_stats(stats: &[StatsSnapshot]) {
    for snapshot in stats {
        match serde_json::to_string(snapshot) {
            Ok(json) => info!(archive = %snapshot.backend_name, stats = %json, "Archive stats"),
            Err(e) => warn!(error = %e, "Failed to encode archive stats"),
        }
    }
}

fn log_report(report: &CopyReport) {
    info!(
        checkpoint_files = report.checkpoint_files,
        buckets = report.buckets,
        skipped = report.skipped,
        "Copy finished"
    );
}

/// Print a summary of the root HAS.
fn cmd_status(config: &Config, url: &str) -> anyhow::Result<()> {
    let archive = connect(config, url)?;
    let has = archive
        .get_root_has()
        .with_context(|| format!("reading root state of {url}"))?;
    let mgr = archive.checkpoint_manager();

    println!("archive:            {url}");
    println!("server:             {}", has.server);
    println!("current ledger:     {}", has.current_ledger);
    println!(
        "network passphrase: {}",
        has.network_passphrase().unwrap_or("<unset>")
    );
    println!("checkpoint range:   {}", has.range(&mgr));
    println!("buckets referenced: {}", has.buckets().len());
    Ok(())
}

/// Scan one archive and fail if anything is missing or, with `--verify`, invalid.
fn cmd_scan(config: &Config, opts: &CliOptions, url: &str) -> anyhow::Result<()> {
    let archive = connect(config, url)?;
    let cmd_opts = command_options(config, opts, &archive)?;

    let scanned = archive.scan(&cmd_opts);
    let range = match &scanned {
        Ok(range) => *range,
        Err(e) => {
            if e.is_not_found() {
                anyhow::bail!("archive {url} has no root state: {e}");
            }
            warn!(error = %e, "Scan finished with errors");
            cmd_opts.range
        }
    };

    let missing = archive.report_missing(&range, &cmd_opts);
    let invalid = archive.report_invalid(&cmd_opts);
    log_stats(&archive.stats());

    invalid.context("verification failed")?;
    if missing != 0 {
        anyhow::bail!("{missing} files missing in {range}");
    }
    scanned.context("scan failed")?;
    Ok(())
}

fn cmd_mirror(config: &Config, opts: &CliOptions, src: &str, dst: &str) -> anyhow::Result<()> {
    let src = connect(config, src)?;
    let dst = connect(config, dst)?;
    let cmd_opts = copy_options(config, opts, &src)?;

    let result = mirror(&src, &dst, &cmd_opts);
    log_stats(&src.stats());
    log_stats(&dst.stats());
    let report = result.context("mirror failed")?;
    log_report(&report);
    dst.close().context("closing destination archive")?;
    Ok(())
}

fn cmd_repair(config: &Config, opts: &CliOptions, src: &str, dst: &str) -> anyhow::Result<()> {
    let src = connect(config, src)?;
    let dst = connect(config, dst)?;
    let cmd_opts = copy_options(config, opts, &src)?;

    let result = repair(&src, &dst, &cmd_opts);
    log_stats(&src.stats());
    log_stats(&dst.stats());
    let report = result.context("repair failed")?;
    log_report(&report);
    dst.close().context("closing destination archive")?;
    Ok(())
}

fn cmd_dump_has(config: &Config, url: &str, checkpoint: Option<u32>) -> anyhow::Result<()> {
    let archive = connect(config, url)?;
    let has = match checkpoint {
        Some(chk) => {
            let chk = archive.checkpoint_manager().get_checkpoint(chk);
            archive
                .get_checkpoint_has(chk)
                .with_context(|| format!("reading state of checkpoint {chk}"))?
        }
        None => archive.get_root_has().context("reading root state")?,
    };
    println!("{}", has.to_json()?);
    Ok(())
}
