use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use modsec_audit_tools::commands;
use modsec_audit_tools::config::{Config, ConfigOverrides, DEFAULT_CONFIG_PATH};
use modsec_audit_tools::sink::OutputFormat;
use modsec_audit_tools::utils::logging::{bootstrap_subscriber, init_logging};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "modsecparser")]
#[command(about = "ModSecurity concurrent audit log ingestion", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new transactions from the concurrent audit log
    ///
    /// Reads the index file from the last checkpoint, writes every complete
    /// transaction to the request log, deletes consumed detail files and
    /// prunes stale ones.
    Ingest {
        /// Log debug output to stdout
        #[arg(short, long)]
        verbose: bool,

        /// Parse everything but commit, delete and checkpoint nothing (implies -v)
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Keep detail files, neither delete parsed ones nor prune
        #[arg(short, long)]
        keep_tx: bool,

        /// Config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Log destination: a file, STDOUT or STDERR
        #[arg(long)]
        logfile: Option<String>,

        /// Log level (trace, debug, info, warn, error)
        #[arg(long)]
        loglevel: Option<String>,

        /// Index file of the concurrent audit log
        #[arg(long)]
        auditlog: Option<PathBuf>,

        /// Directory holding the detail files
        #[arg(long)]
        concurrent_auditlogdir: Option<PathBuf>,

        /// Request log to append to
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Request log format
        #[arg(long, value_enum)]
        format: Option<OutputFormat>,

        /// Checkpoint after this many stored transactions (0 = at the end only)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Start at the beginning of the index file instead of the last checkpoint
        #[arg(long)]
        no_resume: bool,

        /// Abort on a malformed detail file instead of skipping it
        #[arg(long)]
        strict: bool,

        /// Show a progress spinner on stderr
        #[arg(long)]
        progress: bool,

        /// Print a summary when done
        #[arg(long)]
        stats: bool,
    },

    /// Remove stale detail files and empty directories
    Prune {
        /// Config file
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Directory holding the detail files
        #[arg(long)]
        concurrent_auditlogdir: Option<PathBuf>,

        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Parse one detail file and print it as JSON
    Inspect {
        /// Detail file
        file: PathBuf,

        /// Index line of the transaction, supplies the response code
        #[arg(long)]
        index_line: Option<String>,
    },

    /// Generate shell completion scripts
    GenerateCompletion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Loads the config file with warnings going to stderr until logging is set up.
fn load_config(path: &Path) -> Result<Config> {
    tracing::subscriber::with_default(bootstrap_subscriber(), || Config::load(path))
        .with_context(|| format!("Failed to load config {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ingest {
            verbose,
            dry_run,
            keep_tx,
            config,
            logfile,
            loglevel,
            auditlog,
            concurrent_auditlogdir,
            output,
            format,
            batch_size,
            no_resume,
            strict,
            progress,
            stats,
        } => {
            let mut cfg = load_config(&config)?;
            cfg.apply(ConfigOverrides {
                verbose,
                dry_run,
                keep_tx,
                no_resume,
                strict,
                logfile,
                loglevel,
                concurrent_auditlog: auditlog,
                concurrent_auditlogdir,
                output,
                output_format: format,
                batch_size,
            });
            cfg.validate().context("Invalid configuration")?;
            init_logging(&cfg.logfile, &cfg.loglevel)?;

            let summary = commands::ingest::run(&cfg, progress)?;
            if stats {
                summary.report();
            }
            Ok(())
        }
        Commands::Prune {
            config,
            concurrent_auditlogdir,
            dry_run,
        } => {
            let mut cfg = load_config(&config)?;
            cfg.apply(ConfigOverrides {
                concurrent_auditlogdir,
                ..Default::default()
            });
            cfg.validate().context("Invalid configuration")?;
            init_logging(&cfg.logfile, &cfg.loglevel)?;

            commands::prune::run(&cfg.concurrent_auditlogdir, dry_run)?;
            Ok(())
        }
        Commands::Inspect { file, index_line } => {
            commands::inspect::run(&file, index_line.as_deref())
        }
        Commands::GenerateCompletion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "modsecparser", &mut std::io::stdout());
            Ok(())
        }
    }
}
