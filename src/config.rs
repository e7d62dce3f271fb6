//! Runtime configuration.
//!
//! Loading order, later wins:
//! 1. built-in defaults ([`Config::default`])
//! 2. the TOML config file (default `/etc/modsecparser.toml`)
//! 3. command-line flags ([`ConfigOverrides`])
//!
//! ```toml
//! loglevel = "info"
//! concurrent_auditlog = "/var/log/modsec_audit.log"
//! concurrent_auditlogdir = "/opt/modsecurity/var/audit/"
//! output = "/var/lib/modsecparser/requestlog.csv"
//! uri_rewrite = [["^/session/[0-9a-f]+", "/session/:id"]]
//! ```

use crate::error::{ModsecError, Result};
use crate::sink::{OutputFormat, UriRewriter};
use crate::tailer::resume::DEFAULT_STATE_DIR;
use crate::tailer::TailerOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/modsecparser.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Parse and stage everything but commit, delete and advance nothing
    pub dry_run: bool,
    /// Never delete detail files, neither after parsing nor by pruning
    pub keep_tx: bool,
    /// Log destination: a file path or `STDOUT`/`STDERR`
    pub logfile: String,
    pub loglevel: String,
    /// Index file (`SecAuditLog`)
    pub concurrent_auditlog: PathBuf,
    /// Detail file directory (`SecAuditLogStorageDir`)
    pub concurrent_auditlogdir: PathBuf,
    /// `(regex, replacement)` pairs applied to request URIs before storage
    pub uri_rewrite: Vec<(String, String)>,
    /// Where resume records are kept
    pub state_dir: PathBuf,
    /// Continue from the last checkpointed offset
    pub resume: bool,
    /// Request log written by the sink
    pub output: PathBuf,
    pub output_format: OutputFormat,
    /// Checkpoint after this many stored transactions, 0 = only at the end
    pub batch_size: usize,
    /// Abort on a malformed detail file instead of skipping it
    pub strict_tx: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: false,
            keep_tx: false,
            logfile: "/var/log/modsecparser.log".to_string(),
            loglevel: "WARN".to_string(),
            concurrent_auditlog: PathBuf::from("/var/log/modsec_audit.log"),
            concurrent_auditlogdir: PathBuf::from("/opt/modsecurity/var/audit/"),
            uri_rewrite: Vec::new(),
            state_dir: PathBuf::from(DEFAULT_STATE_DIR),
            resume: true,
            output: PathBuf::from(DEFAULT_STATE_DIR).join("requestlog.csv"),
            output_format: OutputFormat::Csv,
            batch_size: 0,
            strict_tx: false,
        }
    }
}

/// Values given on the command line; `None`/`false` leaves the loaded value alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub verbose: bool,
    pub dry_run: bool,
    pub keep_tx: bool,
    pub no_resume: bool,
    pub strict: bool,
    pub logfile: Option<String>,
    pub loglevel: Option<String>,
    pub concurrent_auditlog: Option<PathBuf>,
    pub concurrent_auditlogdir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub output_format: Option<OutputFormat>,
    pub batch_size: Option<usize>,
}

impl Config {
    /// Loads `path`; an unreadable file falls back to the defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(content) => {
                debug!("Reading config from {}", path.display());
                Self::parse(&content)
            }
            Err(e) => {
                warn!("Config file {} isn't readable: {}", path.display(), e);
                Ok(Self::default())
            }
        }
    }

    /// Parses a TOML document; missing keys keep their defaults.
    pub fn parse(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| ModsecError::Config(e.to_string()))
    }

    /// Applies command-line values on top of the loaded configuration.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if overrides.verbose || overrides.dry_run {
            self.logfile = "STDOUT".to_string();
            self.loglevel = "DEBUG".to_string();
        }
        if overrides.dry_run {
            self.dry_run = true;
        }
        if overrides.keep_tx {
            self.keep_tx = true;
        }
        if overrides.no_resume {
            self.resume = false;
        }
        if overrides.strict {
            self.strict_tx = true;
        }
        if let Some(logfile) = overrides.logfile {
            self.logfile = logfile;
        }
        if let Some(loglevel) = overrides.loglevel {
            self.loglevel = loglevel;
        }
        if let Some(path) = overrides.concurrent_auditlog {
            self.concurrent_auditlog = path;
        }
        if let Some(path) = overrides.concurrent_auditlogdir {
            self.concurrent_auditlogdir = path;
        }
        if let Some(path) = overrides.output {
            self.output = path;
        }
        if let Some(format) = overrides.output_format {
            self.output_format = format;
        }
        if let Some(batch_size) = overrides.batch_size {
            self.batch_size = batch_size;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !VALID_LOG_LEVELS.contains(&self.loglevel.to_lowercase().as_str()) {
            return Err(ModsecError::Config(format!(
                "loglevel {:?} must be one of: {}",
                self.loglevel,
                VALID_LOG_LEVELS.join(", ")
            )));
        }
        if self.concurrent_auditlog.as_os_str().is_empty() {
            return Err(ModsecError::Config(
                "concurrent_auditlog must not be empty".to_string(),
            ));
        }
        self.uri_rewriter()?;
        Ok(())
    }

    /// Whether the run may commit, delete and advance the offset.
    pub fn commits(&self) -> bool {
        !self.dry_run && !self.keep_tx
    }

    pub fn tailer_options(&self) -> TailerOptions {
        TailerOptions {
            remove_parsed_tx: !self.keep_tx,
            prune_old_tx: !self.keep_tx,
            strict: self.strict_tx,
        }
    }

    pub fn uri_rewriter(&self) -> Result<UriRewriter> {
        UriRewriter::new(&self.uri_rewrite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.dry_run);
        assert!(config.resume);
        assert_eq!(config.loglevel, "WARN");
        assert_eq!(
            config.concurrent_auditlogdir,
            PathBuf::from("/opt/modsecurity/var/audit/")
        );
        assert!(config.validate().is_ok());
        assert!(config.commits());
    }

    #[test]
    fn test_parse_partial_file() {
        let config = Config::parse(
            r#"
loglevel = "info"
concurrent_auditlog = "/srv/log/audit.log"
output_format = "jsonl"
batch_size = 500
uri_rewrite = [["^/session/[0-9a-f]+", "/session/:id"]]
"#,
        )
        .unwrap();

        assert_eq!(config.loglevel, "info");
        assert_eq!(config.concurrent_auditlog, PathBuf::from("/srv/log/audit.log"));
        assert_eq!(config.output_format, OutputFormat::Jsonl);
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.uri_rewrite.len(), 1);
        assert_eq!(config.uri_rewrite[0].1, "/session/:id");
        assert_eq!(config.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
    }

    #[test]
    fn test_parse_invalid_toml() {
        assert!(matches!(
            Config::parse("loglevel = "),
            Err(ModsecError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/modsecparser.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply(ConfigOverrides {
            dry_run: true,
            no_resume: true,
            output_format: Some(OutputFormat::Jsonl),
            concurrent_auditlogdir: Some(PathBuf::from("/tmp/audit")),
            ..Default::default()
        });

        assert!(config.dry_run);
        assert!(!config.resume);
        assert!(!config.commits());
        assert_eq!(config.logfile, "STDOUT");
        assert_eq!(config.loglevel, "DEBUG");
        assert_eq!(config.output_format, OutputFormat::Jsonl);
        assert_eq!(config.concurrent_auditlogdir, PathBuf::from("/tmp/audit"));
    }

    #[test]
    fn test_explicit_loglevel_beats_verbose() {
        let mut config = Config::default();
        config.apply(ConfigOverrides {
            verbose: true,
            loglevel: Some("info".to_string()),
            ..Default::default()
        });
        assert_eq!(config.logfile, "STDOUT");
        assert_eq!(config.loglevel, "info");
    }

    #[test]
    fn test_keep_tx_disables_deletion() {
        let config = Config {
            keep_tx: true,
            ..Default::default()
        };
        let options = config.tailer_options();
        assert!(!options.remove_parsed_tx);
        assert!(!options.prune_old_tx);
        assert!(!config.commits());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = Config {
            loglevel: "chatty".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            uri_rewrite: vec![("([".to_string(), "x".to_string())],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ModsecError::Config(_))));
    }
}
