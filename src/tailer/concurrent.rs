//! Tailer for the concurrent audit log format.
//!
//! In this layout ModSecurity writes one summary line per request to the
//! index file and the full transaction to its own file below the storage
//! directory. "Concurrent" names the file layout; the tailer itself is
//! single-threaded.

use super::logfile::LogFile;
use super::prune::{prune_tx_dir, PruneStats};
use super::resume::ResumeStore;
use super::{Tailer, TailerOptions, TailerStats};
use crate::audit::{parse_sections, IndexEntry, Transaction};
use crate::error::{ModsecError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

pub struct ConcurrentTailer {
    /// `None` once closed
    logfile: Option<LogFile>,
    tx_log_dir: PathBuf,
    resume_store: ResumeStore,
    processed_tx_files: Vec<PathBuf>,
    options: TailerOptions,
    stats: TailerStats,
}

impl ConcurrentTailer {
    pub fn new(
        logfile: LogFile,
        tx_log_dir: impl Into<PathBuf>,
        resume_store: ResumeStore,
        options: TailerOptions,
    ) -> Self {
        debug!("created a new concurrent tailer");
        Self {
            logfile: Some(logfile),
            tx_log_dir: tx_log_dir.into(),
            resume_store,
            processed_tx_files: Vec::new(),
            options,
            stats: TailerStats::default(),
        }
    }

    pub fn tx_log_dir(&self) -> &Path {
        &self.tx_log_dir
    }

    /// Detail files consumed since the last checkpoint.
    pub fn processed_tx_files(&self) -> &[PathBuf] {
        &self.processed_tx_files
    }

    pub fn options_mut(&mut self) -> &mut TailerOptions {
        &mut self.options
    }

    /// Offset of the next unread index line, `None` once closed.
    pub fn position(&self) -> Option<u64> {
        self.logfile.as_ref().map(LogFile::position)
    }

    pub fn is_closed(&self) -> bool {
        self.logfile.is_none()
    }

    /// Where the detail file named by an index entry lives.
    ///
    /// `None` when the name climbs out of the storage directory.
    pub fn tx_file_path(&self, entry: &IndexEntry) -> Option<PathBuf> {
        let relative = Path::new(entry.transaction_file.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return None;
        }
        Some(self.tx_log_dir.join(relative))
    }

    /// Turns one index line into a transaction.
    ///
    /// Returns `Ok(None)` when the line is skipped. Only a malformed detail
    /// file in strict mode is an error.
    pub fn process_line(&mut self, line: &str) -> Result<Option<Transaction>> {
        let Some(entry) = IndexEntry::parse(line) else {
            warn!(
                "Couldn't parse tx concurrent log line: '{}'",
                line.trim_end()
            );
            self.stats.unparsable_lines += 1;
            return Ok(None);
        };

        let Some(tx_file) = self.tx_file_path(&entry) else {
            warn!(
                "Ignoring tx file {}, it's outside of {}",
                entry.transaction_file,
                self.tx_log_dir.display()
            );
            self.stats.missing_files += 1;
            return Ok(None);
        };

        let raw = match fs::read(&tx_file) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    "Couldn't parse transaction, tx file {} didn't exist",
                    tx_file.display()
                );
                self.stats.missing_files += 1;
                return Ok(None);
            }
            Err(e) => {
                warn!("Couldn't read tx file {}: {}", tx_file.display(), e);
                self.stats.missing_files += 1;
                return Ok(None);
            }
        };

        let sections = match parse_sections(&raw) {
            Ok(sections) => sections,
            Err(e) if self.options.strict => {
                return Err(ModsecError::parse(format!("{}: {}", tx_file.display(), e)));
            }
            Err(e) => {
                warn!("Couldn't parse transaction {}: {}", tx_file.display(), e);
                self.stats.malformed_files += 1;
                return Ok(None);
            }
        };

        self.processed_tx_files.push(tx_file);
        self.stats.transactions += 1;

        // The nginx connector does not log the status line in the response
        // headers, so the index line is the only reliable source.
        Ok(Some(Transaction::build(sections, Some(entry.response_code))))
    }

    fn remove_processed_tx_files(&mut self) {
        if !self.options.remove_parsed_tx {
            debug!("Not removing processed TX, disabled in instance");
            self.processed_tx_files.clear();
            return;
        }

        for tx_file in self.processed_tx_files.drain(..) {
            debug!("Removing {}", tx_file.display());
            match fs::remove_file(&tx_file) {
                Ok(()) => self.stats.removed_files += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("TX file {} already gone", tx_file.display());
                }
                Err(e) => warn!("Failed to remove {}: {}", tx_file.display(), e),
            }
        }
    }
}

impl Tailer for ConcurrentTailer {
    fn process_next(&mut self) -> Result<Option<Transaction>> {
        loop {
            let logfile = self
                .logfile
                .as_mut()
                .ok_or(ModsecError::Closed("tailer"))?;

            let Some(line) = logfile.read_line()? else {
                return Ok(None);
            };
            self.stats.lines_read += 1;

            if let Some(tx) = self.process_line(&line)? {
                return Ok(Some(tx));
            }
        }
    }

    fn checkpoint(&mut self) -> Result<()> {
        if self.logfile.is_none() {
            return Err(ModsecError::Closed("tailer"));
        }

        self.remove_processed_tx_files();

        if let Some(logfile) = self.logfile.as_ref() {
            self.resume_store
                .write(logfile.path(), logfile.identity()?, logfile.position())?;
        }
        Ok(())
    }

    fn prune(&mut self) -> Result<PruneStats> {
        if !self.options.prune_old_tx {
            debug!("Not pruning old TX, disabled in instance");
            return Ok(PruneStats::default());
        }
        prune_tx_dir(&self.tx_log_dir, SystemTime::now(), false)
    }

    fn close(&mut self) -> Result<()> {
        if self.logfile.is_none() {
            return Ok(());
        }
        self.checkpoint()?;
        self.logfile = None;
        Ok(())
    }

    fn stats(&self) -> &TailerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const TX_NAME: &str = "20200101-000000-AAAAAAAAAAAAAAAAAAAAAAAA";

    fn index_line(file: &str) -> String {
        format!(
            r#"- 10.0.0.1 - - [01/Jan/2020:00:00:00 +0000] "GET /x HTTP/1.1" 200 123 "-" "UA" abc "sid" {} 0 50 chk"#,
            file
        )
    }

    fn detail() -> &'static str {
        "--b1-A--\n[01/Jan/2020:00:00:00 +0000] abc 10.0.0.1 5555 10.0.0.2 80\n\n--b1-Z--\n"
    }

    fn setup(lines: &[String]) -> (TempDir, ConcurrentTailer) {
        let dir = TempDir::new().unwrap();
        let txdir = dir.path().join("audit");
        fs::create_dir(&txdir).unwrap();
        let index = dir.path().join("modsec_audit.log");
        let mut f = fs::File::create(&index).unwrap();
        for line in lines {
            writeln!(f, "{}", line).unwrap();
        }
        let logfile = LogFile::open(&index, None).unwrap();
        let tailer = ConcurrentTailer::new(
            logfile,
            &txdir,
            ResumeStore::new(dir.path().join("state")),
            TailerOptions::default(),
        );
        (dir, tailer)
    }

    #[test]
    fn test_tx_file_path_is_relative_to_dir() {
        let (dir, tailer) = setup(&[]);
        let entry = IndexEntry::parse(&index_line("/20200101/x/name")).unwrap();
        assert_eq!(
            tailer.tx_file_path(&entry),
            Some(dir.path().join("audit").join("20200101/x/name"))
        );
    }

    #[test]
    fn test_tx_file_outside_dir_is_ignored() {
        let (dir, mut tailer) = setup(&[index_line("/../escape"), index_line("/a/../../escape")]);
        let outside = dir.path().join("escape");
        fs::write(&outside, detail()).unwrap();

        assert!(tailer.process_next().unwrap().is_none());
        tailer.checkpoint().unwrap();

        assert!(outside.exists());
        assert_eq!(tailer.stats().transactions, 0);
        assert_eq!(tailer.stats().missing_files, 2);
        assert_eq!(tailer.stats().removed_files, 0);
    }

    #[test]
    fn test_skips_bad_lines_until_exhausted() {
        let (_dir, mut tailer) = setup(&["garbage".to_string(), index_line(TX_NAME)]);
        assert!(tailer.process_next().unwrap().is_none());
        assert_eq!(tailer.stats().lines_read, 2);
        assert_eq!(tailer.stats().unparsable_lines, 1);
        assert_eq!(tailer.stats().missing_files, 1);
    }

    #[test]
    fn test_strict_mode_fails_on_malformed_file() {
        let (dir, mut tailer) = setup(&[index_line(TX_NAME)]);
        fs::write(dir.path().join("audit").join(TX_NAME), "--b1-B--\nx\n--b1-Z--\n").unwrap();
        tailer.options_mut().strict = true;

        let err = tailer.process_next().unwrap_err();
        assert!(matches!(err, ModsecError::Parse(_)));
        assert!(err.to_string().contains(TX_NAME));
    }

    #[test]
    fn test_lenient_mode_skips_malformed_file() {
        let (dir, mut tailer) = setup(&[index_line(TX_NAME)]);
        fs::write(dir.path().join("audit").join(TX_NAME), "--b1-B--\nx\n--b1-Z--\n").unwrap();

        assert!(tailer.process_next().unwrap().is_none());
        assert_eq!(tailer.stats().malformed_files, 1);
        assert!(tailer.processed_tx_files().is_empty());
    }

    #[test]
    fn test_closed_tailer_rejects_work() {
        let (dir, mut tailer) = setup(&[index_line(TX_NAME)]);
        fs::write(dir.path().join("audit").join(TX_NAME), detail()).unwrap();

        tailer.close().unwrap();
        assert!(tailer.is_closed());
        assert!(matches!(
            tailer.process_next(),
            Err(ModsecError::Closed(_))
        ));
        assert!(matches!(tailer.checkpoint(), Err(ModsecError::Closed(_))));
        assert!(tailer.close().is_ok());
    }

    #[test]
    fn test_keep_mode_retains_files_but_forgets_them() {
        let (dir, mut tailer) = setup(&[index_line(TX_NAME)]);
        let tx_path = dir.path().join("audit").join(TX_NAME);
        fs::write(&tx_path, detail()).unwrap();
        tailer.options_mut().remove_parsed_tx = false;

        assert!(tailer.process_next().unwrap().is_some());
        tailer.checkpoint().unwrap();
        assert!(tx_path.exists());
        assert!(tailer.processed_tx_files().is_empty());
        assert_eq!(tailer.stats().removed_files, 0);
    }
}
