//! Seekable handle on the index file.

use crate::error::{ModsecError, Result};
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Identity of a file that survives restarts but changes when the log is rotated.
#[cfg(unix)]
pub fn file_identity(meta: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.ino()
}

/// Identity of a file that survives restarts but changes when the log is rotated.
#[cfg(not(unix))]
pub fn file_identity(meta: &Metadata) -> u64 {
    meta.created()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as u64)
}

/// An open index file and the byte position of the next unread line.
pub struct LogFile {
    path: PathBuf,
    reader: BufReader<File>,
    pos: u64,
}

impl LogFile {
    /// Opens `path` for reading and seeks to `seek` when given.
    pub fn open(path: impl AsRef<Path>, seek: Option<u64>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Opening {}, seeking to {:?}", path.display(), seek);

        let file = File::open(path).map_err(|e| ModsecError::io(path, e))?;
        let mut logfile = Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            pos: 0,
        };

        if let Some(pos) = seek {
            logfile.seek(pos)?;
        }

        Ok(logfile)
    }

    /// Moves to `pos`, which must not lie beyond the current end of the file.
    pub fn seek(&mut self, pos: u64) -> Result<()> {
        let size = self.size()?;
        if pos > size {
            return Err(ModsecError::Range {
                requested: pos,
                size,
            });
        }
        self.reader
            .seek(SeekFrom::Start(pos))
            .map_err(|e| ModsecError::io(&self.path, e))?;
        self.pos = pos;
        Ok(())
    }

    /// Reads the next complete line, `None` at end of stream.
    ///
    /// A last line without its newline is still being written by the server;
    /// it is left unread and the position stays at its start.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self
            .reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| ModsecError::io(&self.path, e))?;

        if n == 0 {
            return Ok(None);
        }

        if buf.last() != Some(&b'\n') {
            debug!(
                "Incomplete line at offset {} of {}, leaving it for the next run",
                self.pos,
                self.path.display()
            );
            self.reader
                .seek(SeekFrom::Start(self.pos))
                .map_err(|e| ModsecError::io(&self.path, e))?;
            return Ok(None);
        }

        self.pos += n as u64;
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Byte offset of the next unread line.
    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size of the open file.
    pub fn size(&self) -> Result<u64> {
        Ok(self.metadata()?.len())
    }

    /// Identity of the open file, which may differ from whatever `path` points to now.
    pub fn identity(&self) -> Result<u64> {
        Ok(file_identity(&self.metadata()?))
    }

    fn metadata(&self) -> Result<Metadata> {
        self.reader
            .get_ref()
            .metadata()
            .map_err(|e| ModsecError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn sample() -> NamedTempFile {
        let mut temp = NamedTempFile::new().unwrap();
        write!(temp, "line one\nline two\n").unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_read_lines_and_position() {
        let temp = sample();
        let mut log = LogFile::open(temp.path(), None).unwrap();

        assert_eq!(log.read_line().unwrap().as_deref(), Some("line one\n"));
        assert_eq!(log.position(), 9);
        assert_eq!(log.read_line().unwrap().as_deref(), Some("line two\n"));
        assert_eq!(log.position(), 18);
        assert_eq!(log.read_line().unwrap(), None);
    }

    #[test]
    fn test_open_with_seek() {
        let temp = sample();
        let mut log = LogFile::open(temp.path(), Some(9)).unwrap();
        assert_eq!(log.read_line().unwrap().as_deref(), Some("line two\n"));
    }

    #[test]
    fn test_seek_to_end_is_allowed() {
        let temp = sample();
        let mut log = LogFile::open(temp.path(), Some(18)).unwrap();
        assert_eq!(log.read_line().unwrap(), None);
    }

    #[test]
    fn test_seek_past_end_fails() {
        let temp = sample();
        let err = LogFile::open(temp.path(), Some(19)).err().unwrap();
        assert!(matches!(
            err,
            ModsecError::Range {
                requested: 19,
                size: 18
            }
        ));
    }

    #[test]
    fn test_open_missing_file() {
        let err = LogFile::open("/nonexistent/modsec_audit.log", None)
            .err()
            .unwrap();
        assert!(matches!(err, ModsecError::Io { .. }));
    }

    #[test]
    fn test_incomplete_line_is_not_consumed() {
        let mut temp = sample();
        write!(temp, "partial").unwrap();
        temp.flush().unwrap();

        let mut log = LogFile::open(temp.path(), Some(9)).unwrap();
        assert!(log.read_line().unwrap().is_some());
        assert_eq!(log.read_line().unwrap(), None);
        assert_eq!(log.position(), 18);

        write!(temp, " now complete\n").unwrap();
        temp.flush().unwrap();
        assert_eq!(
            log.read_line().unwrap().as_deref(),
            Some("partial now complete\n")
        );
        assert_eq!(log.position(), 39);
    }

    #[test]
    fn test_identity_matches_path_metadata() {
        let temp = sample();
        let log = LogFile::open(temp.path(), None).unwrap();
        let meta = std::fs::metadata(temp.path()).unwrap();
        assert_eq!(log.identity().unwrap(), file_identity(&meta));
        assert_eq!(log.size().unwrap(), 18);
    }
}
