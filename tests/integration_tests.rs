/// End-to-end tests: index file + detail directory in, request log out.
use modsec_audit_tools::commands::ingest;
use modsec_audit_tools::config::Config;
use modsec_audit_tools::sink::OutputFormat;
use modsec_audit_tools::tailer::{create_tailer, ResumeStore, Tailer, TailerOptions};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Index file, detail directory and state/output locations in one temp dir.
struct AuditLogFixture {
    dir: TempDir,
}

impl AuditLogFixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("audit")).unwrap();
        fs::File::create(dir.path().join("modsec_audit.log")).unwrap();
        Self { dir }
    }

    fn index(&self) -> PathBuf {
        self.dir.path().join("modsec_audit.log")
    }

    fn txdir(&self) -> PathBuf {
        self.dir.path().join("audit")
    }

    fn output(&self) -> PathBuf {
        self.dir.path().join("out").join("requestlog.csv")
    }

    fn config(&self) -> Config {
        Config {
            concurrent_auditlog: self.index(),
            concurrent_auditlogdir: self.txdir(),
            state_dir: self.dir.path().join("state"),
            output: self.output(),
            ..Default::default()
        }
    }

    /// Writes a detail file below a dated subdirectory and appends its index line.
    fn add_transaction(&self, n: usize, uri: &str, status: u16) -> PathBuf {
        let name = format!("20200101-0000{:02}-{:X>24}", n, n);
        let rel = format!("/20200101/20200101-0000/{}", name);
        let path = self.txdir().join(rel.trim_start_matches('/'));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            format!(
                "--c0ffee{n}-A--\n\
[01/Jan/2020:00:00:{n:02} +0000] tx{n} 10.0.0.1 5555 10.0.0.2 80\n\
\n\
--c0ffee{n}-B--\n\
GET {uri} HTTP/1.1\n\
Host: example.org\n\
\n\
--c0ffee{n}-F--\n\
HTTP/1.1 500 Internal Server Error\n\
\n\
--c0ffee{n}-Z--\n"
            ),
        )
        .unwrap();

        let mut index = OpenOptions::new().append(true).open(self.index()).unwrap();
        writeln!(
            index,
            r#"example.org 10.0.0.1 - - [01/Jan/2020:00:00:{n:02} +0000] "GET {uri} HTTP/1.1" {status} 10 "-" "UA" tx{n} "-" {rel} 0 100 md5:0"#
        )
        .unwrap();
        path
    }

    fn output_rows(&self) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(self.output()).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }
}

#[test]
fn test_index_line_response_code_wins() {
    let dir = TempDir::new().unwrap();
    let txdir = dir.path().join("audit");
    fs::create_dir(&txdir).unwrap();
    let index = dir.path().join("modsec_audit.log");
    fs::write(
        &index,
        "- 10.0.0.1 - - [01/Jan/2020:00:00:00 +0000] \"GET /x HTTP/1.1\" 200 123 \"-\" \"UA\" abc \"sid\" 20200101-000000-AAAAAAAAAAAAAAAAAAAAAAAA 0 50 chk\n",
    )
    .unwrap();
    fs::write(
        txdir.join("20200101-000000-AAAAAAAAAAAAAAAAAAAAAAAA"),
        "--a1-A--\n[01/Jan/2020:00:00:00 +0000] abc 10.0.0.1 5555 10.0.0.2 80\n\n--a1-B--\nGET /x HTTP/1.1\nHost: h\n\n--a1-F--\nHTTP/1.1 404 Not Found\n\n--a1-Z--\n",
    )
    .unwrap();

    let mut tailer = create_tailer(
        &index,
        &txdir,
        ResumeStore::new(dir.path().join("state")),
        true,
        TailerOptions::default(),
    )
    .unwrap();

    let tx = tailer.process_next().unwrap().unwrap();
    assert_eq!(tx.response_code(), Some(200));
    assert_eq!(tx.transaction_id(), Some("abc"));
    assert_eq!(tx.source_port(), Some(5555));
    assert_eq!(tx.destination_ip(), Some("10.0.0.2"));
    assert!(tailer.process_next().unwrap().is_none());
    assert_eq!(tailer.processed_tx_files().len(), 1);
}

#[test]
fn test_ingest_writes_csv_and_cleans_up() {
    let fixture = AuditLogFixture::new();
    let first = fixture.add_transaction(1, "/a", 200);
    let second = fixture.add_transaction(2, "/b?c=d", 403);

    let summary = ingest::run(&fixture.config(), false).unwrap();

    assert_eq!(summary.written, 2);
    assert_eq!(summary.tailer.transactions, 2);
    assert_eq!(summary.tailer.removed_files, 2);
    assert!(!first.exists());
    assert!(!second.exists());

    let rows = fixture.output_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[0][0], "tx1");
    assert_eq!(&rows[0][2], "example.org");
    assert_eq!(&rows[1][4], "/b?c=d");
    assert_eq!(&rows[1][5], "403");
}

#[test]
fn test_second_run_resumes_after_checkpoint() {
    let fixture = AuditLogFixture::new();
    fixture.add_transaction(1, "/a", 200);
    ingest::run(&fixture.config(), false).unwrap();

    fixture.add_transaction(2, "/b", 200);
    let summary = ingest::run(&fixture.config(), false).unwrap();

    assert_eq!(summary.tailer.lines_read, 1);
    assert_eq!(summary.written, 1);
    let rows = fixture.output_rows();
    assert_eq!(rows.len(), 2);
    assert_eq!(&rows[1][0], "tx2");
}

#[test]
fn test_rerun_without_resume_reads_everything_again() {
    let fixture = AuditLogFixture::new();
    let config = Config {
        keep_tx: true,
        ..fixture.config()
    };
    fixture.add_transaction(1, "/a", 200);
    ingest::run(&config, false).unwrap();

    let config = Config {
        resume: false,
        ..config
    };
    let summary = ingest::run(&config, false).unwrap();
    assert_eq!(summary.written, 1);
    assert_eq!(fixture.output_rows().len(), 2);
}

#[test]
fn test_dry_run_leaves_everything_in_place() {
    let fixture = AuditLogFixture::new();
    let tx_file = fixture.add_transaction(1, "/a", 200);
    let config = Config {
        dry_run: true,
        ..fixture.config()
    };

    let summary = ingest::run(&config, false).unwrap();

    assert!(summary.dry_run);
    assert_eq!(summary.written, 1);
    assert!(tx_file.exists());
    assert!(!fixture.output().exists());
    assert!(!fixture.dir.path().join("state").exists());

    // Nothing was checkpointed, so a real run sees the same transaction.
    let summary = ingest::run(&fixture.config(), false).unwrap();
    assert_eq!(summary.written, 1);
    assert!(!tx_file.exists());
}

#[test]
fn test_keep_tx_commits_but_keeps_detail_files() {
    let fixture = AuditLogFixture::new();
    let tx_file = fixture.add_transaction(1, "/a", 200);
    let config = Config {
        keep_tx: true,
        ..fixture.config()
    };

    let summary = ingest::run(&config, false).unwrap();

    assert!(tx_file.exists());
    assert!(summary.prune.is_none());
    assert_eq!(fixture.output_rows().len(), 1);

    // The offset still advanced.
    let summary = ingest::run(&config, false).unwrap();
    assert_eq!(summary.written, 0);
}

#[test]
fn test_missing_and_broken_records_are_skipped() {
    let fixture = AuditLogFixture::new();
    let good = fixture.add_transaction(1, "/good", 200);
    let missing = fixture.add_transaction(2, "/missing", 200);
    fs::remove_file(&missing).unwrap();
    let broken = fixture.add_transaction(3, "/broken", 200);
    fs::write(&broken, "--c0ffee3-A--\ntruncated").unwrap();
    let mut index = OpenOptions::new()
        .append(true)
        .open(fixture.index())
        .unwrap();
    writeln!(index, "this is not an index line").unwrap();

    let summary = ingest::run(&fixture.config(), false).unwrap();

    assert_eq!(summary.written, 1);
    assert_eq!(summary.tailer.lines_read, 4);
    assert_eq!(summary.tailer.missing_files, 1);
    assert_eq!(summary.tailer.malformed_files, 1);
    assert_eq!(summary.tailer.unparsable_lines, 1);
    assert!(!good.exists());
    // Left for prune once it is old enough.
    assert!(broken.exists());
}

#[test]
fn test_strict_mode_aborts_on_broken_record() {
    let fixture = AuditLogFixture::new();
    let broken = fixture.add_transaction(1, "/broken", 200);
    fs::write(&broken, "--c0ffee1-A--\ntruncated").unwrap();
    let config = Config {
        strict_tx: true,
        ..fixture.config()
    };

    assert!(ingest::run(&config, false).is_err());
    assert!(!fixture.output().exists());
}

#[test]
fn test_jsonl_output_with_uri_rewrite() {
    let fixture = AuditLogFixture::new();
    fixture.add_transaction(1, "/session/5f2a9c/profile", 200);
    let output = fixture.dir.path().join("requests.jsonl");
    let config = Config {
        output: output.clone(),
        output_format: OutputFormat::Jsonl,
        uri_rewrite: vec![(
            "^/session/[0-9a-f]+".to_string(),
            "/session/:id".to_string(),
        )],
        ..fixture.config()
    };

    let summary = ingest::run(&config, false).unwrap();
    assert_eq!(summary.written, 1);
    assert_eq!(summary.rejected, 0);

    let content = fs::read_to_string(&output).unwrap();
    let row: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
    assert_eq!(row["request_uri"], "/session/:id/profile");
    assert_eq!(row["response_code"], 200);
    let ts = chrono::DateTime::parse_from_rfc3339(row["timestamp"].as_str().unwrap()).unwrap();
    assert_eq!(ts.timestamp(), 1_577_836_801);
    assert_eq!(ts.offset().local_minus_utc(), 0);
}

#[test]
fn test_config_file_round_trip() {
    let fixture = AuditLogFixture::new();
    fixture.add_transaction(1, "/a", 200);
    let config_path = fixture.dir.path().join("modsecparser.toml");
    fs::write(
        &config_path,
        format!(
            "concurrent_auditlog = {:?}\nconcurrent_auditlogdir = {:?}\nstate_dir = {:?}\noutput = {:?}\nbatch_size = 1\n",
            fixture.index(),
            fixture.txdir(),
            fixture.dir.path().join("state"),
            fixture.output()
        ),
    )
    .unwrap();

    let config = Config::load(&config_path).unwrap();
    config.validate().unwrap();
    let summary = ingest::run(&config, false).unwrap();
    assert_eq!(summary.written, 1);
    assert_eq!(summary.checkpoints, 2);
    assert!(Path::new(&config.output).exists());
}
