//! Append-only batch freezing log.
//!
//! The store is one CSV file with the fixed header in
//! [`schemas::LOG_COLUMNS`]. Records are only ever added at the end.
//!
//! Every append is a read-modify-write that runs inside the broker's
//! exclusive region: the current bytes are copied verbatim into a temp file
//! next to the store, the new row is added, the temp file is fsynced and then
//! renamed over the store. A failure at any step leaves the previous store in
//! place. Readers hold the shared region and so never see a half-written row.

use crate::core::broker::LogBroker;
use crate::core::error::HaccpError;
use crate::core::schemas;
use crate::core::store::Store;
use crate::core::time;
use crate::plugins::validator::ValidatedRecord;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One persisted batch freezing event. Field order is the column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFreezingRecord {
    #[serde(rename = "timestamp", with = "iso_seconds")]
    pub recorded_at: NaiveDateTime,
    pub batch_date: NaiveDate,
    pub batch_id: String,
    pub freezer_operator: String,
    pub mixer_name: String,
    pub second_tester_name: String,
    pub mix_expiration_date: NaiveDate,
    #[serde(with = "yes_no")]
    pub mixer_taste_tested: bool,
    #[serde(with = "yes_no")]
    pub second_tester_taste_tested: bool,
    #[serde(default)]
    pub notes: String,
}

impl BatchFreezingRecord {
    pub fn from_validated(record: &ValidatedRecord, recorded_at: NaiveDateTime) -> Self {
        Self {
            recorded_at,
            batch_date: record.batch_date(),
            batch_id: record.batch_id().to_string(),
            freezer_operator: record.freezer_operator().to_string(),
            mixer_name: record.mixer_name().to_string(),
            second_tester_name: record.second_tester_name().to_string(),
            mix_expiration_date: record.mix_expiration_date(),
            mixer_taste_tested: record.mixer_taste_tested(),
            second_tester_taste_tested: record.second_tester_taste_tested(),
            notes: record.notes().to_string(),
        }
    }
}

mod iso_seconds {
    use crate::core::time;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(d)?;
        time::parse_timestamp(&raw)
            .map_err(|e| de::Error::custom(format!("bad timestamp {:?}: {}", raw, e)))
    }
}

mod yes_no {
    use crate::core::schemas::{TASTE_NO, TASTE_YES};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(v: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(if *v { TASTE_YES } else { TASTE_NO })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        let raw = String::deserialize(d)?;
        match raw.trim() {
            v if v.eq_ignore_ascii_case(TASTE_YES) => Ok(true),
            v if v.eq_ignore_ascii_case(TASTE_NO) => Ok(false),
            other => Err(de::Error::custom(format!(
                "expected {:?} or {:?}, got {:?}",
                TASTE_YES, TASTE_NO, other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogOptions {
    pub lock_timeout: Duration,
    pub audit_path: Option<PathBuf>,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
            audit_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportSummary {
    pub path: PathBuf,
    pub records: usize,
    pub bytes: usize,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyIssue {
    pub line: u64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub path: PathBuf,
    pub records: usize,
    pub issues: Vec<VerifyIssue>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

pub struct AppendOnlyLog {
    path: PathBuf,
    broker: LogBroker,
}

impl AppendOnlyLog {
    pub fn open(path: &Path, options: LogOptions) -> Self {
        let mut broker = LogBroker::new(path, options.lock_timeout);
        if let Some(audit) = &options.audit_path {
            broker = broker.with_audit_log(audit);
        }
        Self {
            path: path.to_path_buf(),
            broker,
        }
    }

    pub fn for_store(store: &Store) -> Self {
        Self::open(
            &store.log_path(),
            LogOptions {
                lock_timeout: store.config.lock_timeout(),
                audit_path: Some(store.audit_path()),
            },
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a header-only store if none exists. Returns true when a file was written.
    pub fn initialize(&self) -> Result<bool, HaccpError> {
        self.broker.with_write("haccp-trace", "log.init", "", || {
            let existing = read_store_bytes(&self.path)?;
            if !is_blank(&existing) {
                parse_log(&existing)?;
                return Ok(false);
            }
            write_atomic(&self.path, &header_bytes()?)?;
            Ok(true)
        })
    }

    /// Persist one validated record at the end of the store.
    pub fn append(&self, record: &ValidatedRecord) -> Result<BatchFreezingRecord, HaccpError> {
        self.append_at(record, time::now_local())
    }

    /// As [`append`](Self::append), with the wall clock supplied by the caller.
    /// The stored timestamp is never earlier than the last persisted one.
    pub fn append_at(
        &self,
        record: &ValidatedRecord,
        now: NaiveDateTime,
    ) -> Result<BatchFreezingRecord, HaccpError> {
        let persisted = self.broker.with_write(
            record.freezer_operator(),
            "log.append",
            record.batch_id(),
            || {
                let existing = read_store_bytes(&self.path)?;
                let prior = parse_log(&existing)?;
                // Older or hand-edited stores may be out of order; clamp to the max.
                let latest = prior.iter().map(|r| r.recorded_at).max();
                let persisted =
                    BatchFreezingRecord::from_validated(record, time::monotonic_after(now, latest));

                let mut buf = if is_blank(&existing) {
                    header_bytes()?
                } else {
                    existing
                };
                if buf.last() != Some(&b'\n') {
                    buf.push(b'\n');
                }
                buf.extend_from_slice(&encode_rows(std::slice::from_ref(&persisted), false)?);
                write_atomic(&self.path, &buf)?;
                Ok(persisted)
            },
        )?;

        tracing::info!(
            batch_id = %persisted.batch_id,
            operator = %persisted.freezer_operator,
            recorded_at = %time::format_timestamp(&persisted.recorded_at),
            "batch freezing record persisted"
        );
        Ok(persisted)
    }

    /// Every persisted record, in insertion order.
    pub fn read_all(&self) -> Result<Vec<BatchFreezingRecord>, HaccpError> {
        let records = self.broker.with_read(|| {
            let bytes = read_store_bytes(&self.path)?;
            parse_log(&bytes)
        })?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "read batch freezing log");
        Ok(records)
    }

    pub fn len(&self) -> Result<usize, HaccpError> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, HaccpError> {
        Ok(self.len()? == 0)
    }

    /// Full log in the persisted CSV format, header included.
    pub fn export(&self) -> Result<Vec<u8>, HaccpError> {
        encode_rows(&self.read_all()?, true)
    }

    /// Write the export to `out` atomically and report its digest.
    pub fn export_to(&self, out: &Path) -> Result<ExportSummary, HaccpError> {
        let records = self.read_all()?;
        let bytes = encode_rows(&records, true)?;
        write_atomic(out, &bytes)?;
        let summary = ExportSummary {
            path: out.to_path_buf(),
            records: records.len(),
            bytes: bytes.len(),
            sha256: sha256_hex(&bytes),
        };
        tracing::info!(path = %out.display(), records = summary.records, sha256 = %summary.sha256, "exported batch freezing log");
        Ok(summary)
    }

    /// Records carrying `batch_id`. Used to confirm an uncertain write before retrying.
    pub fn find(&self, batch_id: &str) -> Result<Vec<BatchFreezingRecord>, HaccpError> {
        let wanted = batch_id.trim();
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|r| r.batch_id == wanted)
            .collect())
    }

    /// Audit pass over the raw store. Reports problems row by row, never writes.
    pub fn verify(&self) -> Result<VerifyReport, HaccpError> {
        let bytes = self.broker.with_read(|| read_store_bytes(&self.path))?;
        let mut report = VerifyReport {
            path: self.path.clone(),
            records: 0,
            issues: Vec::new(),
        };
        if is_blank(&bytes) {
            return Ok(report);
        }

        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(bytes.as_slice());
        let headers = rdr.headers()?.clone();
        if let Err(e) = check_header(&headers) {
            report.issues.push(VerifyIssue {
                line: 1,
                message: e.to_string(),
            });
            return Ok(report);
        }

        let mut last: Option<NaiveDateTime> = None;
        for row in rdr.records() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    report.issues.push(VerifyIssue {
                        line: e.position().map(|p| p.line()).unwrap_or(0),
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            let line = row.position().map(|p| p.line()).unwrap_or(0);
            report.records += 1;
            if row.len() != schemas::LOG_COLUMNS.len() {
                report.issues.push(VerifyIssue {
                    line,
                    message: format!(
                        "expected {} fields, found {}",
                        schemas::LOG_COLUMNS.len(),
                        row.len()
                    ),
                });
                continue;
            }
            let rec: BatchFreezingRecord = match row.deserialize(Some(&headers)) {
                Ok(rec) => rec,
                Err(e) => {
                    report.issues.push(VerifyIssue {
                        line,
                        message: e.to_string(),
                    });
                    continue;
                }
            };
            if rec.batch_id.trim().is_empty() {
                report.issues.push(VerifyIssue {
                    line,
                    message: "missing batch id".to_string(),
                });
            }
            if rec.mix_expiration_date < rec.batch_date {
                report.issues.push(VerifyIssue {
                    line,
                    message: format!(
                        "expiration {} precedes batch date {}",
                        rec.mix_expiration_date, rec.batch_date
                    ),
                });
            }
            if let Some(prev) = last
                && rec.recorded_at < prev
            {
                report.issues.push(VerifyIssue {
                    line,
                    message: format!(
                        "timestamp {} earlier than previous {}",
                        time::format_timestamp(&rec.recorded_at),
                        time::format_timestamp(&prev)
                    ),
                });
            }
            last = Some(match last {
                Some(prev) if prev > rec.recorded_at => prev,
                _ => rec.recorded_at,
            });
        }

        if !report.is_clean() {
            tracing::warn!(path = %self.path.display(), issues = report.issues.len(), "batch freezing log failed verification");
        }
        Ok(report)
    }
}

/// Parse a full store. Blank input is an empty log; a header-only file too.
pub fn parse_log(bytes: &[u8]) -> Result<Vec<BatchFreezingRecord>, HaccpError> {
    if is_blank(bytes) {
        return Ok(Vec::new());
    }
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);
    let headers = rdr.headers()?.clone();
    check_header(&headers)?;

    let mut out = Vec::new();
    for row in rdr.deserialize::<BatchFreezingRecord>() {
        let rec = row.map_err(|e| HaccpError::CorruptLog {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            reason: e.to_string(),
        })?;
        out.push(rec);
    }
    Ok(out)
}

fn check_header(headers: &csv::StringRecord) -> Result<(), HaccpError> {
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    if found != schemas::LOG_COLUMNS {
        return Err(HaccpError::SchemaMismatch {
            expected: schemas::LOG_COLUMNS.join(","),
            found: found.join(","),
        });
    }
    Ok(())
}

fn header_bytes() -> Result<Vec<u8>, HaccpError> {
    encode_rows(&[], true)
}

fn encode_rows(records: &[BatchFreezingRecord], with_header: bool) -> Result<Vec<u8>, HaccpError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    if with_header {
        wtr.write_record(schemas::LOG_COLUMNS)?;
    }
    for r in records {
        wtr.serialize(r)?;
    }
    wtr.into_inner()
        .map_err(|e| HaccpError::IoError(io::Error::other(e.to_string())))
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| b.is_ascii_whitespace())
}

fn read_store_bytes(path: &Path) -> Result<Vec<u8>, HaccpError> {
    match fs::read(path) {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(HaccpError::IoError(e)),
    }
}

/// Temp file in the same directory, fsync, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), HaccpError> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent).map_err(HaccpError::IoError)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| HaccpError::InvalidInput(format!("not a file path: {}", path.display())))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{}.{}.tmp", file_name, time::new_event_id()));

    let result = (|| -> io::Result<()> {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(HaccpError::IoError(e));
    }
    // Persist the rename itself; not every platform can open a directory.
    if let Ok(dir) = File::open(parent) {
        let _ = dir.sync_all();
    }
    Ok(())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "freezing_log",
        "version": "0.1.0",
        "description": "Append-only batch freezing traceability log",
        "commands": [
            { "name": "submit", "description": "Validate and append one batch freezing record" },
            { "name": "export", "description": "Download the full log as CSV" },
            { "name": "find", "parameters": ["batch_id"] },
            { "name": "verify", "description": "Audit the stored log" }
        ],
        "columns": schemas::LOG_COLUMNS,
        "storage": [schemas::DEFAULT_LOG_NAME, schemas::DEFAULT_AUDIT_NAME]
    })
}
