use crate::core::error::HaccpError;
use crate::core::schemas;
use crate::core::time;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// In-process half of the exclusion region. The file lock covers other processes.
static LOG_LOCK: RwLock<()> = RwLock::new(());

const POLL_INTERVAL_MS: u64 = 10;

/// The Log Broker is the "Thin Waist" for log access.
///
/// Every read of the log runs under a shared region and every mutation under
/// an exclusive one. Mutations are recorded in a JSONL audit trail.
pub struct LogBroker {
    lock_path: PathBuf,
    audit_log_path: Option<PathBuf>,
    timeout: Duration,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BrokerEvent {
    pub ts: String,
    pub event_id: String,
    pub actor: String,
    pub op: String,
    pub target: String,
    pub status: String,
}

enum Region {
    Shared,
    Exclusive,
}

enum MemGuard {
    Read(#[allow(dead_code)] RwLockReadGuard<'static, ()>),
    Write(#[allow(dead_code)] RwLockWriteGuard<'static, ()>),
}

/// Held for the duration of a log operation. Dropping it releases both locks.
pub struct RegionGuard {
    file: File,
    _mem: MemGuard,
}

impl Drop for RegionGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl LogBroker {
    pub fn new(log_path: &Path, timeout: Duration) -> Self {
        let mut lock_name = log_path
            .file_name()
            .unwrap_or_default()
            .to_os_string();
        lock_name.push(schemas::LOCK_SUFFIX);
        Self {
            lock_path: log_path.with_file_name(lock_name),
            audit_log_path: None,
            timeout,
        }
    }

    /// Record every mutation in `audit_path` (JSON lines).
    pub fn with_audit_log(mut self, audit_path: &Path) -> Self {
        self.audit_log_path = Some(audit_path.to_path_buf());
        self
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Run `f` with shared access to the log. Readers never overlap a writer.
    pub fn with_read<F, R>(&self, f: F) -> Result<R, HaccpError>
    where
        F: FnOnce() -> Result<R, HaccpError>,
    {
        let _guard = self.acquire(Region::Shared)?;
        f()
    }

    /// Run `f` inside the single-writer region and audit the outcome.
    pub fn with_write<F, R>(&self, actor: &str, op_name: &str, target: &str, f: F) -> Result<R, HaccpError>
    where
        F: FnOnce() -> Result<R, HaccpError>,
    {
        // A lock timeout is an attempt too and gets its own `error` event.
        let result = self
            .acquire(Region::Exclusive)
            .and_then(|_guard| f());

        let status = if result.is_ok() { "success" } else { "error" };
        if let Err(e) = self.log_event(actor, op_name, target, status) {
            // Best-effort: never changes the outcome of the mutation.
            tracing::warn!(op = op_name, error = %e, "failed to append broker audit event");
        }

        result
    }

    fn acquire(&self, region: Region) -> Result<RegionGuard, HaccpError> {
        let started = Instant::now();
        let deadline = started + self.timeout;

        let mem = loop {
            let attempt = match region {
                Region::Shared => match LOG_LOCK.try_read() {
                    Ok(g) => Some(MemGuard::Read(g)),
                    Err(TryLockError::Poisoned(p)) => Some(MemGuard::Read(p.into_inner())),
                    Err(TryLockError::WouldBlock) => None,
                },
                Region::Exclusive => match LOG_LOCK.try_write() {
                    Ok(g) => Some(MemGuard::Write(g)),
                    Err(TryLockError::Poisoned(p)) => Some(MemGuard::Write(p.into_inner())),
                    Err(TryLockError::WouldBlock) => None,
                },
            };
            if let Some(g) = attempt {
                break g;
            }
            self.wait_or_timeout(started, deadline)?;
        };

        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent).map_err(HaccpError::IoError)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(HaccpError::IoError)?;

        loop {
            let res = match region {
                Region::Shared => FileExt::try_lock_shared(&file),
                Region::Exclusive => FileExt::try_lock_exclusive(&file),
            };
            match res {
                Ok(()) => break,
                Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
                    tracing::debug!(path = %self.lock_path.display(), "log lock contended, waiting");
                    self.wait_or_timeout(started, deadline)?;
                }
                Err(e) => return Err(HaccpError::IoError(e)),
            }
        }

        Ok(RegionGuard { file, _mem: mem })
    }

    fn wait_or_timeout(&self, started: Instant, deadline: Instant) -> Result<(), HaccpError> {
        if Instant::now() >= deadline {
            let waited_ms = started.elapsed().as_millis() as u64;
            tracing::warn!(path = %self.lock_path.display(), waited_ms, "gave up waiting for log lock");
            return Err(HaccpError::LockTimeout {
                path: self.lock_path.clone(),
                waited_ms,
            });
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS + jitter_ms(POLL_INTERVAL_MS)));
        Ok(())
    }

    fn log_event(&self, actor: &str, op: &str, target: &str, status: &str) -> Result<(), HaccpError> {
        let Some(path) = &self.audit_log_path else {
            return Ok(());
        };

        let ev = BrokerEvent {
            ts: time::now_iso(),
            event_id: time::new_event_id(),
            actor: actor.to_string(),
            op: op.to_string(),
            target: target.to_string(),
            status: status.to_string(),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(HaccpError::IoError)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(HaccpError::IoError)?;

        writeln!(f, "{}", serde_json::to_string(&ev)?).map_err(HaccpError::IoError)?;
        Ok(())
    }
}

/// Read the audit trail back, oldest first.
pub fn read_audit_events(audit_path: &Path) -> Result<Vec<BrokerEvent>, HaccpError> {
    if !audit_path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(audit_path).map_err(HaccpError::IoError)?;
    let mut out = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        out.push(serde_json::from_str(line)?);
    }
    Ok(out)
}

fn jitter_ms(max_exclusive: u64) -> u64 {
    if max_exclusive <= 1 {
        return 0;
    }
    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64;
    now_ms % max_exclusive
}
