//! Submission pipeline: directory → validator → log.
//!
//! Validation and directory loading run before the log's exclusion region is
//! entered; only the storage write is serialized.

use crate::core::error::{DirectoryUnavailable, HaccpError};
use crate::core::store::Store;
use crate::plugins::employees;
use crate::plugins::freezing_log::{AppendOnlyLog, BatchFreezingRecord};
use crate::plugins::validator::{self, Advisory, Candidate, Rejection, Verdict};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Persisted {
        record: BatchFreezingRecord,
        advisories: Vec<Advisory>,
        #[serde(skip_serializing_if = "Option::is_none")]
        directory_warning: Option<String>,
    },
    Rejected {
        reasons: Vec<Rejection>,
        advisories: Vec<Advisory>,
        #[serde(skip_serializing_if = "Option::is_none")]
        directory_warning: Option<String>,
    },
}

impl SubmitOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, SubmitOutcome::Persisted { .. })
    }
}

/// Validate `candidate` against the store's directory and append it when admitted.
///
/// A rejection is an `Ok` outcome: nothing was written. An `Err` means the
/// record was admitted but storage failed; it is not persisted.
pub fn submit(store: &Store, candidate: &Candidate) -> Result<SubmitOutcome, HaccpError> {
    let load = employees::load(&store.roster_path(), &store.config.fallback_employees);
    let log = AppendOnlyLog::for_store(store);
    submit_to(&log, &load.directory, load.warning.as_ref(), candidate)
}

pub fn submit_to(
    log: &AppendOnlyLog,
    directory: &employees::EmployeeDirectory,
    directory_warning: Option<&DirectoryUnavailable>,
    candidate: &Candidate,
) -> Result<SubmitOutcome, HaccpError> {
    let directory_warning = directory_warning.map(|w| w.to_string());
    match validator::validate(candidate, directory) {
        Verdict::Rejected { reasons, advisories } => {
            tracing::info!(
                batch_id = %candidate.batch_id,
                reasons = reasons.len(),
                "batch freezing submission rejected"
            );
            Ok(SubmitOutcome::Rejected {
                reasons,
                advisories,
                directory_warning,
            })
        }
        Verdict::Admitted { record, advisories } => {
            let persisted = log.append(&record)?;
            Ok(SubmitOutcome::Persisted {
                record: persisted,
                advisories,
                directory_warning,
            })
        }
    }
}
