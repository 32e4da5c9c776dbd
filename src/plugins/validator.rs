//! Admission rules for batch freezing submissions.
//!
//! Blocking rules protect what an audit needs: a batch id to trace, an
//! expiration that does not precede production, and names from the
//! directory. The independence checks are advisories only.

use crate::plugins::employees::EmployeeDirectory;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fully populated submission as assembled by the intake form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub batch_date: NaiveDate,
    pub batch_id: String,
    pub freezer_operator: String,
    pub mixer_name: String,
    pub second_tester_name: String,
    pub mix_expiration_date: NaiveDate,
    pub mixer_taste_tested: bool,
    pub second_tester_taste_tested: bool,
    #[serde(default)]
    pub notes: String,
}

/// A candidate that passed every blocking rule. Only [`validate`] builds one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidatedRecord {
    batch_date: NaiveDate,
    batch_id: String,
    freezer_operator: String,
    mixer_name: String,
    second_tester_name: String,
    mix_expiration_date: NaiveDate,
    mixer_taste_tested: bool,
    second_tester_taste_tested: bool,
    notes: String,
}

impl ValidatedRecord {
    pub fn batch_date(&self) -> NaiveDate {
        self.batch_date
    }
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }
    pub fn freezer_operator(&self) -> &str {
        &self.freezer_operator
    }
    pub fn mixer_name(&self) -> &str {
        &self.mixer_name
    }
    pub fn second_tester_name(&self) -> &str {
        &self.second_tester_name
    }
    pub fn mix_expiration_date(&self) -> NaiveDate {
        self.mix_expiration_date
    }
    pub fn mixer_taste_tested(&self) -> bool {
        self.mixer_taste_tested
    }
    pub fn second_tester_taste_tested(&self) -> bool {
        self.second_tester_taste_tested
    }
    pub fn notes(&self) -> &str {
        &self.notes
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    FreezerOperator,
    Mixer,
    SecondTester,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::FreezerOperator => "freezer operator",
            Role::Mixer => "mixer",
            Role::SecondTester => "second tester",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rejection {
    MissingBatchId,
    ExpirationPrecedesBatchDate,
    MissingName { role: Role },
    UnknownName { role: Role, name: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::MissingBatchId => f.write_str("missing batch id"),
            Rejection::ExpirationPrecedesBatchDate => f.write_str("expiration precedes batch date"),
            Rejection::MissingName { role } => write!(f, "missing {}", role),
            Rejection::UnknownName { role, name } => write!(f, "unknown {}: {}", role, name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Advisory {
    OperatorIsMixer,
    OperatorConfirmsUntastedMix,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Advisory::OperatorIsMixer => {
                "mixer and freezer operator are the same person; consider a distinct second tester"
            }
            Advisory::OperatorConfirmsUntastedMix => {
                "operator is also the second tester and the mixer did not confirm a taste test; independent confirmation may be compromised"
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Admitted {
        record: ValidatedRecord,
        advisories: Vec<Advisory>,
    },
    Rejected {
        reasons: Vec<Rejection>,
        advisories: Vec<Advisory>,
    },
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admitted { .. })
    }

    pub fn advisories(&self) -> &[Advisory] {
        match self {
            Verdict::Admitted { advisories, .. } | Verdict::Rejected { advisories, .. } => advisories,
        }
    }

    /// Rejection reasons as display strings; empty when admitted.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            Verdict::Admitted { .. } => Vec::new(),
            Verdict::Rejected { reasons, .. } => reasons.iter().map(|r| r.to_string()).collect(),
        }
    }
}

/// Check every rule; never stops at the first violation.
pub fn validate(candidate: &Candidate, directory: &EmployeeDirectory) -> Verdict {
    let mut reasons = Vec::new();

    let batch_id = candidate.batch_id.trim();
    if batch_id.is_empty() {
        reasons.push(Rejection::MissingBatchId);
    }
    if candidate.mix_expiration_date < candidate.batch_date {
        reasons.push(Rejection::ExpirationPrecedesBatchDate);
    }

    let operator = candidate.freezer_operator.trim();
    let mixer = candidate.mixer_name.trim();
    let tester = candidate.second_tester_name.trim();
    for (role, name) in [
        (Role::FreezerOperator, operator),
        (Role::Mixer, mixer),
        (Role::SecondTester, tester),
    ] {
        if name.is_empty() {
            reasons.push(Rejection::MissingName { role });
        } else if !directory.admits(name) {
            reasons.push(Rejection::UnknownName {
                role,
                name: name.to_string(),
            });
        }
    }

    let mut advisories = Vec::new();
    if !operator.is_empty() && mixer == operator {
        advisories.push(Advisory::OperatorIsMixer);
    }
    if !operator.is_empty() && tester == operator && !candidate.mixer_taste_tested {
        advisories.push(Advisory::OperatorConfirmsUntastedMix);
    }

    if !reasons.is_empty() {
        return Verdict::Rejected { reasons, advisories };
    }

    Verdict::Admitted {
        record: ValidatedRecord {
            batch_date: candidate.batch_date,
            batch_id: batch_id.to_string(),
            freezer_operator: operator.to_string(),
            mixer_name: mixer.to_string(),
            second_tester_name: tester.to_string(),
            mix_expiration_date: candidate.mix_expiration_date,
            mixer_taste_tested: candidate.mixer_taste_tested,
            second_tester_taste_tested: candidate.second_tester_taste_tested,
            notes: candidate.notes.trim().to_string(),
        },
        advisories,
    }
}
