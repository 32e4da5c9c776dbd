//! Employee directory: the set of names usable as operator, mixer or tester.
//!
//! The roster is owned by an external collaborator (`employees.csv`). It is
//! read, never written. A missing or malformed roster puts the directory in
//! degraded mode: the fixed fallback list is served and a
//! [`DirectoryUnavailable`] warning is returned alongside it.

use crate::core::error::DirectoryUnavailable;
use crate::core::schemas;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Employee {
    pub full_name: String,
    pub username: Option<String>,
    pub active: bool,
}

/// Directory keyed by trimmed, case-preserved name. Iterates in sorted order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmployeeDirectory {
    by_name: BTreeMap<String, Employee>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectorySource {
    Roster,
    Fallback,
}

#[derive(Debug, Clone)]
pub struct DirectoryLoad {
    pub directory: EmployeeDirectory,
    pub source: DirectorySource,
    pub warning: Option<DirectoryUnavailable>,
}

impl EmployeeDirectory {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dir = Self::default();
        for name in names {
            dir.insert(Employee {
                full_name: name.as_ref().to_string(),
                username: None,
                active: true,
            });
        }
        dir
    }

    /// Trims the name; empty names are ignored and the first entry for a name wins.
    fn insert(&mut self, mut employee: Employee) {
        let name = employee.full_name.trim().to_string();
        if name.is_empty() {
            return;
        }
        employee.full_name = name.clone();
        self.by_name.entry(name).or_insert(employee);
    }

    pub fn names(&self) -> Vec<String> {
        self.by_name.keys().cloned().collect()
    }

    pub fn employees(&self) -> impl Iterator<Item = &Employee> {
        self.by_name.values()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name.trim())
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Whether `name` may appear in a record. An empty directory admits any
    /// non-empty name so that roster trouble never blocks logging.
    pub fn admits(&self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        self.is_empty() || self.contains(name)
    }
}

/// Load the directory from `roster_path`, falling back to `fallback` on any failure.
pub fn load(roster_path: &Path, fallback: &[String]) -> DirectoryLoad {
    match read_roster(roster_path) {
        Ok(directory) => {
            tracing::debug!(
                path = %roster_path.display(),
                employees = directory.len(),
                "loaded employee roster"
            );
            DirectoryLoad {
                directory,
                source: DirectorySource::Roster,
                warning: None,
            }
        }
        Err(reason) => {
            let warning = DirectoryUnavailable {
                path: roster_path.to_path_buf(),
                reason,
            };
            tracing::warn!(%warning, "serving fallback employee list");
            DirectoryLoad {
                directory: EmployeeDirectory::from_names(fallback),
                source: DirectorySource::Fallback,
                warning: Some(warning),
            }
        }
    }
}

fn read_roster(path: &Path) -> Result<EmployeeDirectory, String> {
    if !path.exists() {
        return Err("roster file not found".to_string());
    }
    let file = File::open(path).map_err(|e| e.to_string())?;
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers = rdr.headers().map_err(|e| e.to_string())?.clone();
    let column = |name: &str| headers.iter().position(|h| h == name);
    let name_idx = column(schemas::ROSTER_NAME_COLUMN)
        .ok_or_else(|| format!("missing '{}' column", schemas::ROSTER_NAME_COLUMN))?;
    let username_idx = column(schemas::ROSTER_USERNAME_COLUMN);
    let active_idx = column(schemas::ROSTER_ACTIVE_COLUMN);

    let mut dir = EmployeeDirectory::default();
    for (i, row) in rdr.records().enumerate() {
        // +2: one for the header, one for 1-based numbering
        let row = row.map_err(|e| format!("row {}: {}", i + 2, e))?;
        if !is_active(active_idx.and_then(|idx| row.get(idx))) {
            continue;
        }
        let Some(name) = row.get(name_idx) else {
            continue;
        };
        let username = username_idx
            .and_then(|idx| row.get(idx))
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        dir.insert(Employee {
            full_name: name.to_string(),
            username,
            active: true,
        });
    }
    Ok(dir)
}

/// An absent or blank flag counts as active.
fn is_active(flag: Option<&str>) -> bool {
    match flag.map(str::trim) {
        None | Some("") => true,
        Some(v) => schemas::TRUTHY_VALUES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(v)),
    }
}

pub fn schema() -> serde_json::Value {
    serde_json::json!({
        "name": "employees",
        "version": "0.1.0",
        "description": "Read-only employee directory with fallback roster",
        "commands": [
            { "name": "employees", "description": "List the names usable as operator, mixer or tester" }
        ],
        "storage": [schemas::DEFAULT_ROSTER_NAME]
    })
}
