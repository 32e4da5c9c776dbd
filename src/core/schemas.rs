//! Centralized file and column schema definitions.
//!
//! The batch freezing log is a single CSV file whose column order is fixed.
//! Readers refuse a store whose header deviates from `LOG_COLUMNS`.

// --- Project layout ---
pub const PROJECT_DIR_NAME: &str = ".haccp";
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_LOG_NAME: &str = "batch_freezing_log.csv";
pub const DEFAULT_AUDIT_NAME: &str = "broker.events.jsonl";
pub const DEFAULT_ROSTER_NAME: &str = "employees.csv";
pub const LOCK_SUFFIX: &str = ".lock";

// --- Batch freezing log ---
pub const LOG_COLUMNS: [&str; 10] = [
    "timestamp",
    "batch_date",
    "batch_id",
    "freezer_operator",
    "mixer_name",
    "second_tester_name",
    "mix_expiration_date",
    "mixer_taste_tested",
    "second_tester_taste_tested",
    "notes",
];

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub const TASTE_YES: &str = "Yes";
pub const TASTE_NO: &str = "No";

// --- Employee roster ---
pub const ROSTER_NAME_COLUMN: &str = "full_name";
pub const ROSTER_USERNAME_COLUMN: &str = "username";
pub const ROSTER_ACTIVE_COLUMN: &str = "is_active";

/// Values of `is_active` that keep a roster row, compared case-insensitively.
pub const TRUTHY_VALUES: [&str; 5] = ["1", "true", "yes", "y", "t"];

pub const FALLBACK_EMPLOYEES: [&str; 5] = [
    "Alice Martinez",
    "Ben Kim",
    "Carla Rossi",
    "Diego Alvarez",
    "Eva Chen",
];

pub fn log_header_line() -> String {
    LOG_COLUMNS.join(",")
}
