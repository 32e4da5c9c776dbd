//! Traceability subsystems built on top of `core`.

pub mod employees;
pub mod freezing_log;
pub mod intake;
pub mod query;
pub mod validator;
