//! Core modules: storage layout, exclusion region, errors and shared helpers.

pub mod broker;
pub mod error;
pub mod output;
pub mod schemas;
pub mod store;
pub mod time;
