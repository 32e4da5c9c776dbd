//! Compact output rendering helpers for CLI surfaces.
//!
//! Keeps command result output bounded and readable while preserving signal.

use crate::core::time;
use crate::plugins::freezing_log::BatchFreezingRecord;

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Render up to `max_items` messages with compact formatting.
pub fn preview_messages(messages: &[String], max_items: usize, max_chars: usize) -> String {
    if messages.is_empty() {
        return String::new();
    }
    let shown = messages
        .iter()
        .take(max_items)
        .map(|m| compact_line(m, max_chars))
        .collect::<Vec<_>>()
        .join(" | ");
    if messages.len() > max_items {
        format!("{} (+{} more)", shown, messages.len() - max_items)
    } else {
        shown
    }
}

fn yes_no(v: bool) -> &'static str {
    if v { "Yes" } else { "No" }
}

/// One line per record, fixed-width leading columns, notes last.
pub fn record_table(records: &[BatchFreezingRecord]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<19}  {:<10}  {:<16}  {:<18}  {:<18}  {:<18}  {:<10}  {:<5} {:<5}  {}\n",
        "timestamp", "batch_date", "batch_id", "operator", "mixer", "second_tester", "expires", "mix?", "2nd?", "notes"
    ));
    for r in records {
        out.push_str(&format!(
            "{:<19}  {:<10}  {:<16}  {:<18}  {:<18}  {:<18}  {:<10}  {:<5} {:<5}  {}\n",
            time::format_timestamp(&r.recorded_at),
            r.batch_date,
            compact_line(&r.batch_id, 16),
            compact_line(&r.freezer_operator, 18),
            compact_line(&r.mixer_name, 18),
            compact_line(&r.second_tester_name, 18),
            r.mix_expiration_date,
            yes_no(r.mixer_taste_tested),
            yes_no(r.second_tester_taste_tested),
            compact_line(&r.notes, 40),
        ));
    }
    out
}
