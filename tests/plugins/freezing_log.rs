use chrono::{NaiveDate, NaiveDateTime};
use haccp_trace::core::broker;
use haccp_trace::core::error::HaccpError;
use haccp_trace::core::schemas;
use haccp_trace::core::time;
use haccp_trace::plugins::employees::EmployeeDirectory;
use haccp_trace::plugins::freezing_log::{self, AppendOnlyLog, LogOptions};
use haccp_trace::plugins::intake::{self, SubmitOutcome};
use haccp_trace::plugins::query::QueryView;
use haccp_trace::plugins::validator::{self, Advisory, Candidate, ValidatedRecord, Verdict};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::tempdir;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    date(2025, 3, 14).and_hms_opt(h, m, s).unwrap()
}

fn roster() -> EmployeeDirectory {
    EmployeeDirectory::from_names(["Alice Martinez", "Ben Kim"])
}

fn candidate(batch_id: &str) -> Candidate {
    Candidate {
        batch_date: date(2025, 3, 14),
        batch_id: batch_id.to_string(),
        freezer_operator: "Alice Martinez".to_string(),
        mixer_name: "Ben Kim".to_string(),
        second_tester_name: "Alice Martinez".to_string(),
        mix_expiration_date: date(2025, 3, 28),
        mixer_taste_tested: true,
        second_tester_taste_tested: true,
        notes: String::new(),
    }
}

fn admitted(batch_id: &str) -> ValidatedRecord {
    match validator::validate(&candidate(batch_id), &roster()) {
        Verdict::Admitted { record, .. } => record,
        other => panic!("expected admission, got {other:?}"),
    }
}

fn open_log(dir: &Path) -> AppendOnlyLog {
    AppendOnlyLog::open(
        &dir.join("data").join(schemas::DEFAULT_LOG_NAME),
        LogOptions {
            lock_timeout: Duration::from_secs(10),
            audit_path: Some(dir.join("data").join(schemas::DEFAULT_AUDIT_NAME)),
        },
    )
}

#[test]
fn fresh_log_reads_empty() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    assert!(log.read_all().unwrap().is_empty());
    assert!(log.is_empty().unwrap());
    assert!(!log.path().exists());
}

#[test]
fn initialize_writes_header_once() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    assert!(log.initialize().unwrap());
    assert!(!log.initialize().unwrap());

    let text = fs::read_to_string(log.path()).unwrap();
    assert_eq!(text, format!("{}\n", schemas::log_header_line()));
    assert_eq!(log.len().unwrap(), 0);
}

#[test]
fn appended_record_is_last_with_timestamp() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    log.append(&admitted("B-1")).unwrap();
    let persisted = log.append(&admitted("B-2")).unwrap();

    let all = log.read_all().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all.last().unwrap(), &persisted);
    assert_eq!(persisted.batch_id, "B-2");
    assert_eq!(persisted.freezer_operator, "Alice Martinez");
    assert!(all[0].recorded_at <= all[1].recorded_at);
}

#[test]
fn n_appends_yield_n_records_in_order() {
    for n in [1usize, 5, 100] {
        let tmp = tempdir().unwrap();
        let log = open_log(tmp.path());
        for i in 0..n {
            log.append(&admitted(&format!("B-{i}"))).unwrap();
        }

        let all = log.read_all().unwrap();
        assert_eq!(all.len(), n);
        let ids: Vec<String> = all.iter().map(|r| r.batch_id.clone()).collect();
        let expected: Vec<String> = (0..n).map(|i| format!("B-{i}")).collect();
        assert_eq!(ids, expected);
        assert!(all.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));
    }
}

#[test]
fn reads_are_idempotent() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    log.append(&admitted("B-1")).unwrap();

    let before = fs::read(log.path()).unwrap();
    let first = log.read_all().unwrap();
    let second = log.read_all().unwrap();
    assert_eq!(first, second);
    assert_eq!(before, fs::read(log.path()).unwrap());
}

#[test]
fn earlier_clock_is_clamped_to_last_timestamp() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    let first = log.append_at(&admitted("B-1"), at(9, 0, 0)).unwrap();
    let second = log.append_at(&admitted("B-2"), at(8, 59, 0)).unwrap();
    let third = log.append_at(&admitted("B-3"), at(9, 5, 0)).unwrap();

    assert_eq!(first.recorded_at, at(9, 0, 0));
    assert_eq!(second.recorded_at, at(9, 0, 0));
    assert_eq!(third.recorded_at, at(9, 5, 0));
    assert!(log.verify().unwrap().is_clean());
}

fn seed_store(log: &AppendOnlyLog, stamps: &[&str]) {
    fs::create_dir_all(log.path().parent().unwrap()).unwrap();
    let mut text = format!("{}\n", schemas::log_header_line());
    for (i, stamp) in stamps.iter().enumerate() {
        text.push_str(&format!(
            "{stamp},2025-03-14,OLD-{i},Alice Martinez,Ben Kim,Alice Martinez,2025-03-28,Yes,Yes,\n"
        ));
    }
    fs::write(log.path(), text).unwrap();
}

#[test]
fn clamp_uses_latest_timestamp_not_last_row() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    seed_store(&log, &["2025-03-14T10:00:00", "2025-03-14T09:00:00"]);

    let appended = log.append_at(&admitted("B-1"), at(9, 30, 0)).unwrap();
    let prior_max = log.read_all().unwrap()[..2]
        .iter()
        .map(|r| r.recorded_at)
        .max()
        .unwrap();
    assert!(appended.recorded_at >= prior_max);
    assert_eq!(appended.recorded_at, at(10, 0, 0));

    // Only the seeded out-of-order row is reported, not the appended one.
    let report = log.verify().unwrap();
    let lines: Vec<u64> = report.issues.iter().map(|i| i.line).collect();
    assert_eq!(lines, vec![3]);
}

#[test]
fn fractional_previous_timestamp_is_rounded_up() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    seed_store(&log, &["2025-03-14T10:00:00.750"]);

    let returned = log.append_at(&admitted("B-1"), at(9, 0, 0)).unwrap();
    let reread = log.read_all().unwrap().pop().unwrap();
    assert_eq!(returned, reread);
    assert_eq!(returned.recorded_at, at(10, 0, 1));
    assert!(log.verify().unwrap().is_clean());
}

#[test]
fn concurrent_appends_from_threads_are_all_kept() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("data").join(schemas::DEFAULT_LOG_NAME);
    let threads = 8;
    let per_thread = 10;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let barrier = Arc::clone(&barrier);
            let path = path.clone();
            thread::spawn(move || {
                let log = AppendOnlyLog::open(
                    &path,
                    LogOptions {
                        lock_timeout: Duration::from_secs(30),
                        audit_path: None,
                    },
                );
                barrier.wait();
                for i in 0..per_thread {
                    log.append(&admitted(&format!("T{t}-{i}"))).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let log = AppendOnlyLog::open(&path, LogOptions::default());
    let all = log.read_all().unwrap();
    assert_eq!(all.len(), threads * per_thread);
    let ids: BTreeSet<String> = all.iter().map(|r| r.batch_id.clone()).collect();
    assert_eq!(ids.len(), threads * per_thread);
    assert!(all.windows(2).all(|w| w[0].recorded_at <= w[1].recorded_at));

    // Per-thread order survives interleaving.
    for t in 0..threads {
        let prefix = format!("T{t}-");
        let seq: Vec<usize> = all
            .iter()
            .filter_map(|r| r.batch_id.strip_prefix(&prefix))
            .map(|s| s.parse().unwrap())
            .collect();
        assert_eq!(seq, (0..per_thread).collect::<Vec<_>>());
    }
    assert!(log.verify().unwrap().is_clean());
}

#[test]
fn export_round_trips_through_parser() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    let mut with_notes = candidate("B-2");
    with_notes.notes = "pistachio, \"double\" churn\nsecond line".to_string();
    let record = match validator::validate(&with_notes, &roster()) {
        Verdict::Admitted { record, .. } => record,
        other => panic!("unexpected {other:?}"),
    };
    log.append(&admitted("B-1")).unwrap();
    log.append(&record).unwrap();

    let exported = log.export().unwrap();
    let header = format!("{}\n", schemas::log_header_line());
    assert!(exported.starts_with(header.as_bytes()));
    let parsed = freezing_log::parse_log(&exported).unwrap();
    assert_eq!(parsed, log.read_all().unwrap());
    assert_eq!(parsed[1].notes, "pistachio, \"double\" churn\nsecond line");
    assert_eq!(exported, fs::read(log.path()).unwrap());
}

#[test]
fn export_of_empty_log_is_header_only() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    let exported = String::from_utf8(log.export().unwrap()).unwrap();
    assert_eq!(exported, format!("{}\n", schemas::log_header_line()));
}

#[test]
fn export_to_reports_digest_of_written_file() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    log.append(&admitted("B-1")).unwrap();

    let out = tmp.path().join("out").join("export.csv");
    let summary = log.export_to(&out).unwrap();
    let written = fs::read(&out).unwrap();
    assert_eq!(summary.records, 1);
    assert_eq!(summary.bytes, written.len());
    assert_eq!(summary.sha256, freezing_log::sha256_hex(&written));
}

#[test]
fn find_returns_every_record_for_batch() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    log.append(&admitted("B-1")).unwrap();
    log.append(&admitted("B-2")).unwrap();
    log.append(&admitted("B-1")).unwrap();

    assert_eq!(log.find("B-1").unwrap().len(), 2);
    assert_eq!(log.find(" B-2 ").unwrap().len(), 1);
    assert!(log.find("B-9").unwrap().is_empty());
}

#[test]
fn recent_is_newest_first_and_bounded() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    for i in 0..5 {
        log.append(&admitted(&format!("B-{i}"))).unwrap();
    }

    let view = QueryView::new(&log);
    let page = view.recent(3).unwrap();
    let ids: Vec<&str> = page.iter().map(|r| r.batch_id.as_str()).collect();
    assert_eq!(ids, vec!["B-4", "B-3", "B-2"]);
    assert_eq!(view.recent(50).unwrap().len(), 5);
    assert!(view.recent(0).unwrap().is_empty());
    assert_eq!(view.all().unwrap(), log.export().unwrap());
}

#[test]
fn unknown_header_blocks_append_and_leaves_store_untouched() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    fs::create_dir_all(log.path().parent().unwrap()).unwrap();
    let foreign = b"when,what\n2025-01-01,something\n".to_vec();
    fs::write(log.path(), &foreign).unwrap();

    let err = log.append(&admitted("B-1")).unwrap_err();
    assert!(matches!(err, HaccpError::SchemaMismatch { .. }));
    assert!(err.is_io_failure());
    assert_eq!(fs::read(log.path()).unwrap(), foreign);

    let leftovers: Vec<_> = fs::read_dir(log.path().parent().unwrap())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());
}

#[test]
fn held_lock_times_out_without_writing() {
    use fs2::FileExt;

    let tmp = tempdir().unwrap();
    let path = tmp.path().join(schemas::DEFAULT_LOG_NAME);
    let log = AppendOnlyLog::open(
        &path,
        LogOptions {
            lock_timeout: Duration::from_millis(100),
            audit_path: Some(tmp.path().join(schemas::DEFAULT_AUDIT_NAME)),
        },
    );
    log.initialize().unwrap();
    let before = fs::read(&path).unwrap();

    let lock_path = tmp
        .path()
        .join(format!("{}{}", schemas::DEFAULT_LOG_NAME, schemas::LOCK_SUFFIX));
    let holder = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(&lock_path)
        .unwrap();
    FileExt::lock_exclusive(&holder).unwrap();

    let err = log.append(&admitted("B-1")).unwrap_err();
    assert!(matches!(err, HaccpError::LockTimeout { .. }), "{err:?}");
    assert_eq!(fs::read(&path).unwrap(), before);

    FileExt::unlock(&holder).unwrap();
    log.append(&admitted("B-1")).unwrap();
    assert_eq!(log.len().unwrap(), 1);

    let events = broker::read_audit_events(&tmp.path().join(schemas::DEFAULT_AUDIT_NAME)).unwrap();
    let appends: Vec<(&str, &str)> = events
        .iter()
        .filter(|e| e.op == "log.append")
        .map(|e| (e.target.as_str(), e.status.as_str()))
        .collect();
    assert_eq!(appends, vec![("B-1", "error"), ("B-1", "success")]);
}

#[test]
fn verify_reports_rows_an_append_would_never_write() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    fs::create_dir_all(log.path().parent().unwrap()).unwrap();
    let text = format!(
        "{}\n\
         2025-03-14T09:00:00,2025-03-14,B-1,Alice Martinez,Ben Kim,Alice Martinez,2025-03-28,Yes,Yes,\n\
         2025-03-14T08:00:00,2025-03-14,B-2,Alice Martinez,Ben Kim,Alice Martinez,2025-03-28,Yes,Yes,\n\
         2025-03-14T10:00:00,2025-03-14,B-3,Alice Martinez,Ben Kim,Alice Martinez,2025-03-01,Yes,Yes,\n\
         2025-03-14T11:00:00,2025-03-14,,Alice Martinez,Ben Kim,Alice Martinez,2025-03-28,Yes,Yes,\n",
        schemas::log_header_line()
    );
    fs::write(log.path(), text).unwrap();

    let report = log.verify().unwrap();
    assert_eq!(report.records, 4);
    let lines: Vec<u64> = report.issues.iter().map(|i| i.line).collect();
    assert_eq!(lines, vec![3, 4, 5]);
    assert!(report.issues[0].message.contains("earlier than previous"));
    assert!(report.issues[1].message.contains("precedes batch date"));
    assert_eq!(report.issues[2].message, "missing batch id");
}

#[test]
fn mutations_are_audited() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    log.append(&admitted("B-1")).unwrap();
    log.append(&admitted("B-2")).unwrap();
    log.read_all().unwrap();

    let events =
        broker::read_audit_events(&tmp.path().join("data").join(schemas::DEFAULT_AUDIT_NAME))
            .unwrap();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.op == "log.append" && e.status == "success"));
    assert_eq!(events[0].target, "B-1");
    assert_eq!(events[1].actor, "Alice Martinez");
}

#[test]
fn rejected_submission_leaves_log_unchanged() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    intake::submit_to(&log, &roster(), None, &candidate("B-1")).unwrap();
    let before = fs::read(log.path()).unwrap();

    let mut bad = candidate("   ");
    bad.mixer_name = "Zed Unknown".to_string();
    bad.mix_expiration_date = date(2025, 3, 1);
    let outcome = intake::submit_to(&log, &roster(), None, &bad).unwrap();
    match outcome {
        SubmitOutcome::Rejected { reasons, .. } => {
            let text: Vec<String> = reasons.iter().map(|r| r.to_string()).collect();
            assert_eq!(
                text,
                vec![
                    "missing batch id",
                    "expiration precedes batch date",
                    "unknown mixer: Zed Unknown",
                ]
            );
        }
        other => panic!("expected rejection, got {other:?}"),
    }
    assert_eq!(log.len().unwrap(), 1);
    assert_eq!(fs::read(log.path()).unwrap(), before);
}

#[test]
fn expiration_correction_scenario() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    let mut form = Candidate {
        batch_date: date(2025, 1, 10),
        batch_id: "B-1".to_string(),
        freezer_operator: "Alice Martinez".to_string(),
        mixer_name: "Ben Kim".to_string(),
        second_tester_name: "Alice Martinez".to_string(),
        mix_expiration_date: date(2025, 1, 9),
        mixer_taste_tested: true,
        second_tester_taste_tested: true,
        notes: String::new(),
    };

    let first = validator::validate(&form, &roster());
    assert_eq!(first.reasons(), vec!["expiration precedes batch date"]);
    assert!(log.is_empty().unwrap());

    form.mix_expiration_date = date(2025, 1, 20);
    let record = match validator::validate(&form, &roster()) {
        Verdict::Admitted { record, .. } => record,
        other => panic!("expected admission, got {other:?}"),
    };
    log.append(&record).unwrap();

    let all = log.read_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].batch_id, "B-1");
}

#[test]
fn operator_as_second_tester_is_advised_not_blocked() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());

    let outcome = intake::submit_to(&log, &roster(), None, &candidate("B-100")).unwrap();
    match &outcome {
        SubmitOutcome::Persisted { advisories, record, .. } => {
            assert!(advisories.is_empty());
            assert_eq!(record.batch_id, "B-100");
        }
        other => panic!("expected persistence, got {other:?}"),
    }

    let mut untasted = candidate("B-101");
    untasted.mixer_taste_tested = false;
    let outcome = intake::submit_to(&log, &roster(), None, &untasted).unwrap();
    match outcome {
        SubmitOutcome::Persisted { advisories, record, .. } => {
            assert_eq!(advisories, vec![Advisory::OperatorConfirmsUntastedMix]);
            assert!(!record.mixer_taste_tested);
        }
        other => panic!("expected persistence, got {other:?}"),
    }

    let stored = log.read_all().unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].second_tester_name, "Alice Martinez");
    let text = String::from_utf8(fs::read(log.path()).unwrap()).unwrap();
    assert!(text.lines().last().unwrap().contains(",No,Yes,"));
}

#[test]
fn persisted_timestamp_uses_second_precision() {
    let tmp = tempdir().unwrap();
    let log = open_log(tmp.path());
    let rec = log.append(&admitted("B-1")).unwrap();
    let stamp = time::format_timestamp(&rec.recorded_at);
    assert_eq!(stamp.len(), "2025-03-14T09:00:00".len());
    assert_eq!(time::parse_timestamp(&stamp).unwrap(), rec.recorded_at);
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn log_grows_by_exactly_the_admitted_submissions(
            forms in prop::collection::vec((any::<bool>(), any::<bool>(), 0i64..3), 1..12)
        ) {
            let tmp = tempdir().unwrap();
            let log = open_log(tmp.path());
            let mut admitted_ids = Vec::new();

            for (i, (has_id, known_mixer, exp_offset)) in forms.into_iter().enumerate() {
                let mut form = candidate(&if has_id { format!("B-{i}") } else { String::new() });
                if !known_mixer {
                    form.mixer_name = "Zed Unknown".to_string();
                }
                form.mix_expiration_date = form.batch_date + chrono::Duration::days(exp_offset - 1);

                let before = log.len().unwrap();
                let outcome = intake::submit_to(&log, &roster(), None, &form).unwrap();
                if outcome.is_persisted() {
                    admitted_ids.push(form.batch_id.clone());
                    prop_assert_eq!(log.len().unwrap(), before + 1);
                } else {
                    prop_assert_eq!(log.len().unwrap(), before);
                }
            }

            let stored: Vec<String> = log.read_all().unwrap().into_iter().map(|r| r.batch_id).collect();
            prop_assert_eq!(stored, admitted_ids);
        }
    }
}
