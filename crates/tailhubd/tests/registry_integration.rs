//! Integration tests for the log registry.
//!
//! These run real monitors against files in a temp directory and drive the
//! registry through `spawn_registry()` and the `RegistryHandle` interface.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.
//! We test the panic-free behavior of production code through assertions.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tailhub_core::{LogLine, LogMetadata, LogSource, RotationReason, SearchQuery, SourceStatus};
use tailhubd::config::{MonitorConfig, RegistryConfig};
use tailhubd::registry::{spawn_registry, Delivery, LogEvent, RegistryError, RegistryHandle, Subscription};
use tokio::time::{sleep, timeout, Instant};

// ============================================================================
// Test Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn fast_monitor() -> MonitorConfig {
    MonitorConfig {
        resync_interval_ms: 20,
        rescan_interval_ms: 30,
        ..MonitorConfig::default()
    }
}

fn registry_config() -> RegistryConfig {
    RegistryConfig {
        query_timeout_ms: 5_000,
        ..RegistryConfig::default()
    }
}

fn start() -> RegistryHandle {
    spawn_registry(registry_config(), fast_monitor()).expect("registry should start")
}

fn append(path: &Path, text: &str) {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
}

fn write_with_mtime(path: &Path, content: &str, secs: u64) {
    fs::write(path, content).unwrap();
    let file = File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn texts(lines: &[LogLine]) -> Vec<String> {
    lines.iter().map(|l| l.text.clone()).collect()
}

fn named(friendly: &str) -> LogMetadata {
    LogMetadata::new(Some(friendly.to_string()), None).unwrap()
}

/// Polls the buffer of `log` until `check` accepts it.
async fn wait_for_lines<F>(handle: &RegistryHandle, log: &str, check: F) -> Vec<String>
where
    F: Fn(&[String]) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let (_, lines) = handle.read_log(log, None).await.unwrap();
        let lines = texts(&lines);
        if check(&lines) {
            return lines;
        }
        assert!(Instant::now() < deadline, "timed out, buffer is {lines:?}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Polls the summary of `log` until `check` accepts it.
async fn wait_for_summary<F>(handle: &RegistryHandle, log: &str, check: F)
where
    F: Fn(&tailhub_core::LogSummary) -> bool,
{
    let deadline = Instant::now() + WAIT;
    loop {
        let logs = handle.list_logs().await.unwrap();
        let found = logs
            .iter()
            .find(|s| s.id.as_str() == log || s.friendly_id.as_deref() == Some(log));
        if let Some(summary) = found {
            if check(summary) {
                return;
            }
        }
        assert!(Instant::now() < deadline, "timed out, logs are {logs:?}");
        sleep(Duration::from_millis(10)).await;
    }
}

/// Receives events until `stop` accepts one, returning everything seen.
async fn collect_until<F>(sub: &mut Subscription, stop: F) -> Vec<Delivery>
where
    F: Fn(&Delivery) -> bool,
{
    let mut seen = Vec::new();
    loop {
        let delivery = timeout(WAIT, sub.recv())
            .await
            .expect("event should arrive")
            .expect("subscription should stay open");
        let done = stop(&delivery);
        seen.push(delivery);
        if done {
            return seen;
        }
    }
}

fn is_line(delivery: &Delivery, text: &str) -> bool {
    matches!(delivery, Delivery::Event(LogEvent::Line(line)) if line.text == text)
}

// ============================================================================
// Tailing
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_track_backfills_then_follows_appends() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "a\nb\n");

    let handle = start();
    let summary = handle
        .track(LogSource::Path(path.clone()), named("app"))
        .await
        .expect("track should succeed");
    assert_eq!(summary.friendly_id.as_deref(), Some("app"));

    wait_for_lines(&handle, "app", |l| l == ["a", "b"]).await;

    append(&path, "c\npartial");
    wait_for_lines(&handle, "app", |l| l == ["a", "b", "c"]).await;
    append(&path, " line\n");
    wait_for_lines(&handle, "app", |l| l == ["a", "b", "c", "partial line"]).await;

    wait_for_summary(&handle, "app", |s| {
        s.status == SourceStatus::Tailing && s.resolved_path.as_deref() == Some(path.as_path())
    })
    .await;

    // Reads by full id too
    let (id, lines) = handle
        .read_log(path.to_string_lossy().into_owned(), Some(2))
        .await
        .unwrap();
    assert_eq!(id.as_str(), path.to_string_lossy());
    assert_eq!(texts(&lines), ["c", "partial line"]);

    let results = handle
        .search(Some("app".to_string()), SearchQuery::literal("C"))
        .await
        .unwrap();
    assert_eq!(results.hits.len(), 1);
    assert_eq!(results.hits[0].seq, 3);
    assert_eq!(results.hits[0].friendly_id.as_deref(), Some("app"));

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_absent_file_lifecycle_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("app"))
        .await
        .unwrap();
    let (backlog, mut sub) = handle.subscribe("app", 100).await.unwrap();
    assert!(backlog.is_empty());

    append(&path, "line1\n");
    collect_until(&mut sub, |d| is_line(d, "line1")).await;

    // An unterminated line is held back
    append(&path, "line2");
    sleep(Duration::from_millis(150)).await;
    while let Some(delivery) = sub.try_recv() {
        assert!(
            !matches!(delivery, Delivery::Event(LogEvent::Line(_))),
            "partial line delivered: {delivery:?}"
        );
    }
    append(&path, "\n");
    collect_until(&mut sub, |d| is_line(d, "line2")).await;

    fs::remove_file(&path).unwrap();
    collect_until(&mut sub, |d| {
        matches!(
            d,
            Delivery::Event(LogEvent::Status(SourceStatus::Unavailable { .. }))
        )
    })
    .await;

    append(&path, "line3\n");
    collect_until(&mut sub, |d| is_line(d, "line3")).await;

    let (_, lines) = handle.read_log("app", None).await.unwrap();
    assert_eq!(texts(&lines), ["line1", "line2", "line3"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_file_waits_then_reads_from_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("later.log");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), LogMetadata::default())
        .await
        .unwrap();
    let log = path.to_string_lossy().into_owned();
    wait_for_summary(&handle, &log, |s| s.status == SourceStatus::Waiting).await;

    append(&path, "one\ntwo\n");
    wait_for_lines(&handle, &log, |l| l == ["one", "two"]).await;
    wait_for_summary(&handle, &log, |s| s.status == SourceStatus::Tailing).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_truncation_is_streamed_and_buffer_kept() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("app"))
        .await
        .unwrap();
    wait_for_summary(&handle, "app", |s| s.status == SourceStatus::Tailing).await;

    let (backlog, mut sub) = handle.subscribe("app", 10).await.unwrap();
    assert!(backlog.is_empty());

    append(&path, "old-1\nold-2\nold-3\n");
    collect_until(&mut sub, |d| is_line(d, "old-3")).await;

    fs::write(&path, "new\n").unwrap();
    let seen = collect_until(&mut sub, |d| is_line(d, "new")).await;
    assert!(seen.contains(&Delivery::Event(LogEvent::Rotated(RotationReason::Truncated))));

    let lines = wait_for_lines(&handle, "app", |l| l.len() == 4).await;
    assert_eq!(lines, ["old-1", "old-2", "old-3", "new"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_deleted_file_is_unavailable_until_recreated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.log");
    append(&path, "before\n");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("app"))
        .await
        .unwrap();
    wait_for_lines(&handle, "app", |l| l == ["before"]).await;

    fs::remove_file(&path).unwrap();
    wait_for_summary(&handle, "app", |s| {
        matches!(s.status, SourceStatus::Unavailable { .. })
    })
    .await;

    append(&path, "after\n");
    wait_for_lines(&handle, "app", |l| l == ["before", "after"]).await;
    wait_for_summary(&handle, "app", |s| s.status == SourceStatus::Tailing).await;

    handle.shutdown().await.unwrap();
}

// ============================================================================
// Wildcards
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_wildcard_follows_newest_match() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("api-1.log");
    let new = dir.path().join("api-2.log");
    write_with_mtime(&old, "first\n", 1_000);

    let handle = start();
    let pattern = dir.path().join("api-*.log").to_string_lossy().into_owned();
    let summary = handle
        .track(LogSource::Pattern(pattern), named("api"))
        .await
        .unwrap();
    assert!(summary.source.is_pattern());

    wait_for_summary(&handle, "api", |s| s.resolved_path.as_deref() == Some(old.as_path())).await;
    wait_for_lines(&handle, "api", |l| l == ["first"]).await;

    let (_, mut sub) = handle.subscribe("api", 0).await.unwrap();
    write_with_mtime(&new, "second\n", 2_000);

    let seen = collect_until(&mut sub, |d| is_line(d, "second")).await;
    assert!(seen.contains(&Delivery::Event(LogEvent::SourceChanged {
        from: Some(old.clone()),
        to: Some(new.clone()),
    })));
    wait_for_summary(&handle, "api", |s| {
        s.resolved_path.as_deref() == Some(new.as_path()) && s.candidates == 2
    })
    .await;
    wait_for_lines(&handle, "api", |l| l == ["first", "second"]).await;

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wildcard_without_matches_is_unmatched() {
    let dir = tempfile::tempdir().unwrap();
    let handle = start();
    let pattern = dir.path().join("none-*.log").to_string_lossy().into_owned();
    handle
        .track(LogSource::Pattern(pattern), named("none"))
        .await
        .unwrap();

    wait_for_summary(&handle, "none", |s| {
        s.status == SourceStatus::Unmatched && s.resolved_path.is_none()
    })
    .await;
    handle.shutdown().await.unwrap();
}

// ============================================================================
// Subscriptions
// ============================================================================

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_subscriber_misses_events_without_blocking_the_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("busy.log");
    append(&path, "");

    let config = RegistryConfig {
        subscriber_queue: 16,
        ..registry_config()
    };
    let handle = spawn_registry(config, fast_monitor()).unwrap();
    handle
        .track(LogSource::Path(path.clone()), named("busy"))
        .await
        .unwrap();
    wait_for_summary(&handle, "busy", |s| s.status == SourceStatus::Tailing).await;

    let (_, mut slow) = handle.subscribe("busy", 0).await.unwrap();
    let (_, mut fast) = handle.subscribe("busy", 0).await.unwrap();

    // The fast consumer drains as lines arrive
    let fast_task = tokio::spawn(async move {
        let mut lines = Vec::new();
        let mut missed = 0;
        while lines.len() < 40 {
            match timeout(WAIT, fast.recv()).await.expect("fast consumer stalled") {
                Some(Delivery::Event(LogEvent::Line(line))) => lines.push(line.text),
                Some(Delivery::Missed(n)) => missed += n,
                Some(_) => {}
                None => break,
            }
        }
        (lines, missed)
    });

    for i in 1..=40 {
        append(&path, &format!("line-{i}\n"));
        sleep(Duration::from_millis(5)).await;
    }

    let (fast_lines, fast_missed) = fast_task.await.unwrap();
    assert_eq!(fast_missed, 0);
    assert_eq!(fast_lines.len(), 40);
    assert_eq!(fast_lines.last().map(String::as_str), Some("line-40"));

    // The buffer gets everything even though one subscriber never read
    let lines = wait_for_lines(&handle, "busy", |l| l.len() == 40).await;
    assert_eq!(lines.last().map(String::as_str), Some("line-40"));

    let first = timeout(WAIT, slow.recv()).await.unwrap().unwrap();
    let count = match first {
        Delivery::Missed(count) => count,
        other => panic!("expected a missed notice first, got {other:?}"),
    };
    assert!(count > 0);
    assert_eq!(slow.missed(), count);

    // Then the most recent events, ending with the last line
    collect_until(&mut slow, |d| is_line(d, "line-40")).await;

    // A fresh subscriber can recover from the buffer
    let (backlog, _fresh) = handle.subscribe("busy", 3).await.unwrap();
    assert_eq!(texts(&backlog), ["line-38", "line-39", "line-40"]);

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untrack_ends_subscriptions_and_forgets_log() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gone.log");
    append(&path, "x\n");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("gone"))
        .await
        .unwrap();
    wait_for_lines(&handle, "gone", |l| l == ["x"]).await;

    let (backlog, mut sub) = handle.subscribe("gone", 5).await.unwrap();
    assert_eq!(texts(&backlog), ["x"]);

    assert!(handle.untrack("gone").await.unwrap());

    let seen = collect_until(&mut sub, |d| *d == Delivery::Event(LogEvent::Removed)).await;
    assert!(!seen.is_empty());
    assert!(timeout(WAIT, sub.recv()).await.unwrap().is_none());

    // Writes after untrack are not picked up by anyone
    append(&path, "y\n");
    assert!(matches!(
        handle.read_log("gone", None).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(!handle.untrack("gone").await.unwrap());

    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_clear_keeps_sequence_numbers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.log");
    append(&path, "1\n2\n");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("c"))
        .await
        .unwrap();
    wait_for_lines(&handle, "c", |l| l.len() == 2).await;

    let summary = handle.clear_log("c").await.unwrap();
    assert_eq!(summary.line_count, 0);
    assert_eq!(summary.total_lines, 2);

    append(&path, "3\n");
    wait_for_lines(&handle, "c", |l| l == ["3"]).await;
    let (_, lines) = handle.read_log("c", None).await.unwrap();
    assert_eq!(lines[0].seq, 3);

    handle.shutdown().await.unwrap();
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reads_see_consistent_snapshots() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.log");
    append(&path, "");

    let handle = start();
    handle
        .track(LogSource::Path(path.clone()), named("race"))
        .await
        .unwrap();
    wait_for_summary(&handle, "race", |s| s.status == SourceStatus::Tailing).await;

    let writer_path: PathBuf = path.clone();
    let writer = tokio::task::spawn_blocking(move || {
        for batch in 0..20 {
            let text: String = (0..10).map(|i| format!("{batch}-{i}\n")).collect();
            append(&writer_path, &text);
            std::thread::sleep(Duration::from_millis(2));
        }
    });

    let mut readers = Vec::new();
    for _ in 0..4 {
        let handle = handle.clone();
        readers.push(tokio::spawn(async move {
            for _ in 0..50 {
                let (_, lines) = handle.read_log("race", None).await.unwrap();
                // Sequence numbers are contiguous, no torn or reordered lines
                for pair in lines.windows(2) {
                    assert_eq!(pair[1].seq, pair[0].seq + 1);
                }
                for line in &lines {
                    assert!(line.text.contains('-'), "torn line {:?}", line.text);
                }
                sleep(Duration::from_millis(1)).await;
            }
        }));
    }

    writer.await.unwrap();
    for reader in readers {
        reader.await.unwrap();
    }
    wait_for_lines(&handle, "race", |l| l.len() == 200).await;

    handle.shutdown().await.unwrap();
}

// ============================================================================
// Errors and lifecycle
// ============================================================================

#[tokio::test]
async fn test_unknown_log_is_not_found() {
    let handle = start();

    assert!(matches!(
        handle.read_log("nope", None).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        handle.subscribe("nope", 0).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        handle.clear_log("nope").await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(matches!(
        handle.search(Some("nope".to_string()), SearchQuery::literal("x")).await,
        Err(RegistryError::NotFound(_))
    ));
    assert!(!handle.untrack("nope").await.unwrap());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_regex_is_query_failed() {
    let handle = start();
    let result = handle
        .search(None, SearchQuery::literal("(unclosed").regex(true))
        .await;
    assert!(matches!(result, Err(RegistryError::QueryFailed(_))));
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_the_bridge() {
    let handle = start();
    handle.shutdown().await.unwrap();

    // The actor thread exits after answering shutdown
    let deadline = Instant::now() + WAIT;
    while handle.is_connected() {
        assert!(Instant::now() < deadline, "actor did not stop");
        sleep(Duration::from_millis(10)).await;
    }
    assert!(matches!(
        handle.list_logs().await,
        Err(RegistryError::ChannelClosed)
    ));
}
