//! Empty-directory reaping: cascade, rate limit, dry-run parity, and
//! race absorption against real temp trees.

use std::fs::{self, File, FileTimes};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::tempdir;

use efspurge::config::PurgeConfig;
use efspurge::logging::{JsonLogger, LogLevel};
use efspurge::purger::Purger;

const DAY_SECS: u64 = 86_400;

fn reap_config(root: &Path) -> PurgeConfig {
    let mut config = PurgeConfig::new(root, 30.0);
    config.dry_run = false;
    config.remove_empty_dirs = true;
    config.max_empty_dirs_to_delete = 0;
    config.memory_limit_mb = 0;
    config.progress_interval_secs = 3600.0;
    config
}

fn build(config: PurgeConfig) -> Arc<Purger> {
    let logger = JsonLogger::new("efspurge", LogLevel::Error);
    Arc::new(Purger::new(config, logger).unwrap())
}

fn old_file(path: &Path) {
    fs::write(path, b"stale").unwrap();
    let mtime = SystemTime::now() - Duration::from_secs(31 * DAY_SECS);
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(FileTimes::new().set_modified(mtime)).unwrap();
}

/// `R/a/b/c/d/e` all empty plus ten flat empty siblings: the chain collapses
/// through the parent cascade, the flats go in pass one.
#[tokio::test]
async fn cascade_collapses_nested_and_flat_empties() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("a/b/c/d/e")).unwrap();
    for i in 0..10 {
        fs::create_dir(tmp.path().join(format!("flat_{i}"))).unwrap();
    }

    let purger = build(reap_config(tmp.path()));
    let report = Arc::clone(&purger).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_deleted, 15);
    assert_eq!(report.stats.empty_dirs_to_delete, 15);
    assert_eq!(report.stats.errors, 0);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    assert!(tmp.path().exists());
}

#[tokio::test]
async fn rate_limit_terminates_after_exactly_k_attempts() {
    let tmp = tempdir().unwrap();
    for i in 0..100 {
        fs::create_dir(tmp.path().join(format!("empty_{i:03}"))).unwrap();
    }

    let mut config = reap_config(tmp.path());
    config.max_empty_dirs_to_delete = 50;
    let report = Arc::clone(&build(config)).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_deleted, 50);
    assert_eq!(report.stats.empty_dirs_to_delete, 50);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 50);
}

#[tokio::test]
async fn rate_limit_applies_across_the_cascade() {
    let tmp = tempdir().unwrap();
    for top in ["a", "d", "g"] {
        for mid in ["b", "e", "h"] {
            for leaf in ["c", "f", "i"] {
                fs::create_dir_all(tmp.path().join(top).join(mid).join(leaf)).unwrap();
            }
        }
    }

    let mut config = reap_config(tmp.path());
    config.max_empty_dirs_to_delete = 5;
    let report = Arc::clone(&build(config)).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_deleted, 5);
    assert_eq!(report.stats.empty_dirs_to_delete, 5);
}

/// Five of twenty candidates vanish between scan and reap; the reaper
/// absorbs the races without counting errors.
#[tokio::test]
async fn externally_removed_candidates_are_absorbed() {
    let tmp = tempdir().unwrap();
    for i in 0..20 {
        fs::create_dir(tmp.path().join(format!("empty_{i:02}"))).unwrap();
    }

    let purger = build(reap_config(tmp.path()));
    Arc::clone(&purger)
        .scan_directory(tmp.path().to_path_buf(), false)
        .await;
    assert_eq!(purger.pending_empty_dirs().await, 20);

    for i in 0..5 {
        fs::remove_dir(tmp.path().join(format!("empty_{i:02}"))).unwrap();
    }

    purger.remove_empty_directories().await;
    let stats = purger.stats_snapshot().await;

    assert_eq!(stats.empty_dirs_deleted, 15);
    assert_eq!(stats.errors, 0);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

/// Dry-run must report the outcome a live run would produce, including the
/// parents that only become empty mid-cascade, while deleting nothing.
#[tokio::test]
async fn dry_run_counts_match_live_outcome() {
    let build_tree = |root: &Path| {
        fs::create_dir_all(root.join("x/y/z")).unwrap();
        for i in 0..4 {
            fs::create_dir(root.join(format!("flat_{i}"))).unwrap();
        }
    };

    let dry_tmp = tempdir().unwrap();
    build_tree(dry_tmp.path());
    let mut dry = reap_config(dry_tmp.path());
    dry.dry_run = true;
    let dry_report = Arc::clone(&build(dry)).run().await.unwrap();

    let live_tmp = tempdir().unwrap();
    build_tree(live_tmp.path());
    let live_report = Arc::clone(&build(reap_config(live_tmp.path())))
        .run()
        .await
        .unwrap();

    assert_eq!(live_report.stats.empty_dirs_deleted, 7);
    assert_eq!(dry_report.stats.empty_dirs_deleted, 0);
    assert_eq!(
        dry_report.stats.empty_dirs_to_delete,
        live_report.stats.empty_dirs_deleted
    );
    // Dry run left the tree alone.
    assert_eq!(fs::read_dir(dry_tmp.path()).unwrap().count(), 5);
    assert_eq!(fs::read_dir(live_tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn reaping_disabled_means_no_rmdir() {
    let tmp = tempdir().unwrap();
    for i in 0..6 {
        fs::create_dir(tmp.path().join(format!("empty_{i}"))).unwrap();
    }

    let mut config = reap_config(tmp.path());
    config.remove_empty_dirs = false;
    let purger = build(config);
    let report = Arc::clone(&purger).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_to_delete, 0);
    assert_eq!(report.stats.empty_dirs_deleted, 0);
    assert_eq!(purger.pending_empty_dirs().await, 0);
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 6);
}

/// A directory holding only stale files empties out during the scan and is
/// reaped in the same run.
#[tokio::test]
async fn dir_emptied_by_file_purge_is_reaped() {
    let tmp = tempdir().unwrap();
    let sub = tmp.path().join("stale_only");
    fs::create_dir(&sub).unwrap();
    for i in 0..3 {
        old_file(&sub.join(format!("old{i}")));
    }
    let keep = tmp.path().join("mixed");
    fs::create_dir(&keep).unwrap();
    fs::write(keep.join("fresh"), b"new").unwrap();

    let report = Arc::clone(&build(reap_config(tmp.path()))).run().await.unwrap();

    assert_eq!(report.stats.files_purged, 3);
    assert_eq!(report.stats.empty_dirs_deleted, 1);
    assert!(!sub.exists());
    assert!(keep.exists());
}

#[cfg(unix)]
#[tokio::test]
async fn dir_holding_only_a_symlink_is_not_empty() {
    let tmp = tempdir().unwrap();
    let target = tmp.path().join("target");
    fs::write(&target, b"x").unwrap();
    let sub = tmp.path().join("linked");
    fs::create_dir(&sub).unwrap();
    std::os::unix::fs::symlink(&target, sub.join("link")).unwrap();

    let report = Arc::clone(&build(reap_config(tmp.path()))).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_deleted, 0);
    assert!(sub.exists());
    assert!(sub.join("link").symlink_metadata().is_ok());
}

#[tokio::test]
async fn root_is_never_removed_even_when_it_empties() {
    let tmp = tempdir().unwrap();
    fs::create_dir(tmp.path().join("only_child")).unwrap();

    let report = Arc::clone(&build(reap_config(tmp.path()))).run().await.unwrap();

    assert_eq!(report.stats.empty_dirs_deleted, 1);
    assert!(tmp.path().exists());
    assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn repopulated_candidate_is_skipped() {
    let tmp = tempdir().unwrap();
    for i in 0..3 {
        fs::create_dir(tmp.path().join(format!("empty_{i}"))).unwrap();
    }

    let purger = build(reap_config(tmp.path()));
    Arc::clone(&purger)
        .scan_directory(tmp.path().to_path_buf(), false)
        .await;

    // A concurrent writer fills one candidate before the reaper reaches it.
    fs::write(tmp.path().join("empty_1").join("surprise"), b"data").unwrap();

    purger.remove_empty_directories().await;
    let stats = purger.stats_snapshot().await;

    assert_eq!(stats.empty_dirs_deleted, 2);
    assert_eq!(stats.errors, 0);
    assert!(tmp.path().join("empty_1").join("surprise").exists());
}
