//! Two-phase post-order removal of empty directories.
//!
//! Pass 1 walks everything the scan registered, deepest first. Pass 2
//! cascades upward: a parent left empty by pass 1 joins the next cohort,
//! its parent the one after, until nothing new empties out or the deletion
//! limit is hit.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{classify_io_error, IoErrorClass};
use crate::fs_ops::{self, DirEntryInfo};
use crate::logging::LogLevel;
use crate::purger::Purger;
use crate::rate_tracker::{RateMetric, RatePhase};
use crate::stats::Phase;

const MEMORY_CHECK_EVERY: u64 = 1000;
const CASCADE_LOG_EVERY: u64 = 100;

impl Purger {
    /// Remove directories observed empty during the scan, then cascade
    /// through parents that become empty. Serialized by design: post-order
    /// within a cohort is what keeps parents behind their children.
    pub async fn remove_empty_directories(&self) {
        let initial: Vec<PathBuf> = {
            let mut st = self.state.lock().await;
            st.phase = Phase::RemovingEmptyDirs;
            st.empty_dirs.iter().cloned().collect()
        };
        self.set_rate_phase(RatePhase::RemovingEmptyDirs);

        if initial.is_empty() {
            self.logger.info("No empty directories to remove", None);
            return;
        }

        let resolved_root = fs_ops::canonicalize(&self.config.root)
            .await
            .unwrap_or_else(|_| self.config.root.clone());

        self.logger.info(
            "Removing empty directories",
            Some(json!({
                "candidates": initial.len(),
                "dry_run": self.config.dry_run,
                "max_empty_dirs_to_delete": self.config.max_empty_dirs_to_delete,
            })),
        );

        let mut processed: HashSet<PathBuf> = HashSet::new();

        let mut cohort = initial;
        sort_deepest_first(&mut cohort);
        let mut next_parents: HashSet<PathBuf> = HashSet::new();
        let mut limit_reached = self
            .reap_cohort(cohort, &resolved_root, &mut processed, &mut next_parents)
            .await;

        let mut iterations: u64 = 0;
        while !next_parents.is_empty() && !limit_reached {
            iterations += 1;
            if iterations % CASCADE_LOG_EVERY == 0 {
                self.logger.info(
                    "Empty-directory cascade still running",
                    Some(json!({
                        "iteration": iterations,
                        "pending_parents": next_parents.len(),
                    })),
                );
            }
            let mut cohort: Vec<PathBuf> = next_parents.drain().collect();
            sort_deepest_first(&mut cohort);
            let mut found: HashSet<PathBuf> = HashSet::new();
            limit_reached = self
                .reap_cohort(cohort, &resolved_root, &mut processed, &mut found)
                .await;
            next_parents = found;
        }

        let (to_delete, deleted) = {
            let st = self.state.lock().await;
            (
                st.stats.empty_dirs_to_delete,
                st.stats.empty_dirs_deleted,
            )
        };
        self.logger.info(
            "Empty directory removal complete",
            Some(json!({
                "empty_dirs_to_delete": to_delete,
                "empty_dirs_deleted": deleted,
                "limit_reached": limit_reached,
            })),
        );
    }

    /// Process one deepest-first cohort. Returns true when the deletion
    /// limit terminated the pass.
    async fn reap_cohort(
        &self,
        cohort: Vec<PathBuf>,
        resolved_root: &Path,
        processed: &mut HashSet<PathBuf>,
        next_parents: &mut HashSet<PathBuf>,
    ) -> bool {
        let mut since_memory_check: u64 = 0;
        for dir in cohort {
            since_memory_check += 1;
            if since_memory_check >= MEMORY_CHECK_EVERY {
                since_memory_check = 0;
                self.check_memory_pressure().await;
            }

            if processed.contains(&dir) {
                continue;
            }

            // The limit counts attempts, not successes, so dry-run and live
            // terminate at the same point.
            if self.config.max_empty_dirs_to_delete > 0 {
                let attempts = self.state.lock().await.stats.empty_dirs_to_delete;
                if attempts >= self.config.max_empty_dirs_to_delete {
                    self.logger.info(
                        "Empty directory deletion limit reached",
                        Some(json!({
                            "max_empty_dirs_to_delete": self.config.max_empty_dirs_to_delete,
                        })),
                    );
                    return true;
                }
            }

            match fs_ops::canonicalize(&dir).await {
                Ok(resolved) if resolved == resolved_root => {
                    processed.insert(dir);
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    // Vanished or unreachable; nothing left to do here.
                    processed.insert(dir);
                    continue;
                }
            }

            match fs_ops::scan_dir(&dir).await {
                Ok(entries) => {
                    if !self.treat_as_empty(&entries, processed) {
                        // A concurrent writer repopulated it.
                        self.logger.debug(
                            "Directory no longer empty, skipping",
                            Some(json!({"directory": dir.display().to_string()})),
                        );
                        processed.insert(dir);
                        continue;
                    }
                }
                Err(err) => {
                    if classify_io_error(&err) != IoErrorClass::Raced {
                        {
                            let mut st = self.state.lock().await;
                            st.stats.errors += 1;
                        }
                        self.logger.log_io_error(
                            LogLevel::Warning,
                            "Error re-checking empty directory",
                            &err,
                            Some(json!({"directory": dir.display().to_string()})),
                        );
                    }
                    processed.insert(dir);
                    continue;
                }
            }

            if self.config.dry_run {
                {
                    let mut st = self.state.lock().await;
                    st.stats.empty_dirs_to_delete += 1;
                }
                self.logger.debug(
                    "Would remove empty directory",
                    Some(json!({"directory": dir.display().to_string()})),
                );
            } else {
                self.rmdir_empty(&dir).await;
            }

            processed.insert(dir.clone());

            if let Some(parent) = dir.parent() {
                let parent = parent.to_path_buf();
                if parent != resolved_root
                    && parent != self.config.root
                    && !processed.contains(&parent)
                    && !next_parents.contains(&parent)
                {
                    if let Ok(entries) = fs_ops::scan_dir(&parent).await {
                        if self.treat_as_empty(&entries, processed) {
                            next_parents.insert(parent);
                        }
                    }
                }
            }
        }
        false
    }

    /// Emptiness as the reaper sees it. Live mode trusts the re-scan. In
    /// dry-run the children are still on disk, so entries that are
    /// directories already processed this pass count as gone; that keeps the
    /// dry-run cascade (and its counters) identical to the live outcome.
    fn treat_as_empty(&self, entries: &[DirEntryInfo], processed: &HashSet<PathBuf>) -> bool {
        if self.config.dry_run {
            entries.iter().all(|e| e.is_dir && processed.contains(&e.path))
        } else {
            entries.is_empty()
        }
    }

    async fn rmdir_empty(&self, dir: &Path) {
        let Ok(_delete_permit) = self.delete_semaphore.acquire().await else {
            return;
        };
        match fs_ops::rmdir(dir).await {
            Ok(()) => {
                {
                    let mut st = self.state.lock().await;
                    st.stats.empty_dirs_to_delete += 1;
                    st.stats.empty_dirs_deleted += 1;
                }
                self.record_sample(RatePhase::RemovingEmptyDirs, RateMetric::Dirs, 1);
                self.logger.debug(
                    "Removed empty directory",
                    Some(json!({"directory": dir.display().to_string()})),
                );
            }
            Err(err) => {
                if classify_io_error(&err) != IoErrorClass::Raced {
                    {
                        let mut st = self.state.lock().await;
                        st.stats.errors += 1;
                    }
                    self.logger.log_io_error(
                        LogLevel::Warning,
                        "Failed to remove empty directory",
                        &err,
                        Some(json!({"directory": dir.display().to_string()})),
                    );
                }
            }
        }
    }
}

/// Deepest paths first; ties break lexically so the order is deterministic.
fn sort_deepest_first(dirs: &mut [PathBuf]) {
    dirs.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_deepest_first() {
        let mut dirs = vec![
            PathBuf::from("/r/a"),
            PathBuf::from("/r/a/b/c"),
            PathBuf::from("/r/a/b"),
            PathBuf::from("/r/z"),
        ];
        sort_deepest_first(&mut dirs);
        assert_eq!(
            dirs,
            vec![
                PathBuf::from("/r/a/b/c"),
                PathBuf::from("/r/a/b"),
                PathBuf::from("/r/a"),
                PathBuf::from("/r/z"),
            ]
        );
    }
}
