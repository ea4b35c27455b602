//! One validation run over the address list.
//!
//! A run moves through `Init → Backup → Scanning → Committing → Done`.
//! Nothing on disk except the backup changes before `Committing`, so a run
//! that dies earlier leaves the list and cursor exactly as it found them.

use crate::cursor;
use crate::error::ValidatorError;
use crate::providers::{ReputationChecker, ReputationProvider, Verdict};
use crate::rotator::{Credential, CredentialRotator};
use crate::storage::{self, RemovedEntry};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::{debug, info};

/// Files touched by a run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub list: PathBuf,
    pub cursor: PathBuf,
    pub backup_dir: PathBuf,
    pub verdict_log: PathBuf,
}

/// Run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Backup,
    Scanning,
    Committing,
    Done,
}

/// Working copy taken at `Init`.
#[derive(Debug)]
pub struct Snapshot {
    pub addresses: Vec<String>,
    pub cursor: usize,
    pub started_at: DateTime<Utc>,
    rotator: CredentialRotator,
}

/// Result of the scanning phase, not yet written anywhere.
#[derive(Debug)]
pub struct ScanOutcome {
    /// Addresses to keep, in original order.
    pub survivors: Vec<String>,
    pub removed: Vec<RemovedEntry>,
    pub examined: u64,
    pub indeterminate: u64,
    pub start_cursor: usize,
    /// Cursor to persist, already wrapped to the scanned list.
    pub next_cursor: usize,
}

/// Counts reported when a run finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub examined: u64,
    pub removed: usize,
    pub kept: usize,
    pub indeterminate: u64,
    pub start_cursor: usize,
    pub next_cursor: usize,
    pub backup: PathBuf,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Examined {} addresses: removed {}, kept {} ({} lookups failed and were kept). \
             Cursor {} -> {}. Backup: {}",
            self.examined,
            self.removed,
            self.kept,
            self.indeterminate,
            self.start_cursor,
            self.next_cursor,
            self.backup.display()
        )
    }
}

/// Drives one run.
pub struct ValidationRun<P> {
    paths: RunPaths,
    credentials: Vec<Credential>,
    max_per_key: u32,
    checker: ReputationChecker<P>,
    state: RunState,
}

impl<P: ReputationProvider> ValidationRun<P> {
    pub fn new(
        paths: RunPaths,
        credentials: Vec<Credential>,
        max_per_key: u32,
        checker: ReputationChecker<P>,
    ) -> Self {
        Self {
            paths,
            credentials,
            max_per_key,
            checker,
            state: RunState::Init,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn checker(&self) -> &ReputationChecker<P> {
        &self.checker
    }

    fn enter(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "Run state transition");
        self.state = next;
    }

    /// Run every phase and commit.
    pub async fn execute(&mut self) -> Result<RunSummary, ValidatorError> {
        let snapshot = self.init()?;
        let backup = self.backup(&snapshot)?;
        let outcome = self.scan(snapshot).await;
        self.commit(&outcome)?;
        self.enter(RunState::Done);

        let summary = RunSummary {
            examined: outcome.examined,
            removed: outcome.removed.len(),
            kept: outcome.survivors.len(),
            indeterminate: outcome.indeterminate,
            start_cursor: outcome.start_cursor,
            next_cursor: outcome.next_cursor,
            backup,
        };

        info!(
            examined = summary.examined,
            removed = summary.removed,
            kept = summary.kept,
            indeterminate = summary.indeterminate,
            cursor = summary.next_cursor,
            "Validation run complete"
        );

        Ok(summary)
    }

    /// Check credentials, then load the list and cursor.
    pub fn init(&mut self) -> Result<Snapshot, ValidatorError> {
        let rotator = CredentialRotator::new(self.credentials.clone(), self.max_per_key)?;
        let addresses = storage::load_addresses(&self.paths.list)?;
        let cursor = cursor::load(&self.paths.cursor)?;

        info!(
            addresses = addresses.len(),
            cursor = cursor,
            keys = rotator.key_count(),
            quota = rotator.total_quota(),
            "Validation run starting"
        );

        Ok(Snapshot {
            addresses,
            cursor,
            started_at: Utc::now(),
            rotator,
        })
    }

    /// Snapshot the loaded list before anything can change it.
    pub fn backup(&mut self, snapshot: &Snapshot) -> Result<PathBuf, ValidatorError> {
        self.enter(RunState::Backup);
        let path = storage::write_backup(
            &self.paths.backup_dir,
            &snapshot.addresses,
            snapshot.started_at,
        )?;
        info!(path = %path.display(), "Backup written");
        Ok(path)
    }

    /// Classify addresses from the cursor onwards until the quota runs out.
    ///
    /// Wrapping past the end of the list does not end the scan. Slots removed
    /// earlier in this run are skipped without spending quota.
    pub async fn scan(&mut self, snapshot: Snapshot) -> ScanOutcome {
        self.enter(RunState::Scanning);

        let Snapshot {
            addresses,
            cursor: start_cursor,
            mut rotator,
            ..
        } = snapshot;

        let len = addresses.len();
        let mut removed_slots = vec![false; len];
        let mut live = len;
        let mut position = start_cursor;
        let mut removed = Vec::new();
        let mut examined = 0u64;
        let mut indeterminate = 0u64;
        let mut current_key = None;

        while live > 0 {
            let Some(allocation) = rotator.next() else {
                break;
            };

            if current_key != Some(allocation.key_index) {
                info!(key = allocation.key_index + 1, "Using API key");
                current_key = Some(allocation.key_index);
            }

            let mut index = cursor::advance(position, len);
            while removed_slots[index] {
                index = cursor::advance(index + 1, len);
            }

            let address = &addresses[index];
            let verdict = self.checker.check(address, &allocation.credential).await;
            examined += 1;

            if verdict.is_removable() {
                info!(address = %address, "Score dropped to zero, removing");
                removed_slots[index] = true;
                live -= 1;
                removed.push(RemovedEntry {
                    removed_at: Utc::now(),
                    address: address.clone(),
                });
            } else if verdict == Verdict::Indeterminate {
                indeterminate += 1;
            }

            position = index + 1;
        }

        let survivors = addresses
            .into_iter()
            .zip(removed_slots)
            .filter(|(_, gone)| !gone)
            .map(|(address, _)| address)
            .collect();

        ScanOutcome {
            survivors,
            removed,
            examined,
            indeterminate,
            start_cursor,
            next_cursor: cursor::advance(position, len),
        }
    }

    /// Replace the list, persist the cursor and log removals.
    pub fn commit(&mut self, outcome: &ScanOutcome) -> Result<(), ValidatorError> {
        self.enter(RunState::Committing);
        storage::save_addresses(&self.paths.list, &outcome.survivors)?;
        cursor::save(&self.paths.cursor, outcome.next_cursor)?;
        storage::append_verdicts(&self.paths.verdict_log, &outcome.removed)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderError, ScoreReport};
    use crate::throttle::Throttle;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    /// How the scripted provider answers for one address.
    #[derive(Clone, Copy)]
    enum Reply {
        Score(u8),
        Malformed,
        Timeout,
    }

    /// Answers from a table and records every call as `address@key`.
    struct ScriptedProvider {
        replies: HashMap<String, Reply>,
        fallback: Reply,
        calls: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl ReputationProvider for ScriptedProvider {
        async fn lookup(
            &self,
            address: &str,
            credential: &Credential,
        ) -> Result<ScoreReport, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{}@{}", address, credential.expose()));
            match self.replies.get(address).copied().unwrap_or(self.fallback) {
                Reply::Score(score) => Ok(ScoreReport { score }),
                Reply::Malformed => Err(ProviderError::InvalidResponse("no data".into())),
                Reply::Timeout => Err(ProviderError::Timeout),
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    struct Fixture {
        _dir: TempDir,
        paths: RunPaths,
    }

    impl Fixture {
        fn new(list: &[&str], cursor: Option<&str>) -> Self {
            let dir = TempDir::new().unwrap();
            let paths = RunPaths {
                list: dir.path().join("malicious_ips.txt"),
                cursor: dir.path().join("cursor.txt"),
                backup_dir: dir.path().join("backups"),
                verdict_log: dir.path().join("removed_ips.log"),
            };
            let mut content = list.join("\n");
            if !list.is_empty() {
                content.push('\n');
            }
            std::fs::write(&paths.list, content).unwrap();
            if let Some(c) = cursor {
                std::fs::write(&paths.cursor, c).unwrap();
            }
            Self { _dir: dir, paths }
        }

        fn list(&self) -> Vec<String> {
            storage::load_addresses(&self.paths.list).unwrap()
        }

        fn cursor(&self) -> usize {
            cursor::load(&self.paths.cursor).unwrap()
        }

        fn verdict_lines(&self) -> Vec<String> {
            match std::fs::read_to_string(&self.paths.verdict_log) {
                Ok(content) => content.lines().map(str::to_string).collect(),
                Err(_) => Vec::new(),
            }
        }

        fn run(
            &self,
            keys: &[&str],
            max_per_key: u32,
            replies: &[(&str, Reply)],
            fallback: Reply,
        ) -> (ValidationRun<ScriptedProvider>, Arc<Mutex<Vec<String>>>) {
            let calls = Arc::new(Mutex::new(Vec::new()));
            let provider = ScriptedProvider {
                replies: replies
                    .iter()
                    .map(|(a, r)| (a.to_string(), *r))
                    .collect(),
                fallback,
                calls: calls.clone(),
            };
            let checker = ReputationChecker::new(provider, Throttle::new(Duration::ZERO));
            let credentials = keys.iter().map(|k| Credential::new(*k)).collect();
            (
                ValidationRun::new(self.paths.clone(), credentials, max_per_key, checker),
                calls,
            )
        }
    }

    fn read_bytes(path: &Path) -> Option<Vec<u8>> {
        std::fs::read(path).ok()
    }

    #[tokio::test]
    async fn test_removes_benign_and_keeps_malicious() {
        let fx = Fixture::new(&["1.2.3.4", "5.6.7.8"], Some("0"));
        let (mut run, _) = fx.run(
            &["k1"],
            2,
            &[("1.2.3.4", Reply::Score(0)), ("5.6.7.8", Reply::Score(37))],
            Reply::Timeout,
        );

        let summary = run.execute().await.unwrap();

        assert_eq!(run.state(), RunState::Done);
        assert_eq!(fx.list(), vec!["5.6.7.8"]);
        assert_eq!(fx.cursor(), 0);
        let lines = fx.verdict_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" | 1.2.3.4"));
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.removed, 1);
        assert_eq!(summary.kept, 1);
    }

    #[tokio::test]
    async fn test_all_malicious_leaves_list_unchanged() {
        let list = ["10.1.1.1", "10.1.1.2", "10.1.1.3", "10.1.1.4", "10.1.1.5"];
        let fx = Fixture::new(&list, Some("1"));
        let before = std::fs::read(&fx.paths.list).unwrap();
        let (mut run, _) = fx.run(&["k1"], 3, &[], Reply::Score(80));

        let summary = run.execute().await.unwrap();

        assert_eq!(std::fs::read(&fx.paths.list).unwrap(), before);
        assert_eq!(summary.examined, 3);
        assert_eq!(fx.cursor(), 4);
        assert!(!fx.paths.verdict_log.exists());
    }

    #[tokio::test]
    async fn test_lookup_failures_never_remove() {
        let fx = Fixture::new(&["1.1.1.1", "2.2.2.2", "3.3.3.3"], None);
        let (mut run, _) = fx.run(
            &["k1"],
            3,
            &[
                ("1.1.1.1", Reply::Timeout),
                ("2.2.2.2", Reply::Malformed),
                ("3.3.3.3", Reply::Score(0)),
            ],
            Reply::Timeout,
        );

        let summary = run.execute().await.unwrap();

        assert_eq!(fx.list(), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(summary.indeterminate, 2);
        assert_eq!(summary.removed, 1);
    }

    #[tokio::test]
    async fn test_wraparound_cursor() {
        let fx = Fixture::new(&["a", "b", "c"], Some("2"));
        let (mut run, calls) = fx.run(&["k1"], 5, &[], Reply::Score(50));

        run.execute().await.unwrap();

        assert_eq!(fx.cursor(), (2 + 5) % 3);
        let seen: Vec<String> = calls.lock().unwrap().clone();
        assert_eq!(seen, vec!["c@k1", "a@k1", "b@k1", "c@k1", "a@k1"]);
    }

    #[tokio::test]
    async fn test_cursor_past_end_wraps_to_start() {
        let fx = Fixture::new(&["a", "b", "c"], Some("17"));
        let (mut run, calls) = fx.run(&["k1"], 1, &[], Reply::Score(50));

        run.execute().await.unwrap();

        assert_eq!(*calls.lock().unwrap(), vec!["a@k1"]);
        assert_eq!(fx.cursor(), 1);
    }

    #[tokio::test]
    async fn test_quota_bound_across_keys() {
        let fx = Fixture::new(&["a", "b", "c", "d", "e"], None);
        let (mut run, calls) = fx.run(&["k1", "k2"], 3, &[], Reply::Score(10));

        let summary = run.execute().await.unwrap();

        let seen = calls.lock().unwrap().clone();
        assert_eq!(seen.len(), 6);
        assert_eq!(run.checker().calls(), 6);
        assert_eq!(summary.examined, 6);
        assert!(seen[..3].iter().all(|c| c.ends_with("@k1")));
        assert!(seen[3..].iter().all(|c| c.ends_with("@k2")));
        assert_eq!(fx.cursor(), 1);
    }

    #[tokio::test]
    async fn test_removed_slot_not_rechecked_on_next_pass() {
        let fx = Fixture::new(&["a", "b"], None);
        let (mut run, calls) = fx.run(&["k1"], 5, &[("a", Reply::Score(0))], Reply::Score(9));

        let summary = run.execute().await.unwrap();

        let seen = calls.lock().unwrap().clone();
        assert_eq!(seen, vec!["a@k1", "b@k1", "b@k1", "b@k1", "b@k1"]);
        assert_eq!(summary.removed, 1);
        assert_eq!(fx.list(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_scan_stops_when_every_slot_removed() {
        let fx = Fixture::new(&["a", "b"], None);
        let (mut run, calls) = fx.run(&["k1"], 10, &[], Reply::Score(0));

        let summary = run.execute().await.unwrap();

        assert_eq!(calls.lock().unwrap().len(), 2);
        assert_eq!(summary.kept, 0);
        assert_eq!(std::fs::read_to_string(&fx.paths.list).unwrap(), "");
        assert_eq!(fx.verdict_lines().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicates_are_independent_slots() {
        let fx = Fixture::new(&["1.1.1.1", "1.1.1.1", "2.2.2.2"], None);
        let (mut run, _) = fx.run(&["k1"], 1, &[("1.1.1.1", Reply::Score(0))], Reply::Score(5));

        run.execute().await.unwrap();

        assert_eq!(fx.list(), vec!["1.1.1.1", "2.2.2.2"]);
        assert_eq!(fx.cursor(), 1);
    }

    #[tokio::test]
    async fn test_empty_list() {
        let fx = Fixture::new(&[], Some("4"));
        let (mut run, calls) = fx.run(&["k1"], 10, &[], Reply::Score(0));

        let summary = run.execute().await.unwrap();

        assert!(calls.lock().unwrap().is_empty());
        assert_eq!(summary.examined, 0);
        assert_eq!(std::fs::read_to_string(&fx.paths.list).unwrap(), "");
        assert_eq!(fx.cursor(), 0);
        assert!(summary.backup.exists());
    }

    #[tokio::test]
    async fn test_backup_holds_pre_run_list() {
        let fx = Fixture::new(&["1.2.3.4", "5.6.7.8"], None);
        let (mut run, _) = fx.run(&["k1"], 2, &[], Reply::Score(0));

        let summary = run.execute().await.unwrap();

        assert!(summary.backup.starts_with(&fx.paths.backup_dir));
        assert_eq!(
            std::fs::read_to_string(&summary.backup).unwrap(),
            "1.2.3.4\n5.6.7.8\n"
        );
        assert!(fx.list().is_empty());
    }

    #[tokio::test]
    async fn test_uncommitted_run_leaves_storage_untouched() {
        let fx = Fixture::new(&["1.2.3.4", "5.6.7.8", "9.9.9.9"], Some("1"));
        let list_before = read_bytes(&fx.paths.list);
        let cursor_before = read_bytes(&fx.paths.cursor);
        let (mut run, calls) = fx.run(&["k1"], 3, &[], Reply::Score(0));

        let snapshot = run.init().unwrap();
        run.backup(&snapshot).unwrap();
        let outcome = run.scan(snapshot).await;
        assert_eq!(run.state(), RunState::Scanning);
        assert_eq!(outcome.removed.len(), 3);
        assert_eq!(calls.lock().unwrap().len(), 3);
        drop(run);

        assert_eq!(read_bytes(&fx.paths.list), list_before);
        assert_eq!(read_bytes(&fx.paths.cursor), cursor_before);
        assert!(!fx.paths.verdict_log.exists());
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_io() {
        let fx = Fixture::new(&["1.2.3.4"], None);
        std::fs::remove_file(&fx.paths.list).unwrap();
        let (mut run, _) = fx.run(&[], 10, &[], Reply::Score(0));

        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ValidatorError::Config(_)));
        assert!(!fx.paths.backup_dir.exists());
    }

    #[tokio::test]
    async fn test_unreadable_list_aborts() {
        let fx = Fixture::new(&["1.2.3.4"], None);
        std::fs::remove_file(&fx.paths.list).unwrap();
        let (mut run, calls) = fx.run(&["k1"], 10, &[], Reply::Score(0));

        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ValidatorError::Storage { .. }));
        assert!(calls.lock().unwrap().is_empty());
        assert!(!fx.paths.backup_dir.exists());
        assert!(!fx.paths.cursor.exists());
    }

    #[tokio::test]
    async fn test_corrupt_cursor_aborts_without_reset() {
        let fx = Fixture::new(&["1.2.3.4"], Some("garbage"));
        let (mut run, _) = fx.run(&["k1"], 10, &[], Reply::Score(0));

        let err = run.execute().await.unwrap_err();

        assert!(matches!(err, ValidatorError::State { .. }));
        assert_eq!(
            std::fs::read_to_string(&fx.paths.cursor).unwrap(),
            "garbage"
        );
        assert_eq!(fx.list(), vec!["1.2.3.4"]);
    }

    #[tokio::test]
    async fn test_consecutive_runs_resume_from_cursor() {
        let fx = Fixture::new(&["a", "b", "c", "d"], None);

        let (mut first, first_calls) = fx.run(&["k1"], 3, &[], Reply::Score(1));
        first.execute().await.unwrap();
        let (mut second, second_calls) = fx.run(&["k1"], 3, &[], Reply::Score(1));
        second.execute().await.unwrap();

        assert_eq!(*first_calls.lock().unwrap(), vec!["a@k1", "b@k1", "c@k1"]);
        assert_eq!(*second_calls.lock().unwrap(), vec!["d@k1", "a@k1", "b@k1"]);
        assert_eq!(fx.cursor(), 2);
        let backups = std::fs::read_dir(&fx.paths.backup_dir).unwrap().count();
        assert_eq!(backups, 2);
    }

    #[tokio::test]
    async fn test_cursor_indexes_list_before_removals() {
        let fx = Fixture::new(&["a", "b", "c", "d"], Some("0"));

        let (mut first, first_calls) =
            fx.run(&["k1"], 2, &[("a", Reply::Score(0))], Reply::Score(1));
        first.execute().await.unwrap();
        assert_eq!(*first_calls.lock().unwrap(), vec!["a@k1", "b@k1"]);
        assert_eq!(fx.list(), vec!["b", "c", "d"]);
        assert_eq!(fx.cursor(), 2);

        // "c" shifted to index 1 and waits for the next cycle.
        let (mut second, second_calls) = fx.run(&["k1"], 2, &[], Reply::Score(1));
        second.execute().await.unwrap();
        assert_eq!(*second_calls.lock().unwrap(), vec!["d@k1", "b@k1"]);
        assert_eq!(fx.cursor(), 1);
    }

    #[test]
    fn test_summary_display() {
        let summary = RunSummary {
            examined: 5,
            removed: 2,
            kept: 8,
            indeterminate: 1,
            start_cursor: 0,
            next_cursor: 5,
            backup: PathBuf::from("backups/backup-20240101-000000.txt"),
        };
        let text = summary.to_string();
        assert!(text.starts_with("Examined 5 addresses: removed 2, kept 8"));
        assert!(text.contains("Cursor 0 -> 5"));
    }
}
