//! Integration tests for respawn
//!
//! Everything runs against in-memory mock service handles; no containers
//! are involved. The mocks record every command so tests can assert on the
//! sequences the bootstrapper and orchestrator issue.

mod support {
    use async_trait::async_trait;
    use respawn::error::RespawnResult;
    use respawn::service::{ExecOutput, Role, ServiceHandle};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Mutex, Once};
    use std::time::Duration;
    use tracing_subscriber::EnvFilter;

    static LOGGING: Once = Once::new();

    /// Install the log subscriber, honoring `RUST_LOG` when set. Later
    /// calls are no-ops, so every test can call this unconditionally.
    pub fn init_logging() {
        LOGGING.call_once(|| {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("respawn=debug")),
                )
                .with_test_writer()
                .init();
        });
    }

    /// In-memory service instance: records commands, simulates a tiny
    /// filesystem for the copy operations, and can inject latency or
    /// failures.
    pub struct MockHandle {
        role: Role,
        log: Mutex<Vec<String>>,
        files: Mutex<HashMap<String, Vec<u8>>>,
        fail_on: Option<String>,
        delay: Option<Duration>,
        completed: AtomicUsize,
    }

    impl MockHandle {
        pub fn new(role: Role) -> Self {
            Self {
                role,
                log: Mutex::new(Vec::new()),
                files: Mutex::new(HashMap::new()),
                fail_on: None,
                delay: None,
                completed: AtomicUsize::new(0),
            }
        }

        /// Commands containing `needle` exit non-zero
        pub fn failing_on(mut self, needle: &str) -> Self {
            self.fail_on = Some(needle.to_string());
            self
        }

        /// Every executed command takes this long
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn log(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }

        pub fn log_matching(&self, needle: &str) -> usize {
            self.log()
                .iter()
                .filter(|line| line.contains(needle))
                .count()
        }

        /// Number of commands that ran to completion (past any delay)
        pub fn completed(&self) -> usize {
            self.completed.load(Ordering::SeqCst)
        }

        pub fn has_file(&self, instance_path: &str) -> bool {
            self.files.lock().unwrap().contains_key(instance_path)
        }
    }

    #[async_trait]
    impl ServiceHandle for MockHandle {
        fn role(&self) -> Role {
            self.role
        }

        async fn execute(&self, cmd: &[String]) -> RespawnResult<ExecOutput> {
            let line = cmd.join(" ");
            self.log.lock().unwrap().push(line.clone());

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.completed.fetch_add(1, Ordering::SeqCst);

            if let Some(ref needle) = self.fail_on {
                if line.contains(needle.as_str()) {
                    return Ok(ExecOutput {
                        exit_code: 1,
                        stdout: String::new(),
                        stderr: format!("induced failure: {}", needle),
                    });
                }
            }

            // Commands that produce an artifact file leave a trace in the
            // simulated filesystem so copy-out has something to move.
            if line.starts_with("mysqldump") || line.contains("tar -cf") {
                if let Some(pos) = cmd.iter().position(|a| a == "-r" || a == "-cf") {
                    self.files
                        .lock()
                        .unwrap()
                        .insert(cmd[pos + 1].clone(), b"mock artifact".to_vec());
                }
            }

            Ok(ExecOutput {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn copy_file_in(&self, host_path: &Path, instance_path: &str) -> RespawnResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("cp-in {}", instance_path));
            let bytes = tokio::fs::read(host_path)
                .await
                .map_err(|e| respawn::RespawnError::io("mock copy in", e))?;
            self.files
                .lock()
                .unwrap()
                .insert(instance_path.to_string(), bytes);
            Ok(())
        }

        async fn copy_file_out(&self, instance_path: &str, host_path: &Path) -> RespawnResult<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("cp-out {}", instance_path));
            let bytes = self
                .files
                .lock()
                .unwrap()
                .get(instance_path)
                .cloned()
                .unwrap_or_else(|| b"mock artifact".to_vec());
            tokio::fs::write(host_path, bytes)
                .await
                .map_err(|e| respawn::RespawnError::io("mock copy out", e))?;
            Ok(())
        }
    }

    /// Seeder that counts invocations and issues one marker command
    pub struct CountingSeeder {
        calls: AtomicUsize,
    }

    impl CountingSeeder {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }

        pub fn count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl respawn::Seeder for CountingSeeder {
        async fn seed(&self, handle: &dyn ServiceHandle) -> RespawnResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            handle
                .execute(&["seed-marker".to_string()])
                .await?
                .require_success(handle.role(), "seed-marker")?;
            Ok(())
        }
    }
}

mod cache_tests {
    use respawn::SnapshotCache;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use tempfile::TempDir;

    #[test]
    fn exactly_one_populator_among_racers() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().to_path_buf();
        let racers = 8;
        let barrier = Arc::new(Barrier::new(racers));

        let threads: Vec<_> = (0..racers)
            .map(|_| {
                let dir = dir.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let cache = SnapshotCache::new(dir);
                    barrier.wait();
                    let lock = cache.try_become_populator().unwrap();
                    let won = lock.is_some();
                    // Hold until every racer has tried, so no one can win
                    // by acquiring after a release.
                    barrier.wait();
                    won
                })
            })
            .collect();

        let winners: usize = threads
            .into_iter()
            .map(|t| usize::from(t.join().unwrap()))
            .sum();

        assert_eq!(winners, 1);
    }

    #[test]
    fn stray_file_counts_as_present() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("leftover.tmp"), "x").unwrap();

        let cache = SnapshotCache::new(temp.path().to_path_buf());
        assert!(cache.is_present());
    }

    #[test]
    fn artifact_paths_are_role_named() {
        let temp = TempDir::new().unwrap();
        let cache = SnapshotCache::new(temp.path().to_path_buf());

        assert!(cache
            .artifact_path(respawn::Role::Database)
            .ends_with("database.sql"));
        assert!(cache
            .artifact_path(respawn::Role::Search)
            .ends_with("search.tar"));
    }
}

mod config_tests {
    //! A saved config file must drive every knob it declares: cache
    //! location, container CLI, and restore budgets.

    use respawn::{ConfigManager, ContainerHandle, Role, SnapshotCache};
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn loaded_config_drives_cache_cli_and_budgets() {
        let temp = TempDir::new().unwrap();
        let config_path = temp.path().join("config.toml");
        let cache_dir = temp.path().join("snapshots");

        let toml = format!(
            "[cache]\ndir = \"{}\"\n\n\
             [container]\ncli_bin = \"podman\"\n\n\
             [budgets]\ndatabase_restore_secs = 9\n",
            cache_dir.display()
        );
        tokio::fs::write(&config_path, toml).await.unwrap();

        let config = ConfigManager::with_path(config_path).load().await.unwrap();

        let cache = SnapshotCache::from_config(&config);
        assert_eq!(cache.dir(), cache_dir);

        let handle = ContainerHandle::from_config(Role::Database, "abc123", &config.container);
        assert_eq!(handle.cli_bin(), "podman");

        assert_eq!(config.budgets.restore(Role::Database), Duration::from_secs(9));
        // Unset key keeps its default.
        assert_eq!(config.budgets.restore(Role::Search), Duration::from_secs(3));
    }
}

mod bootstrap_tests {
    use crate::support::{CountingSeeder, MockHandle};
    use respawn::seed::database::DbCredentials;
    use respawn::seed::search::SearchCredentials;
    use respawn::snapshot::{DATABASE_DUMP_PATH, SEARCH_ARCHIVE_PATH};
    use respawn::{
        DatabaseSnapshot, EnvironmentBootstrapper, RespawnError, Role, SearchSnapshot,
        ServiceInstance, ServicePlan, SnapshotCache,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn db_creds() -> DbCredentials {
        DbCredentials::new("test", "test", "employees")
    }

    struct Fixture {
        db: Arc<MockHandle>,
        es: Arc<MockHandle>,
        db_seeder: Arc<CountingSeeder>,
        es_seeder: Arc<CountingSeeder>,
        plans: Vec<ServicePlan>,
    }

    fn fixture() -> Fixture {
        fixture_with(
            MockHandle::new(Role::Database),
            MockHandle::new(Role::Search),
        )
    }

    fn fixture_with(db: MockHandle, es: MockHandle) -> Fixture {
        let db = Arc::new(db);
        let es = Arc::new(es);
        let db_seeder = Arc::new(CountingSeeder::new());
        let es_seeder = Arc::new(CountingSeeder::new());

        let plans = vec![
            ServicePlan::new(
                Arc::new(ServiceInstance::new(db.clone())),
                db_seeder.clone(),
                Arc::new(DatabaseSnapshot::new(db_creds())),
            ),
            ServicePlan::new(
                Arc::new(ServiceInstance::new(es.clone())),
                es_seeder.clone(),
                Arc::new(SearchSnapshot::new(
                    SearchCredentials::default(),
                    vec!["employees".to_string()],
                )),
            ),
        ];

        Fixture {
            db,
            es,
            db_seeder,
            es_seeder,
            plans,
        }
    }

    fn bootstrapper(temp: &TempDir) -> EnvironmentBootstrapper {
        EnvironmentBootstrapper::new(
            SnapshotCache::new(temp.path().to_path_buf()),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn miss_path_seeds_captures_and_populates() {
        crate::support::init_logging();
        let temp = TempDir::new().unwrap();
        let fx = fixture();
        let mut boot = bootstrapper(&temp);

        boot.run(&fx.plans).await.unwrap();

        assert_eq!(fx.db_seeder.count(), 1);
        assert_eq!(fx.es_seeder.count(), 1);

        // Capture ran after seeding, per role.
        assert_eq!(fx.db.log_matching("mysqldump"), 1);
        assert_eq!(fx.es.log_matching("_snapshot/"), 2); // register + snapshot
        assert_eq!(fx.es.log_matching("tar -cf"), 1);

        // Both artifacts landed in the cache, plus lock file and manifest.
        assert!(temp.path().join("database.sql").exists());
        assert!(temp.path().join("search.tar").exists());
        assert!(temp.path().join("cache.lock").exists());
        assert!(boot.cache().is_present());

        let manifest = boot.cache().load_manifest().unwrap().unwrap();
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts[&Role::Database].file, "database.sql");
        assert_eq!(manifest.artifacts[&Role::Search].sha256.len(), 64);
    }

    #[tokio::test]
    async fn hit_path_never_seeds() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("database.sql"), "DROP DATABASE x;").unwrap();
        std::fs::write(temp.path().join("search.tar"), "tar bytes").unwrap();

        let fx = fixture();
        let mut boot = bootstrapper(&temp);
        boot.run(&fx.plans).await.unwrap();

        assert_eq!(fx.db_seeder.count(), 0);
        assert_eq!(fx.es_seeder.count(), 0);

        // Each instance was primed with its cached artifact: copied in,
        // unpacked into the repository dir, repository registered.
        assert!(fx.db.has_file(DATABASE_DUMP_PATH));
        assert!(fx.es.has_file(SEARCH_ARCHIVE_PATH));
        assert_eq!(fx.es.log_matching(&format!("tar -xf {}", SEARCH_ARCHIVE_PATH)), 1);
        assert_eq!(fx.es.log_matching("_snapshot/"), 1); // register only
    }

    #[tokio::test]
    async fn run_is_terminal_within_process() {
        let temp = TempDir::new().unwrap();
        let fx = fixture();
        let mut boot = bootstrapper(&temp);

        boot.run(&fx.plans).await.unwrap();
        assert!(boot.is_complete());
        boot.run(&fx.plans).await.unwrap();

        // Second run never re-seeds, even though the first was a miss.
        assert_eq!(fx.db_seeder.count(), 1);
        assert_eq!(fx.es_seeder.count(), 1);
    }

    #[tokio::test]
    async fn half_populated_cache_fails_fast() {
        let temp = TempDir::new().unwrap();
        // Populator crashed after the database artifact, before search.
        std::fs::write(temp.path().join("database.sql"), "DROP DATABASE x;").unwrap();

        let fx = fixture();
        let mut boot = bootstrapper(&temp);
        let err = boot.run(&fx.plans).await.unwrap_err();

        match err {
            RespawnError::ArtifactMissing { role, path } => {
                assert_eq!(role, Role::Search);
                assert!(path.ends_with("search.tar"));
            }
            other => panic!("expected ArtifactMissing, got {other}"),
        }
        assert!(!boot.is_complete());
        assert_eq!(fx.db_seeder.count(), 0);
    }

    #[tokio::test]
    async fn seed_failure_aborts_setup() {
        let temp = TempDir::new().unwrap();
        let fx = fixture_with(
            MockHandle::new(Role::Database).failing_on("seed-marker"),
            MockHandle::new(Role::Search),
        );

        let mut boot = bootstrapper(&temp);
        let err = boot.run(&fx.plans).await.unwrap_err();

        assert_eq!(err.role(), Some(Role::Database));
        assert!(err.is_setup_fatal());
        // Nothing was copied into the cache.
        assert!(!boot.cache().is_present());
    }

    #[tokio::test]
    async fn capture_failure_aborts_setup() {
        let temp = TempDir::new().unwrap();
        let fx = fixture_with(
            MockHandle::new(Role::Database).failing_on("mysqldump"),
            MockHandle::new(Role::Search),
        );

        let mut boot = bootstrapper(&temp);
        let err = boot.run(&fx.plans).await.unwrap_err();

        assert!(matches!(err, RespawnError::Capture { role: Role::Database, .. }));
        assert!(!boot.cache().is_present());
    }

    #[tokio::test]
    async fn setup_budget_overrun_is_fatal() {
        let temp = TempDir::new().unwrap();
        let fx = fixture_with(
            MockHandle::new(Role::Database).with_delay(Duration::from_millis(200)),
            MockHandle::new(Role::Search),
        );

        let mut boot = EnvironmentBootstrapper::new(
            SnapshotCache::new(temp.path().to_path_buf()),
            Duration::from_millis(50),
        );
        let err = boot.run(&fx.plans).await.unwrap_err();

        assert!(matches!(
            err,
            RespawnError::SetupTimeout { role: Role::Database, .. }
        ));
    }
}

mod restore_tests {
    use crate::support::MockHandle;
    use respawn::seed::database::DbCredentials;
    use respawn::seed::search::SearchCredentials;
    use respawn::snapshot::DATABASE_DUMP_PATH;
    use respawn::{
        DatabaseSnapshot, RespawnError, RestoreOrchestrator, RestorePlan, RestoreStatus, Role,
        SearchSnapshot, ServiceInstance, ServiceState, Snapshot,
    };
    use std::sync::Arc;
    use std::time::{Duration, Instant};

    fn db_snapshot() -> Arc<dyn Snapshot> {
        Arc::new(DatabaseSnapshot::new(DbCredentials::new(
            "test",
            "test",
            "employees",
        )))
    }

    fn search_snapshot() -> Arc<dyn Snapshot> {
        Arc::new(SearchSnapshot::new(
            SearchCredentials::default(),
            vec!["employees".to_string()],
        ))
    }

    #[tokio::test]
    async fn reset_all_restores_both_roles() {
        let db = Arc::new(MockHandle::new(Role::Database));
        let es = Arc::new(MockHandle::new(Role::Search));
        let db_instance = Arc::new(ServiceInstance::new(db.clone()));
        let es_instance = Arc::new(ServiceInstance::new(es.clone()));

        let orchestrator = RestoreOrchestrator::new(vec![
            RestorePlan::new(db_instance.clone(), db_snapshot(), Duration::from_secs(5)),
            RestorePlan::new(es_instance.clone(), search_snapshot(), Duration::from_secs(3)),
        ]);

        let outcomes = orchestrator.reset_all().await.unwrap();

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes
            .iter()
            .all(|o| o.status == RestoreStatus::Completed));

        // Database replays the dump; search clears then restores.
        assert_eq!(db.log_matching(DATABASE_DUMP_PATH), 1);
        assert_eq!(es.log_matching("DELETE"), 1);
        assert_eq!(es.log_matching("_restore"), 1);

        assert_eq!(db_instance.state(), ServiceState::Reset);
        assert_eq!(es_instance.state(), ServiceState::Reset);
    }

    #[tokio::test]
    async fn repeated_resets_replay_each_time() {
        let db = Arc::new(MockHandle::new(Role::Database));
        let orchestrator = RestoreOrchestrator::new(vec![RestorePlan::new(
            Arc::new(ServiceInstance::new(db.clone())),
            db_snapshot(),
            Duration::from_secs(5),
        )]);

        for _ in 0..3 {
            orchestrator.reset_all().await.unwrap();
        }

        assert_eq!(db.log_matching(DATABASE_DUMP_PATH), 3);
    }

    #[tokio::test]
    async fn timeout_is_an_outcome_not_an_error() {
        crate::support::init_logging();
        let slow_db = Arc::new(
            MockHandle::new(Role::Database).with_delay(Duration::from_millis(300)),
        );
        let es = Arc::new(MockHandle::new(Role::Search));

        let orchestrator = RestoreOrchestrator::new(vec![
            RestorePlan::new(
                Arc::new(ServiceInstance::new(slow_db.clone())),
                db_snapshot(),
                Duration::from_millis(50),
            ),
            RestorePlan::new(
                Arc::new(ServiceInstance::new(es.clone())),
                search_snapshot(),
                Duration::from_secs(5),
            ),
        ]);

        let started = Instant::now();
        let outcomes = orchestrator.reset_all().await.unwrap();
        let elapsed = started.elapsed();

        let db_outcome = outcomes.iter().find(|o| o.role == Role::Database).unwrap();
        let es_outcome = outcomes.iter().find(|o| o.role == Role::Search).unwrap();
        assert_eq!(db_outcome.status, RestoreStatus::TimedOut);
        assert_eq!(es_outcome.status, RestoreStatus::Completed);

        // Returned within the slow role's budget plus epsilon, well under
        // the 300ms the restore actually needs.
        assert!(elapsed < Duration::from_millis(250), "took {elapsed:?}");

        // The overrunning restore was not cancelled: give it time to
        // finish in the background.
        assert_eq!(slow_db.completed(), 0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(slow_db.completed(), 1);
    }

    #[tokio::test]
    async fn restore_failure_propagates() {
        let db = Arc::new(MockHandle::new(Role::Database).failing_on(DATABASE_DUMP_PATH));
        let orchestrator = RestoreOrchestrator::new(vec![RestorePlan::new(
            Arc::new(ServiceInstance::new(db)),
            db_snapshot(),
            Duration::from_secs(5),
        )]);

        let err = orchestrator.reset_all().await.unwrap_err();
        assert!(matches!(err, RespawnError::Restore { role: Role::Database, .. }));
        assert!(!err.is_setup_fatal());
    }
}

mod lifecycle_tests {
    //! The full scenario: miss, populate, then repeated resets; followed by
    //! a second "process" hitting the populated cache.

    use crate::support::{CountingSeeder, MockHandle};
    use respawn::seed::database::DbCredentials;
    use respawn::seed::search::SearchCredentials;
    use respawn::snapshot::DATABASE_DUMP_PATH;
    use respawn::{
        DatabaseSnapshot, EnvironmentBootstrapper, RestoreOrchestrator, RestorePlan, Role,
        SearchSnapshot, ServiceInstance, ServicePlan, SnapshotCache,
    };
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn seed_once_reset_many() {
        crate::support::init_logging();
        let temp = TempDir::new().unwrap();

        let db = Arc::new(MockHandle::new(Role::Database));
        let es = Arc::new(MockHandle::new(Role::Search));
        let db_instance = Arc::new(ServiceInstance::new(db.clone()));
        let es_instance = Arc::new(ServiceInstance::new(es.clone()));
        let db_snapshot = Arc::new(DatabaseSnapshot::new(DbCredentials::new(
            "test",
            "test",
            "employees",
        )));
        let es_snapshot = Arc::new(SearchSnapshot::new(
            SearchCredentials::default(),
            vec!["employees".to_string()],
        ));
        let seeder = Arc::new(CountingSeeder::new());

        let plans = vec![
            ServicePlan::new(db_instance.clone(), seeder.clone(), db_snapshot.clone()),
            ServicePlan::new(es_instance.clone(), seeder.clone(), es_snapshot.clone()),
        ];

        let mut boot = EnvironmentBootstrapper::new(
            SnapshotCache::new(temp.path().to_path_buf()),
            Duration::from_secs(30),
        );
        boot.run(&plans).await.unwrap();
        assert_eq!(seeder.count(), 2); // once per role

        let orchestrator = RestoreOrchestrator::new(vec![
            RestorePlan::new(db_instance, db_snapshot.clone(), Duration::from_secs(5)),
            RestorePlan::new(es_instance, es_snapshot.clone(), Duration::from_secs(3)),
        ]);
        for _ in 0..3 {
            orchestrator.reset_all().await.unwrap();
        }
        assert_eq!(db.log_matching(DATABASE_DUMP_PATH), 3);
        assert_eq!(es.log_matching("_restore"), 3);

        // A fresh process against the now-populated cache: hit path only.
        let db2 = Arc::new(MockHandle::new(Role::Database));
        let es2 = Arc::new(MockHandle::new(Role::Search));
        let seeder2 = Arc::new(CountingSeeder::new());
        let plans2 = vec![
            ServicePlan::new(
                Arc::new(ServiceInstance::new(db2.clone())),
                seeder2.clone(),
                db_snapshot,
            ),
            ServicePlan::new(
                Arc::new(ServiceInstance::new(es2.clone())),
                seeder2.clone(),
                es_snapshot,
            ),
        ];
        let mut boot2 = EnvironmentBootstrapper::new(
            SnapshotCache::new(temp.path().to_path_buf()),
            Duration::from_secs(30),
        );
        boot2.run(&plans2).await.unwrap();

        assert_eq!(seeder2.count(), 0);
        assert!(db2.has_file(DATABASE_DUMP_PATH));
    }
}
