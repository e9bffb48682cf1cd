//! One-time environment bootstrap
//!
//! Runs once per test process. On a cache miss it seeds both services in
//! parallel, captures a snapshot artifact from each, and, if this process
//! wins the populator election, copies the artifacts into the host cache.
//! On a cache hit it only primes each instance to accept a restore. Either
//! way, after `run` the [`RestoreOrchestrator`](crate::RestoreOrchestrator)
//! can reset both services before every test case.

use crate::cache::{CacheManifest, SnapshotCache};
use crate::error::{RespawnError, RespawnResult};
use crate::seed::Seeder;
use crate::service::{Role, ServiceInstance, ServiceState};
use crate::snapshot::Snapshot;
use chrono::Utc;
use futures_util::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Everything the bootstrapper needs to drive one role
pub struct ServicePlan {
    pub service: Arc<ServiceInstance>,
    pub seeder: Arc<dyn Seeder>,
    pub snapshot: Arc<dyn Snapshot>,
}

impl ServicePlan {
    pub fn new(
        service: Arc<ServiceInstance>,
        seeder: Arc<dyn Seeder>,
        snapshot: Arc<dyn Snapshot>,
    ) -> Self {
        Self {
            service,
            seeder,
            snapshot,
        }
    }

    pub fn role(&self) -> Role {
        self.service.role()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapState {
    Pending,
    Complete,
}

/// One-shot setup driver: cache hit/miss branch, seeding, population
pub struct EnvironmentBootstrapper {
    cache: SnapshotCache,
    setup_budget: Duration,
    state: BootstrapState,
}

impl EnvironmentBootstrapper {
    pub fn new(cache: SnapshotCache, setup_budget: Duration) -> Self {
        Self {
            cache,
            setup_budget,
            state: BootstrapState::Pending,
        }
    }

    /// The cache this bootstrapper works against
    pub fn cache(&self) -> &SnapshotCache {
        &self.cache
    }

    /// Whether `run` has already completed in this process
    pub fn is_complete(&self) -> bool {
        self.state == BootstrapState::Complete
    }

    /// Run the one-time setup
    ///
    /// Terminal within the process: a second call returns immediately and
    /// never re-seeds. Any seeding, capture, population, or preparation
    /// failure is fatal; no partial environment is usable.
    pub async fn run(&mut self, plans: &[ServicePlan]) -> RespawnResult<()> {
        if self.is_complete() {
            debug!("Bootstrap already complete, skipping");
            return Ok(());
        }

        if self.cache.is_present() {
            info!("Snapshot cache hit at {}", self.cache.dir().display());
            self.prepare_all(plans).await?;
        } else {
            info!(
                "Snapshot cache miss at {}, seeding from scratch",
                self.cache.dir().display()
            );
            self.seed_and_capture(plans).await?;
            self.populate_if_elected(plans).await?;
        }

        self.state = BootstrapState::Complete;
        Ok(())
    }

    /// Miss path: per role, seed then capture, roles in parallel
    async fn seed_and_capture(&self, plans: &[ServicePlan]) -> RespawnResult<()> {
        let tasks: Vec<(Role, JoinHandle<RespawnResult<()>>)> = plans
            .iter()
            .map(|plan| {
                let service = Arc::clone(&plan.service);
                let seeder = Arc::clone(&plan.seeder);
                let snapshot = Arc::clone(&plan.snapshot);
                let role = plan.role();

                let task = tokio::spawn(async move {
                    // Strictly sequential within one role: the snapshot
                    // must see fully seeded state.
                    service.set_state(ServiceState::Seeding);
                    seeder.seed(service.handle().as_ref()).await?;
                    service.set_state(ServiceState::Seeded);
                    snapshot.capture(service.handle().as_ref()).await?;
                    Ok(())
                });
                (role, task)
            })
            .collect();

        self.join_under_budget(tasks).await
    }

    /// Hit path: prime each instance with the cached artifact, in parallel
    async fn prepare_all(&self, plans: &[ServicePlan]) -> RespawnResult<()> {
        // Fail fast on a half-populated cache (populator crashed mid-copy)
        // instead of polling for artifacts that may never arrive.
        let mut artifact_paths: Vec<PathBuf> = Vec::with_capacity(plans.len());
        for plan in plans {
            let path = self.cache.artifact_path(plan.role());
            if !path.exists() {
                return Err(RespawnError::ArtifactMissing {
                    role: plan.role(),
                    path,
                });
            }
            artifact_paths.push(path);
        }

        let tasks: Vec<(Role, JoinHandle<RespawnResult<()>>)> = plans
            .iter()
            .zip(artifact_paths)
            .map(|(plan, artifact_path)| {
                let service = Arc::clone(&plan.service);
                let snapshot = Arc::clone(&plan.snapshot);
                let role = plan.role();

                let task = tokio::spawn(async move {
                    snapshot
                        .prepare(service.handle().as_ref(), &artifact_path)
                        .await?;
                    service.set_state(ServiceState::Seeded);
                    Ok(())
                });
                (role, task)
            })
            .collect();

        self.join_under_budget(tasks).await
    }

    /// Join per-role setup tasks, each bounded by the setup budget
    ///
    /// Unlike per-test restores, exceeding the budget here is fatal: a
    /// half-seeded environment has no consumer.
    async fn join_under_budget(
        &self,
        tasks: Vec<(Role, JoinHandle<RespawnResult<()>>)>,
    ) -> RespawnResult<()> {
        let budget = self.setup_budget;
        let waits = tasks.into_iter().map(|(role, task)| async move {
            match tokio::time::timeout(budget, task).await {
                Err(_) => Err(RespawnError::SetupTimeout {
                    role,
                    budget_secs: budget.as_secs(),
                }),
                Ok(Err(_)) => Err(RespawnError::TaskPanicked { role }),
                Ok(Ok(result)) => result,
            }
        });

        join_all(waits).await.into_iter().collect()
    }

    /// Copy artifacts into the host cache if this process wins the election
    async fn populate_if_elected(&self, plans: &[ServicePlan]) -> RespawnResult<()> {
        let Some(lock) = self.cache.try_become_populator()? else {
            // Expected for all but one of N racing processes.
            info!("Another process is populating the snapshot cache");
            return Ok(());
        };

        let mut artifacts = HashMap::new();
        for plan in plans {
            let record = self
                .cache
                .populate(
                    plan.role(),
                    plan.service.handle().as_ref(),
                    plan.snapshot.instance_path(),
                    &lock,
                )
                .await?;
            artifacts.insert(plan.role(), record);
        }

        self.cache.write_manifest(&CacheManifest {
            created_at: Utc::now(),
            artifacts,
        })?;
        info!("Snapshot cache populated ({} roles)", plans.len());

        // Lock released on drop; the file itself stays behind.
        drop(lock);
        Ok(())
    }
}
