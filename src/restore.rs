//! Per-test-case restore orchestration
//!
//! Before every test case both services are reset from their in-instance
//! artifacts, concurrently, each wait bounded by its own budget. A budget
//! overrun is a distinguished outcome, not an error: the orchestrator stops
//! waiting but never cancels the underlying restore, trading a small risk
//! of stale state for not paying synchronous waits on every test.

use crate::config::BudgetConfig;
use crate::error::{RespawnError, RespawnResult};
use crate::service::{Role, ServiceInstance, ServiceState};
use crate::snapshot::Snapshot;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// One role's restore recipe and wait budget
pub struct RestorePlan {
    pub service: Arc<ServiceInstance>,
    pub snapshot: Arc<dyn Snapshot>,
    pub budget: Duration,
}

impl RestorePlan {
    pub fn new(
        service: Arc<ServiceInstance>,
        snapshot: Arc<dyn Snapshot>,
        budget: Duration,
    ) -> Self {
        Self {
            service,
            snapshot,
            budget,
        }
    }

    /// Plan with the configured budget for the service's role
    pub fn with_budgets(
        service: Arc<ServiceInstance>,
        snapshot: Arc<dyn Snapshot>,
        budgets: &BudgetConfig,
    ) -> Self {
        let budget = budgets.restore(service.role());
        Self::new(service, snapshot, budget)
    }

    pub fn role(&self) -> Role {
        self.service.role()
    }
}

/// How one role's restore concluded from the orchestrator's viewpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStatus {
    /// Restore command finished within the budget
    Completed,
    /// Budget expired; the restore keeps running unobserved
    TimedOut,
}

/// Per-role result of a [`RestoreOrchestrator::reset_all`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOutcome {
    pub role: Role,
    pub status: RestoreStatus,
}

/// Drives the per-test reset of all services
pub struct RestoreOrchestrator {
    plans: Vec<RestorePlan>,
}

impl RestoreOrchestrator {
    pub fn new(plans: Vec<RestorePlan>) -> Self {
        Self { plans }
    }

    /// Reset every service from its cached artifact
    ///
    /// All restores are issued before any waiting starts; there is no
    /// cross-role ordering. Returns one outcome per role. A restore
    /// *failure* (non-zero exit, I/O error) propagates as an error; a
    /// budget overrun does not.
    pub async fn reset_all(&self) -> RespawnResult<Vec<RestoreOutcome>> {
        let tasks: Vec<_> = self
            .plans
            .iter()
            .map(|plan| {
                let service = Arc::clone(&plan.service);
                let snapshot = Arc::clone(&plan.snapshot);
                let role = plan.role();
                debug!("Issuing {} restore", role);

                // State transitions happen inside the task: after a
                // timeout the task may still be running, and it alone owns
                // the instance's sequence of calls.
                let task = tokio::spawn(async move {
                    service.set_state(ServiceState::Restoring);
                    snapshot.restore(service.handle().as_ref()).await?;
                    service.set_state(ServiceState::Reset);
                    Ok::<(), RespawnError>(())
                });
                (role, plan.budget, task)
            })
            .collect();

        let waits = tasks.into_iter().map(|(role, budget, task)| async move {
            match tokio::time::timeout(budget, task).await {
                Err(_) => {
                    // Dropping the join handle leaves the task running;
                    // the operation is expected to finish before the next
                    // use of the instance.
                    warn!(
                        "{} restore exceeded its {:?} budget, proceeding without it",
                        role, budget
                    );
                    Ok(RestoreOutcome {
                        role,
                        status: RestoreStatus::TimedOut,
                    })
                }
                Ok(Err(_)) => Err(RespawnError::TaskPanicked { role }),
                Ok(Ok(Err(e))) => Err(e),
                Ok(Ok(Ok(()))) => Ok(RestoreOutcome {
                    role,
                    status: RestoreStatus::Completed,
                }),
            }
        });

        join_all(waits).await.into_iter().collect()
    }
}
