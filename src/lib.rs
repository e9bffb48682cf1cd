//! respawn: snapshot-cached reset harness for containerized
//! integration-test backends
//!
//! Seeding a relational database and a search engine from empty state is
//! the slow part of an integration-test run. respawn pays that cost once:
//! on the first run it seeds both services, captures a snapshot artifact
//! per role, and persists the artifacts to a host-side cache shared across
//! parallel test processes. Every run after that restores both services
//! from the cache, and every test case gets a cheap concurrent reset.
//!
//! The intended driver is a test harness:
//!
//! 1. start the backing containers (out of scope here),
//! 2. call [`EnvironmentBootstrapper::run`] once per test process,
//! 3. call [`RestoreOrchestrator::reset_all`] before each test case.

pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod restore;
pub mod seed;
pub mod service;
pub mod snapshot;

pub use bootstrap::{EnvironmentBootstrapper, ServicePlan};
pub use cache::SnapshotCache;
pub use config::{Config, ConfigManager};
pub use error::{RespawnError, RespawnResult};
pub use restore::{RestoreOrchestrator, RestoreOutcome, RestorePlan, RestoreStatus};
pub use seed::Seeder;
pub use service::{ContainerHandle, ExecOutput, Role, ServiceHandle, ServiceInstance, ServiceState};
pub use snapshot::{DatabaseSnapshot, SearchSnapshot, Snapshot};
