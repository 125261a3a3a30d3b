//! Bootstrap orchestrator
//!
//! Runs the startup stages strictly in order:
//!
//! ```text
//! START → GATE_POLLING → [Ready] → MIGRATING → [MigrationApplied] → DISPATCH → {DEV_SUPERVISED | PROD_DIRECT}
//! ```
//!
//! Each stage's success is the precondition for the next and no stage is
//! re-entered. A failed migration aborts the run before anything is launched.

use std::fmt;
use std::future::Future;
use std::pin::pin;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{BootstrapConfig, RunMode};
use crate::error::BootstrapError;
use crate::launcher::{LaunchPlan, Launcher};
use crate::migration::MigrationStep;
use crate::readiness::{Probe, ProbeOutcome, ReadinessGate, TcpProbe};

/// Position in the forward-only bootstrap state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Start,
    GatePolling,
    Migrating,
    Dispatch,
    DevSupervised,
    ProdDirect,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "START",
            Stage::GatePolling => "GATE_POLLING",
            Stage::Migrating => "MIGRATING",
            Stage::Dispatch => "DISPATCH",
            Stage::DevSupervised => "DEV_SUPERVISED",
            Stage::ProdDirect => "PROD_DIRECT",
        };
        f.write_str(name)
    }
}

/// Transient result of a stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    Ready,
    Unready(String),
    MigrationApplied,
    MigrationFailed(String),
}

impl From<ProbeOutcome> for BootstrapOutcome {
    fn from(outcome: ProbeOutcome) -> Self {
        match outcome {
            ProbeOutcome::Ready => BootstrapOutcome::Ready,
            ProbeOutcome::Unready(reason) => BootstrapOutcome::Unready(reason),
        }
    }
}

/// Records the path taken through the state machine
#[derive(Debug, Clone)]
pub struct StageTracker {
    trail: Vec<Stage>,
    outcomes: Vec<BootstrapOutcome>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            trail: vec![Stage::Start],
            outcomes: Vec::new(),
        }
    }

    pub fn current(&self) -> Stage {
        self.trail.last().copied().unwrap_or(Stage::Start)
    }

    pub fn trail(&self) -> &[Stage] {
        &self.trail
    }

    pub fn outcomes(&self) -> &[BootstrapOutcome] {
        &self.outcomes
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.current(), "stage {} re-entered", next);
        debug!("Stage {} -> {}", self.current(), next);
        self.trail.push(next);
    }

    fn record(&mut self, outcome: BootstrapOutcome) {
        debug!("Stage {} outcome: {:?}", self.current(), outcome);
        self.outcomes.push(outcome);
    }
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Wires the gate, the migration step and the launcher together
pub struct Bootstrap<P, M, L> {
    run_mode: RunMode,
    plan: LaunchPlan,
    gate: ReadinessGate,
    probe: P,
    kafka: Option<(ReadinessGate, TcpProbe)>,
    migration: M,
    launcher: L,
}

impl<P, M, L> Bootstrap<P, M, L>
where
    P: Probe,
    M: MigrationStep,
    L: Launcher,
{
    /// Reads the run mode once and fixes the launch plan for this run
    pub fn new(config: &BootstrapConfig, probe: P, migration: M, launcher: L) -> Self {
        let kafka = config.kafka.enabled.then(|| {
            (
                ReadinessGate::new(Duration::from_secs(config.kafka.retry_interval_secs)),
                TcpProbe::new(
                    "Kafka",
                    config.kafka.bootstrap_servers.clone(),
                    config.readiness.connect_timeout(),
                ),
            )
        });

        Self {
            run_mode: config.run_mode,
            plan: LaunchPlan::for_mode(config.run_mode, config),
            gate: ReadinessGate::new(config.readiness.retry_interval()),
            probe,
            kafka,
            migration,
            launcher,
        }
    }

    pub fn plan(&self) -> &LaunchPlan {
        &self.plan
    }

    /// Full bootstrap: gate, migrate, dispatch
    pub async fn run(&self) -> Result<i32, BootstrapError> {
        self.run_until(&mut StageTracker::new(), std::future::pending())
            .await
    }

    /// Full bootstrap, cut short when `shutdown` resolves to a signal number
    /// before dispatch. `shutdown` is dropped before the service starts.
    pub async fn run_until<F>(
        &self,
        tracker: &mut StageTracker,
        shutdown: F,
    ) -> Result<i32, BootstrapError>
    where
        F: Future<Output = i32>,
    {
        info!("=== Service Bootstrap ({}) ===", self.run_mode);

        self.prepare(tracker, shutdown).await?;
        self.dispatch(tracker).await
    }

    /// Gate then migrate, without starting the service
    pub async fn run_migrations<F>(&self, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = i32>,
    {
        self.prepare(&mut StageTracker::new(), shutdown).await
    }

    async fn prepare<F>(&self, tracker: &mut StageTracker, shutdown: F) -> Result<(), BootstrapError>
    where
        F: Future<Output = i32>,
    {
        let mut shutdown = pin!(shutdown);
        self.wait_ready(tracker, shutdown.as_mut()).await?;
        self.migrate(tracker, shutdown).await
    }

    /// Stage 1: block until every enabled dependency is reachable, or until
    /// `shutdown` fires
    pub async fn wait_ready<S>(
        &self,
        tracker: &mut StageTracker,
        mut shutdown: S,
    ) -> Result<(), BootstrapError>
    where
        S: Future<Output = i32> + Unpin,
    {
        tracker.advance(Stage::GatePolling);

        let gates = async {
            info!("1. Waiting for {}...", self.probe.name());
            self.gate
                .wait_observed(&self.probe, |outcome| {
                    tracker.record(BootstrapOutcome::from(outcome.clone()))
                })
                .await;

            match &self.kafka {
                Some((gate, probe)) => {
                    info!("1b. Waiting for {}...", probe.name());
                    gate.wait_observed(probe, |outcome| {
                        tracker.record(BootstrapOutcome::from(outcome.clone()))
                    })
                    .await;
                }
                None => debug!("Kafka readiness gate disabled"),
            }
        };

        tokio::select! {
            () = gates => Ok(()),
            signal = &mut shutdown => {
                warn!("Received signal {} while waiting for dependencies - exiting", signal);
                Err(BootstrapError::Interrupted { signal })
            }
        }
    }

    /// Stage 2: apply migrations exactly once. Failure is fatal. A signal
    /// from `shutdown` is passed on to the migration before giving up.
    pub async fn migrate<S>(
        &self,
        tracker: &mut StageTracker,
        mut shutdown: S,
    ) -> Result<(), BootstrapError>
    where
        S: Future<Output = i32> + Unpin,
    {
        debug_assert_eq!(tracker.outcomes().last(), Some(&BootstrapOutcome::Ready));
        tracker.advance(Stage::Migrating);

        info!("2. Applying migrations: {}", self.migration.describe());
        let mut apply = pin!(self.migration.apply());

        let result = tokio::select! {
            result = &mut apply => result,
            signal = &mut shutdown => {
                self.migration.interrupt(signal);
                if let Err(e) = apply.await {
                    debug!("Interrupted migration ended: {}", e);
                }
                error!("✗ Migration interrupted by signal {}, aborting bootstrap", signal);
                tracker.record(BootstrapOutcome::MigrationFailed(format!(
                    "interrupted by signal {}",
                    signal
                )));
                return Err(BootstrapError::Interrupted { signal });
            }
        };

        match result {
            Ok(()) => {
                info!("✓ Migrations applied");
                tracker.record(BootstrapOutcome::MigrationApplied);
                Ok(())
            }
            Err(e) => {
                error!("✗ Migration failed, aborting bootstrap: {}", e);
                tracker.record(BootstrapOutcome::MigrationFailed(e.to_string()));
                Err(BootstrapError::Migration(e))
            }
        }
    }

    /// Stage 3: hand off to the service process
    pub async fn dispatch(&self, tracker: &mut StageTracker) -> Result<i32, BootstrapError> {
        debug_assert_eq!(
            tracker.outcomes().last(),
            Some(&BootstrapOutcome::MigrationApplied)
        );
        tracker.advance(Stage::Dispatch);

        let (terminal, description) = match self.run_mode {
            RunMode::Dev => (Stage::DevSupervised, "supervised, restart on change"),
            RunMode::Prod => (Stage::ProdDirect, "replacing bootstrap process"),
        };
        info!(
            "3. Starting service ({}, {}): {}",
            self.run_mode,
            description,
            self.plan.command()
        );
        tracker.advance(terminal);

        let code = self.launcher.launch(self.plan.clone()).await.map_err(|e| {
            error!("✗ Failed to start service: {}", e);
            BootstrapError::Dispatch(e)
        })?;
        Ok(code)
    }
}
