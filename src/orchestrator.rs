//! Runs `hidpi.sh` operations and owns the state they produce.
//!
//! Every operation records a "started" activity entry before the script is
//! launched, runs the script on its own tokio task, then records exactly one
//! terminal entry. The outcome depends only on whether the script could be
//! launched and waited on; its exit status and stderr do not change it.
//!
//! Operations have **no timeout and no cancellation**. Dropping an
//! [`OperationHandle`] detaches it; the script keeps running and its result is
//! still applied when it exits. A script that never exits leaves its
//! operation pending for the life of the process.

use crate::display::DisplayConfiguration;
use crate::metrics::{now_unix, Metrics};
use crate::script::{ScriptError, ScriptInvocation, ScriptMode, ScriptOutput, ScriptRunner};
use crate::state::{
    parse_system_info, ActivityRecord, Severity, State, HIDPI_CONFIGURED, HIDPI_NOT_CONFIGURED,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const ICON_SUCCEEDED: &str = "checkmark.circle.fill";
const ICON_FAILED: &str = "xmark.circle.fill";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    LoadSystemInfo,
    AutoConfigure,
    RunDiagnostics,
    ApplyConfiguration,
    ResetConfiguration,
    ManualSetup,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::LoadSystemInfo => "load_system_info",
            Operation::AutoConfigure => "auto_configure",
            Operation::RunDiagnostics => "run_diagnostics",
            Operation::ApplyConfiguration => "apply_configuration",
            Operation::ResetConfiguration => "reset_configuration",
            Operation::ManualSetup => "manual_setup",
        }
    }

    fn title(self) -> &'static str {
        match self {
            Operation::LoadSystemInfo => "System Info",
            Operation::AutoConfigure => "Auto Configuration",
            Operation::RunDiagnostics => "Diagnostics",
            Operation::ApplyConfiguration => "Configuration",
            Operation::ResetConfiguration => "Reset",
            Operation::ManualSetup => "Manual Setup",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Operation::LoadSystemInfo => "info.circle",
            Operation::AutoConfigure => "wand.and.stars",
            Operation::RunDiagnostics => "stethoscope",
            Operation::ApplyConfiguration => "gear",
            Operation::ResetConfiguration => "arrow.clockwise",
            Operation::ManualSetup => "slider.horizontal.3",
        }
    }

    fn started_severity(self) -> Severity {
        match self {
            Operation::ResetConfiguration | Operation::ManualSetup => Severity::Warning,
            _ => Severity::Info,
        }
    }

    fn started_text(self) -> &'static str {
        match self {
            Operation::LoadSystemInfo => "Loading system information...",
            Operation::AutoConfigure => "Starting automatic configuration...",
            Operation::RunDiagnostics => "Running system diagnostics...",
            Operation::ApplyConfiguration => "Applying configuration...",
            Operation::ResetConfiguration => "Resetting configuration...",
            Operation::ManualSetup => "Opening manual configuration...",
        }
    }
}

/// Descriptions for the terminal entry of a script-backed operation.
#[derive(Debug, Clone, Copy)]
struct Finish {
    succeeded: &'static str,
    failed: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Succeeded,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
        }
    }
}

/// Background task of one operation. Not cancellable; see the module docs.
#[derive(Debug)]
pub struct OperationHandle {
    operation: Operation,
    task: JoinHandle<Outcome>,
}

impl OperationHandle {
    pub fn operation(&self) -> Operation {
        self.operation
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the terminal activity entry has been recorded.
    pub async fn wait(self) -> Outcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(operation = self.operation.as_str(), error = %err, "operation task aborted");
                Outcome::Failed
            }
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    runner: Arc<dyn ScriptRunner>,
    state: Arc<RwLock<State>>,
    metrics: Arc<Metrics>,
    changes: Arc<watch::Sender<u64>>,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ScriptRunner>, metrics: Arc<Metrics>, now_unix: i64) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            runner,
            state: Arc::new(RwLock::new(State::new(now_unix))),
            metrics,
            changes: Arc::new(changes),
        }
    }

    /// Detached copy of the current state. Writes go through the orchestrator
    /// only.
    pub async fn snapshot(&self) -> State {
        self.state.read().await.clone()
    }

    /// Carries [`State::revision`], published while the write lock is held.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Waits until the state revision exceeds `revision` or `limit` elapses,
    /// then returns a snapshot.
    pub async fn snapshot_after(&self, revision: u64, limit: Duration) -> State {
        let mut changes = self.subscribe();
        let timed_out = tokio::time::timeout(limit, changes.wait_for(|rev| *rev > revision))
            .await
            .is_err();
        if timed_out {
            debug!(revision, "no state change before long-poll limit");
        }
        self.snapshot().await
    }

    pub async fn load_system_info(&self) -> OperationHandle {
        self.launch(
            Operation::LoadSystemInfo,
            ScriptInvocation::new(ScriptMode::Info),
            Finish {
                succeeded: "System information loaded",
                failed: "Failed to load system information",
            },
        )
        .await
    }

    pub async fn auto_configure(&self) -> OperationHandle {
        self.launch(
            Operation::AutoConfigure,
            ScriptInvocation::new(ScriptMode::Auto),
            Finish {
                succeeded: "Configuration completed successfully",
                failed: "Configuration failed",
            },
        )
        .await
    }

    pub async fn run_diagnostics(&self) -> OperationHandle {
        self.launch(
            Operation::RunDiagnostics,
            ScriptInvocation::new(ScriptMode::Diagnostics),
            Finish {
                succeeded: "Diagnostics completed",
                failed: "Diagnostics failed",
            },
        )
        .await
    }

    pub async fn apply_configuration(&self, cfg: &DisplayConfiguration) -> OperationHandle {
        self.launch(
            Operation::ApplyConfiguration,
            ScriptInvocation::configure(cfg),
            Finish {
                succeeded: "Configuration applied successfully",
                failed: "Configuration failed",
            },
        )
        .await
    }

    pub async fn reset_configuration(&self) -> OperationHandle {
        self.launch(
            Operation::ResetConfiguration,
            ScriptInvocation::new(ScriptMode::Reset),
            Finish {
                succeeded: "Configuration reset successfully",
                failed: "Reset failed",
            },
        )
        .await
    }

    /// Records the hand-off to manual configuration. Runs no script.
    pub async fn manual_setup(&self) {
        self.metrics.inc_started(Operation::ManualSetup.as_str());
        self.record_started(Operation::ManualSetup).await;
    }

    async fn launch(
        &self,
        operation: Operation,
        invocation: ScriptInvocation,
        finish: Finish,
    ) -> OperationHandle {
        info!(operation = operation.as_str(), mode = %invocation.mode, "operation started");
        self.metrics.inc_started(operation.as_str());
        self.record_started(operation).await;

        let this = self.clone();
        let task = tokio::spawn(async move {
            let result = this.runner.run(&invocation).await;
            this.complete(operation, finish, result).await
        });

        OperationHandle { operation, task }
    }

    async fn record_started(&self, operation: Operation) {
        let entry = ActivityRecord::new(
            operation.title(),
            operation.started_text(),
            operation.icon(),
            operation.started_severity(),
            now_unix(),
        );
        self.mutate(|state| state.record(entry)).await;
    }

    async fn complete(
        &self,
        operation: Operation,
        finish: Finish,
        result: Result<ScriptOutput, ScriptError>,
    ) -> Outcome {
        let outcome = match result {
            Ok(output) => {
                if !output.success_exit() {
                    self.metrics.inc_nonzero_exit(operation.as_str());
                }
                let info = (operation == Operation::LoadSystemInfo)
                    .then(|| parse_system_info(&output.stdout));
                let entry = ActivityRecord::new(
                    operation.title(),
                    finish.succeeded,
                    ICON_SUCCEEDED,
                    Severity::Success,
                    now_unix(),
                );
                self.mutate(|state| {
                    match operation {
                        Operation::LoadSystemInfo => {
                            if let Some(info) = info {
                                state.apply_system_info(info);
                            }
                        }
                        Operation::AutoConfigure | Operation::ApplyConfiguration => {
                            state.set_hidpi_status(HIDPI_CONFIGURED)
                        }
                        Operation::ResetConfiguration => {
                            state.set_hidpi_status(HIDPI_NOT_CONFIGURED)
                        }
                        Operation::RunDiagnostics | Operation::ManualSetup => {}
                    }
                    state.record(entry);
                })
                .await;
                Outcome::Succeeded
            }
            Err(err) => {
                warn!(operation = operation.as_str(), error = %err, "operation failed");
                let entry = ActivityRecord::new(
                    operation.title(),
                    finish.failed,
                    ICON_FAILED,
                    Severity::Failure,
                    now_unix(),
                );
                self.mutate(|state| {
                    if operation == Operation::LoadSystemInfo {
                        state.set_system_info_error();
                    }
                    state.record(entry);
                })
                .await;
                Outcome::Failed
            }
        };

        self.metrics
            .inc_finished(operation.as_str(), outcome.as_str());
        info!(
            operation = operation.as_str(),
            outcome = outcome.as_str(),
            "operation finished"
        );
        outcome
    }

    async fn mutate(&self, f: impl FnOnce(&mut State)) {
        let mut guard = self.state.write().await;
        f(&mut guard);
        guard.revision = guard.revision.wrapping_add(1);
        self.metrics.update_from_state(&guard);
        let revision = guard.revision;
        self.changes.send_modify(|rev| *rev = revision);
    }
}
