//! Periodic `--info` reload.

use crate::orchestrator::{OperationHandle, Orchestrator};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Calls `load_system_info` every `period` until `shutdown` changes. The first
/// tick fires one period after start. A tick is skipped while the previous
/// reload is still running.
pub async fn run_refresh_loop(
    orchestrator: Orchestrator,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut pending: Option<OperationHandle> = None;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("refresh loop stopping");
                break;
            }
            _ = ticker.tick() => {
                if pending.as_ref().is_some_and(|handle| !handle.is_finished()) {
                    debug!("previous system info reload still running, skipping tick");
                } else {
                    pending = Some(orchestrator.load_system_info().await);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::tests::{orchestrator, FakeRunner};
    use crate::script::ScriptMode;
    use std::sync::Arc;
    use tokio::sync::Notify;
    use tokio::time::sleep;

    const PERIOD: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn reloads_once_per_tick_until_shutdown() {
        let runner = Arc::new(FakeRunner::ok("Vendor ID: 0x10ac"));
        let orch = orchestrator(runner.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_refresh_loop(orch.clone(), PERIOD, shutdown_rx));

        sleep(PERIOD / 2).await;
        assert!(runner.calls().is_empty());

        sleep(PERIOD * 3).await;
        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls.iter().all(|call| call.mode == ScriptMode::Info));
        assert_eq!(orch.snapshot().await.system.vendor_id, "0x10ac");

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();

        sleep(PERIOD * 3).await;
        assert_eq!(runner.calls().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn skips_ticks_while_reload_is_running() {
        let gate = Arc::new(Notify::new());
        let mut runner = FakeRunner::ok("");
        runner.gate = Some(gate.clone());
        let runner = Arc::new(runner);
        let orch = orchestrator(runner.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_refresh_loop(orch, PERIOD, shutdown_rx));

        sleep(PERIOD * 3 + PERIOD / 2).await;
        assert_eq!(runner.calls().len(), 1);

        gate.notify_one();
        sleep(PERIOD).await;
        assert_eq!(runner.calls().len(), 2);

        shutdown_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
