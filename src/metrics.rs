use crate::state::State;
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub operations_started_total: CounterVec,
    pub operations_finished_total: CounterVec,
    pub script_nonzero_exit_total: CounterVec,
    pub activity_entries: Gauge,
    pub hidpi_configured: Gauge,
    pub uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let operations_started_total = CounterVec::new(
            opts!(
                "hidpid_operations_started_total",
                "Operations started, by operation"
            ),
            &["operation"],
        )?;
        let operations_finished_total = CounterVec::new(
            opts!(
                "hidpid_operations_finished_total",
                "Operations finished, by operation and outcome"
            ),
            &["operation", "outcome"],
        )?;
        let script_nonzero_exit_total = CounterVec::new(
            opts!(
                "hidpid_script_nonzero_exit_total",
                "Script runs that exited with a non-zero status (still counted as succeeded)"
            ),
            &["operation"],
        )?;
        let activity_entries = Gauge::with_opts(opts!(
            "hidpid_activity_entries",
            "Entries currently held in the activity log"
        ))?;
        let hidpi_configured = Gauge::with_opts(opts!(
            "hidpid_hidpi_configured",
            "1 when the last configuring operation succeeded, 0 otherwise"
        ))?;
        let uptime_seconds =
            Gauge::with_opts(opts!("hidpid_uptime_seconds", "Service uptime in seconds"))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "hidpid_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;

        register(&registry, &operations_started_total)?;
        register(&registry, &operations_finished_total)?;
        register(&registry, &script_nonzero_exit_total)?;
        register(&registry, &activity_entries)?;
        register(&registry, &hidpi_configured)?;
        register(&registry, &uptime_seconds)?;
        register(&registry, &scrape_count_total)?;

        Ok(Arc::new(Self {
            registry,
            operations_started_total,
            operations_finished_total,
            script_nonzero_exit_total,
            activity_entries,
            hidpi_configured,
            uptime_seconds,
            scrape_count_total,
        }))
    }

    pub fn update_from_state(&self, state: &State) {
        self.activity_entries.set(state.activity.len() as f64);
        self.hidpi_configured
            .set(if state.hidpi_configured() { 1.0 } else { 0.0 });
        let uptime = now_unix().saturating_sub(state.started_at_unix) as f64;
        self.uptime_seconds.set(uptime);
    }

    pub fn inc_started(&self, operation: &str) {
        self.operations_started_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn inc_finished(&self, operation: &str, outcome: &str) {
        self.operations_finished_total
            .with_label_values(&[operation, outcome])
            .inc();
    }

    pub fn inc_nonzero_exit(&self, operation: &str) {
        self.script_nonzero_exit_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_operation_counters() {
        let metrics = Metrics::new().expect("metrics init");
        metrics.inc_started("reset_configuration");
        metrics.inc_finished("reset_configuration", "succeeded");
        metrics.update_from_state(&State::new(now_unix()));

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains(
            "hidpid_operations_finished_total{operation=\"reset_configuration\",outcome=\"succeeded\"} 1"
        ));
        assert!(text.contains("hidpid_hidpi_configured 0"));
        assert!(text.contains("hidpid_uptime_seconds"));
    }
}
