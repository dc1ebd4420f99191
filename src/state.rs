use serde::Serialize;
use std::collections::VecDeque;
use uuid::Uuid;

pub const ACTIVITY_LOG_CAPACITY: usize = 10;

pub const STATUS_CHECKING: &str = "Checking...";
pub const STATUS_UNKNOWN: &str = "Unknown";
pub const STATUS_READY: &str = "Ready";
pub const STATUS_INFO_ERROR: &str = "Error loading system info";
pub const HIDPI_CONFIGURED: &str = "Configured";
pub const HIDPI_NOT_CONFIGURED: &str = "Not configured";
pub const BACKUP_NONE: &str = "No backups found";

const VENDOR_ID_LABEL: &str = "Vendor ID:";
const PRODUCT_ID_LABEL: &str = "Product ID:";
const MONITOR_NAME_LABEL: &str = "Monitor Name:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemState {
    pub system_status: String,
    pub hidpi_status: String,
    pub backup_status: String,
    pub vendor_id: String,
    pub product_id: String,
    pub monitor_name: String,
}

impl Default for SystemState {
    fn default() -> Self {
        Self {
            system_status: STATUS_CHECKING.to_string(),
            hidpi_status: STATUS_UNKNOWN.to_string(),
            backup_status: STATUS_UNKNOWN.to_string(),
            vendor_id: STATUS_UNKNOWN.to_string(),
            product_id: STATUS_UNKNOWN.to_string(),
            monitor_name: STATUS_UNKNOWN.to_string(),
        }
    }
}

/// Fields recovered from `hidpi.sh --info`. `None` means the label was not seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemInfo {
    pub vendor_id: Option<String>,
    pub product_id: Option<String>,
    pub monitor_name: Option<String>,
}

/// Line-oriented scan for `<Label>: <value>`. Unknown lines are skipped and the
/// last occurrence of a label wins. A labelled line without `": "` yields the
/// whole line as its value.
pub fn parse_system_info(output: &str) -> SystemInfo {
    let mut info = SystemInfo::default();
    for line in output.lines() {
        let slot = if line.contains(VENDOR_ID_LABEL) {
            &mut info.vendor_id
        } else if line.contains(PRODUCT_ID_LABEL) {
            &mut info.product_id
        } else if line.contains(MONITOR_NAME_LABEL) {
            &mut info.monitor_name
        } else {
            continue;
        };
        *slot = Some(line.split_once(": ").map_or(line, |(_, v)| v).to_string());
    }
    info
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub severity: Severity,
    pub timestamp_unix: i64,
}

impl ActivityRecord {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        icon: impl Into<String>,
        severity: Severity,
        timestamp_unix: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            icon: icon.into(),
            severity,
            timestamp_unix,
        }
    }
}

/// Newest-first log holding at most [`ACTIVITY_LOG_CAPACITY`] records.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: VecDeque<ActivityRecord>,
}

impl ActivityLog {
    pub fn push(&mut self, record: ActivityRecord) {
        self.entries.push_front(record);
        self.entries.truncate(ACTIVITY_LOG_CAPACITY);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ActivityRecord> {
        self.entries.iter()
    }

    #[cfg(test)]
    pub fn latest(&self) -> Option<&ActivityRecord> {
        self.entries.front()
    }
}

#[derive(Debug, Clone, Default)]
pub struct State {
    pub started_at_unix: i64,
    /// Bumped once per mutation applied by the orchestrator.
    pub revision: u64,
    pub system: SystemState,
    pub activity: ActivityLog,
}

impl State {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    /// Applies a successful `--info` run. Fields whose label was missing keep
    /// their previous value.
    pub fn apply_system_info(&mut self, info: SystemInfo) {
        if let Some(v) = info.vendor_id {
            self.system.vendor_id = v;
        }
        if let Some(v) = info.product_id {
            self.system.product_id = v;
        }
        if let Some(v) = info.monitor_name {
            self.system.monitor_name = v;
        }
        self.system.system_status = STATUS_READY.to_string();
        self.system.hidpi_status = HIDPI_NOT_CONFIGURED.to_string();
        self.system.backup_status = BACKUP_NONE.to_string();
    }

    pub fn set_system_info_error(&mut self) {
        self.system.system_status = STATUS_INFO_ERROR.to_string();
    }

    pub fn set_hidpi_status(&mut self, status: &str) {
        self.system.hidpi_status = status.to_string();
    }

    pub fn record(&mut self, record: ActivityRecord) {
        self.activity.push(record);
    }

    pub fn hidpi_configured(&self) -> bool {
        self.system.hidpi_status == HIDPI_CONFIGURED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(n: i64) -> ActivityRecord {
        ActivityRecord::new("t", format!("entry {n}"), "gear", Severity::Info, n)
    }

    #[test]
    fn defaults_match_initial_display() {
        let s = SystemState::default();
        assert_eq!(s.system_status, "Checking...");
        assert_eq!(s.hidpi_status, "Unknown");
        assert_eq!(s.backup_status, "Unknown");
        assert_eq!(s.vendor_id, "Unknown");
        assert_eq!(s.product_id, "Unknown");
        assert_eq!(s.monitor_name, "Unknown");
    }

    #[test]
    fn parses_all_labels() {
        let mut state = State::new(0);
        state.apply_system_info(parse_system_info(
            "Vendor ID: ABC123\nProduct ID: XYZ\nMonitor Name: Dell U2720Q",
        ));

        assert_eq!(state.system.vendor_id, "ABC123");
        assert_eq!(state.system.product_id, "XYZ");
        assert_eq!(state.system.monitor_name, "Dell U2720Q");
        assert_eq!(state.system.system_status, "Ready");
        assert_eq!(state.system.hidpi_status, "Not configured");
        assert_eq!(state.system.backup_status, "No backups found");
    }

    #[test]
    fn missing_label_keeps_previous_value() {
        let mut state = State::new(0);
        state.apply_system_info(parse_system_info("Product ID: 0x1234\n"));
        assert_eq!(state.system.vendor_id, "Unknown");
        assert_eq!(state.system.product_id, "0x1234");

        state.apply_system_info(parse_system_info(
            "Vendor ID: 0x10ac\nnoise line\nMonitor Name: LG UltraFine",
        ));
        assert_eq!(state.system.vendor_id, "0x10ac");
        assert_eq!(state.system.product_id, "0x1234");
        assert_eq!(state.system.monitor_name, "LG UltraFine");
    }

    #[test]
    fn parsing_is_order_independent_and_lenient() {
        let info = parse_system_info(
            "==> detected display\r\n  Monitor Name: Studio Display\r\nVendor ID: 610\r\nProduct ID:missing-space\r\n",
        );
        assert_eq!(info.monitor_name.as_deref(), Some("Studio Display"));
        assert_eq!(info.vendor_id.as_deref(), Some("610"));
        assert_eq!(info.product_id.as_deref(), Some("Product ID:missing-space"));
    }

    #[test]
    fn line_without_separator_is_taken_whole() {
        let info = parse_system_info("Vendor ID:0x10ac\nProduct ID:\tXYZ");
        assert_eq!(info.vendor_id.as_deref(), Some("Vendor ID:0x10ac"));
        assert_eq!(info.product_id.as_deref(), Some("Product ID:\tXYZ"));
    }

    #[test]
    fn first_matching_label_wins() {
        let info = parse_system_info("Product ID: 1 Vendor ID: 2");
        assert_eq!(info.vendor_id.as_deref(), Some("1 Vendor ID: 2"));
        assert_eq!(info.product_id, None);
    }

    #[test]
    fn value_is_everything_after_first_separator() {
        let info = parse_system_info("Monitor Name: Dell: Office 2");
        assert_eq!(info.monitor_name.as_deref(), Some("Dell: Office 2"));
    }

    #[test]
    fn empty_output_only_touches_statuses() {
        let mut state = State::new(0);
        state.apply_system_info(parse_system_info(""));
        assert_eq!(state.system.system_status, "Ready");
        assert_eq!(state.system.vendor_id, "Unknown");
    }

    #[test]
    fn activity_log_is_bounded_and_newest_first() {
        let mut log = ActivityLog::default();
        for n in 0..25 {
            log.push(record(n));
            assert!(log.len() <= ACTIVITY_LOG_CAPACITY);
        }

        let order: Vec<i64> = log.iter().map(|r| r.timestamp_unix).collect();
        assert_eq!(order, (15..25).rev().collect::<Vec<_>>());
        assert_eq!(log.latest().map(|r| r.timestamp_unix), Some(24));
    }

    #[test]
    fn activity_ids_are_unique() {
        let a = record(1);
        let b = record(1);
        assert_ne!(a.id, b.id);
    }
}
