//! Observability for the durability core
//!
//! - Structured lifecycle events, rendered as JSON and emitted via `tracing`
//! - Atomic counters (`DurabilityMetrics`)
//! - Begin/complete scopes for multi-step operations
//!
//! ```ignore
//! use redocore::observability::{log_event_with_fields, Event};
//!
//! log_event_with_fields(Event::RedoDemoted, &[("position", "1000")]);
//! ```
//!
//! Logging never fails and never changes the outcome of the operation
//! being observed.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{DurabilityMetrics, MetricsSnapshot};
pub use scope::ObservationScope;

fn default_severity(event: Event) -> Severity {
    if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    }
}

/// Log a lifecycle event
pub fn log_event(event: Event) {
    Logger::log(default_severity(event), event.as_str(), &[]);
}

/// Log a lifecycle event with fields
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(default_severity(event), event.as_str(), fields);
}

/// Log a lifecycle event at an explicit severity.
pub fn log_event_at(severity: Severity, event: Event, fields: &[(&str, &str)]) {
    Logger::log(severity, event.as_str(), fields);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_severity() {
        assert_eq!(default_severity(Event::RedoCorruption), Severity::Fatal);
        assert_eq!(default_severity(Event::RedoOpened), Severity::Info);
    }

    #[test]
    fn test_log_event_does_not_panic() {
        log_event(Event::RedoOpened);
        log_event_with_fields(Event::ConfigLoaded, &[("redo_dir", "/tmp/redo")]);
        log_event_at(Severity::Warn, Event::RedoDemoted, &[]);
    }
}
