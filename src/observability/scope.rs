//! Begin/complete logging around a multi-step operation
//!
//! - `{name}_BEGIN` on creation
//! - `{name}_COMPLETE` on `complete`
//! - `{name}_FAILED` on `fail`
//! - `{name}_INCOMPLETE` (warning) if dropped without either

use std::time::Instant;

use super::logger::Logger;

/// Scope that logs the lifecycle of one operation.
///
/// ```ignore
/// let scope = ObservationScope::new("CHECKPOINT");
/// // ... do work ...
/// scope.complete_with_fields(&[("position", "1000")]);
/// ```
pub struct ObservationScope<'a> {
    name: &'a str,
    completed: bool,
    started: Instant,
}

impl<'a> ObservationScope<'a> {
    pub fn new(name: &'a str) -> Self {
        Self::with_fields(name, &[])
    }

    pub fn with_fields(name: &'a str, fields: &[(&str, &str)]) -> Self {
        Logger::info(&format!("{}_BEGIN", name), fields);
        Self {
            name,
            completed: false,
            started: Instant::now(),
        }
    }

    /// Logs `{name}_COMPLETE` with the elapsed time.
    pub fn complete(self) {
        self.complete_with_fields(&[]);
    }

    pub fn complete_with_fields(mut self, extra_fields: &[(&str, &str)]) {
        self.completed = true;
        let elapsed = self.elapsed_ms();
        let mut fields: Vec<(&str, &str)> = vec![("elapsed_ms", elapsed.as_str())];
        fields.extend(extra_fields.iter().copied());
        Logger::info(&format!("{}_COMPLETE", self.name), &fields);
    }

    /// Logs `{name}_FAILED` at ERROR level.
    pub fn fail(mut self, reason: &str) {
        self.completed = true;
        Logger::error(&format!("{}_FAILED", self.name), &[("reason", reason)]);
    }

    /// Logs `{name}_FAILED` at FATAL level.
    pub fn fail_fatal(mut self, reason: &str) {
        self.completed = true;
        Logger::fatal(&format!("{}_FAILED", self.name), &[("reason", reason)]);
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    fn elapsed_ms(&self) -> String {
        self.started.elapsed().as_millis().to_string()
    }
}

impl Drop for ObservationScope<'_> {
    fn drop(&mut self) {
        if !self.completed {
            Logger::warn(
                &format!("{}_INCOMPLETE", self.name),
                &[("reason", "scope dropped without completion")],
            );
        }
    }
}
