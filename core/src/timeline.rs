//! Append-only timeline of pipeline events
//!
//! The coordinator records one event per pipeline step (plus ad-hoc info and
//! warning events) and writes the accumulated list into the job's debug info
//! on terminal transition. `begin_step`/`end_step` pairs form a tree that
//! trace-span nesting mirrors.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Instant;

/// Outcome status of a timeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Info,
    Warning,
    Error,
}

/// One structured record in the job timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEvent {
    /// Step name, e.g. `prepare_document`
    pub step: String,
    /// Outcome status
    pub status: StepStatus,
    /// Wall-clock time of the event in epoch milliseconds
    pub timestamp_ms: i64,
    /// Duration of the step, for `begin_step`/`end_step` pairs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Human-readable message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Structured metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

struct OpenStep {
    name: String,
    started: Instant,
    metadata: Option<Value>,
}

/// Append-only event sink with open/close helpers
#[derive(Default)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
    open: Vec<OpenStep>,
}

impl Timeline {
    /// Create an empty timeline
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a step; the matching `end_step` records its duration
    pub fn begin_step(&mut self, name: impl Into<String>, metadata: Option<Value>) {
        self.open.push(OpenStep {
            name: name.into(),
            started: Instant::now(),
            metadata,
        });
    }

    /// Close the innermost open step
    pub fn end_step(&mut self, status: StepStatus, message: Option<String>, metadata: Option<Value>) {
        let Some(open) = self.open.pop() else {
            // Unbalanced end_step; record it rather than losing the signal
            self.event(StepStatus::Warning, "timeline", Some("end_step without begin_step".to_string()));
            return;
        };
        let merged_metadata = match (open.metadata, metadata) {
            (Some(Value::Object(mut base)), Some(Value::Object(extra))) => {
                base.extend(extra);
                Some(Value::Object(base))
            }
            (begin, end) => end.or(begin),
        };
        self.events.push(TimelineEvent {
            step: open.name,
            status,
            timestamp_ms: Utc::now().timestamp_millis(),
            duration_ms: Some(open.started.elapsed().as_millis() as u64),
            message,
            metadata: merged_metadata,
        });
    }

    /// Record a one-shot event with no duration
    pub fn event(&mut self, status: StepStatus, step: impl Into<String>, message: Option<String>) {
        self.events.push(TimelineEvent {
            step: step.into(),
            status,
            timestamp_ms: Utc::now().timestamp_millis(),
            duration_ms: None,
            message,
            metadata: None,
        });
    }

    /// Record a one-shot event with structured metadata
    pub fn event_with_metadata(
        &mut self,
        status: StepStatus,
        step: impl Into<String>,
        message: Option<String>,
        metadata: Value,
    ) {
        self.events.push(TimelineEvent {
            step: step.into(),
            status,
            timestamp_ms: Utc::now().timestamp_millis(),
            duration_ms: None,
            message,
            metadata: Some(metadata),
        });
    }

    /// Events recorded so far
    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Consume the timeline, closing any steps still open as errors
    pub fn into_events(mut self) -> Vec<TimelineEvent> {
        while !self.open.is_empty() {
            self.end_step(
                StepStatus::Error,
                Some("step left open at timeline close".to_string()),
                None,
            );
        }
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_begin_end_records_duration() {
        let mut timeline = Timeline::new();
        timeline.begin_step("prepare_document", Some(json!({"source_type": "document"})));
        timeline.end_step(StepStatus::Success, Some("3 chunks".to_string()), None);

        let events = timeline.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].step, "prepare_document");
        assert_eq!(events[0].status, StepStatus::Success);
        assert!(events[0].duration_ms.is_some());
        assert_eq!(events[0].metadata, Some(json!({"source_type": "document"})));
    }

    #[test]
    fn test_end_metadata_merges_over_begin_metadata() {
        let mut timeline = Timeline::new();
        timeline.begin_step("llm_extraction", Some(json!({"batches": 2})));
        timeline.end_step(
            StepStatus::Success,
            None,
            Some(json!({"entities": 5})),
        );

        let events = timeline.into_events();
        assert_eq!(events[0].metadata, Some(json!({"batches": 2, "entities": 5})));
    }

    #[test]
    fn test_nested_steps_close_innermost_first() {
        let mut timeline = Timeline::new();
        timeline.begin_step("process_job", None);
        timeline.begin_step("resolve_schema", None);
        timeline.end_step(StepStatus::Success, None, None);
        timeline.end_step(StepStatus::Success, None, None);

        let events = timeline.into_events();
        assert_eq!(events[0].step, "resolve_schema");
        assert_eq!(events[1].step, "process_job");
    }

    #[test]
    fn test_unbalanced_end_is_recorded_as_warning() {
        let mut timeline = Timeline::new();
        timeline.end_step(StepStatus::Success, None, None);

        let events = timeline.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, StepStatus::Warning);
    }

    #[test]
    fn test_into_events_closes_open_steps_as_errors() {
        let mut timeline = Timeline::new();
        timeline.begin_step("llm_extraction", None);

        let events = timeline.into_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status, StepStatus::Error);
    }
}
