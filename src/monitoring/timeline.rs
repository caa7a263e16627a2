//! Execution Timeline
//!
//! Tracks when each phase of each step starts and ends, for the run
//! summary and its Gantt chart. Events are keyed by a `step:phase` label.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::workflow::model::Phase;

/// Type of timeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    /// Phase started
    Started,
    /// Phase finished successfully
    Completed,
    /// Phase failed
    Failed,
    /// Phase had nothing to run
    Skipped,
}

/// A single event in the execution timeline.
#[derive(Debug, Clone)]
pub struct TimelineEvent {
    /// `step:phase`
    pub label: String,
    pub event_type: EventType,
    pub timestamp: Instant,
}

/// Label used for a phase of a step.
pub fn phase_label(step: &str, phase: Phase) -> String {
    format!("{}:{}", step, phase.as_str())
}

/// Tracks the execution timeline of a run.
#[derive(Debug, Clone)]
pub struct ExecutionTimeline {
    events: Vec<TimelineEvent>,
    start_time: Instant,
}

impl ExecutionTimeline {
    /// Creates a new timeline starting now.
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            start_time: Instant::now(),
        }
    }

    /// Records an event for a label.
    pub fn add_event(&mut self, label: impl Into<String>, event_type: EventType) {
        self.events.push(TimelineEvent {
            label: label.into(),
            event_type,
            timestamp: Instant::now(),
        });
    }

    /// Records an event for a step phase.
    pub fn phase_event(&mut self, step: &str, phase: Phase, event_type: EventType) {
        self.add_event(phase_label(step, phase), event_type);
    }

    /// Returns all recorded events.
    pub fn get_events(&self) -> &[TimelineEvent] {
        &self.events
    }

    /// Returns the total elapsed time since timeline creation.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// (start, end) offsets in milliseconds for every label that finished,
    /// ordered by start time.
    fn spans(&self) -> Vec<(String, u128, u128)> {
        let mut starts: HashMap<&str, u128> = HashMap::new();
        let mut spans = Vec::new();

        for event in &self.events {
            let elapsed = event.timestamp.duration_since(self.start_time).as_millis();
            match event.event_type {
                EventType::Started => {
                    starts.insert(event.label.as_str(), elapsed);
                }
                EventType::Completed | EventType::Failed => {
                    if let Some(start) = starts.remove(event.label.as_str()) {
                        spans.push((event.label.clone(), start, elapsed));
                    }
                }
                EventType::Skipped => {}
            }
        }

        spans.sort_by_key(|(_, start, _)| *start);
        spans
    }

    /// Generates an ASCII Gantt chart representation.
    ///
    /// Each phase is shown as a bar indicating when it ran relative to the
    /// total run time.
    pub fn gantt_chart(&self) -> String {
        let mut output = String::from("\nExecution Timeline:\n\n");

        let total_time = Instant::now().duration_since(self.start_time).as_millis();
        if total_time == 0 {
            return output;
        }

        // Scale to 50 characters width
        let scale = 50.0 / total_time as f64;

        for (label, start, end) in self.spans() {
            let start_pos = (start as f64 * scale) as usize;
            let duration = ((end - start) as f64 * scale).max(1.0) as usize;

            let mut bar = " ".repeat(start_pos);
            bar.push_str(&"#".repeat(duration));

            output.push_str(&format!(
                "{:24} |{}| ({} ms)\n",
                truncate(&label, 24),
                bar,
                end - start
            ));
        }

        let skipped: Vec<&str> = self
            .events
            .iter()
            .filter(|e| e.event_type == EventType::Skipped)
            .map(|e| e.label.as_str())
            .collect();
        if !skipped.is_empty() {
            output.push_str(&format!("\nSkipped: {}\n", skipped.join(", ")));
        }

        output.push_str(&format!("\nTotal: {} ms\n", total_time));
        output
    }

    /// Returns durations in milliseconds per label.
    pub fn get_durations(&self) -> HashMap<String, u128> {
        self.spans()
            .into_iter()
            .map(|(label, start, end)| (label, end - start))
            .collect()
    }
}

impl Default for ExecutionTimeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Pads or truncates a label to a fixed width.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        format!("{:width$}", s, width = max_len)
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_timeline_creation() {
        let timeline = ExecutionTimeline::new();
        assert!(timeline.events.is_empty());
    }

    #[test]
    fn test_phase_label() {
        assert_eq!(phase_label("thermal", Phase::Execute), "thermal:execute");
    }

    #[test]
    fn test_get_durations() {
        let mut timeline = ExecutionTimeline::new();
        timeline.phase_event("thermal", Phase::Execute, EventType::Started);
        thread::sleep(Duration::from_millis(50));
        timeline.phase_event("thermal", Phase::Execute, EventType::Completed);

        let durations = timeline.get_durations();
        assert!(*durations.get("thermal:execute").unwrap() >= 50);
    }

    #[test]
    fn test_get_durations_only_started() {
        let mut timeline = ExecutionTimeline::new();
        timeline.add_event("s:configure", EventType::Started);

        assert!(timeline.get_durations().is_empty());
    }

    #[test]
    fn test_gantt_chart_generation() {
        let mut timeline = ExecutionTimeline::new();

        timeline.phase_event("a", Phase::Configure, EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.phase_event("a", Phase::Configure, EventType::Completed);
        timeline.phase_event("a", Phase::Execute, EventType::Started);
        thread::sleep(Duration::from_millis(20));
        timeline.phase_event("a", Phase::Execute, EventType::Failed);
        timeline.phase_event("a", Phase::Postprocess, EventType::Skipped);

        let chart = timeline.gantt_chart();
        assert!(chart.contains("a:configure"));
        assert!(chart.contains("a:execute"));
        assert!(chart.contains("Skipped: a:postprocess"));
        assert!(chart.contains("Total:"));
    }

    #[test]
    fn test_gantt_chart_empty() {
        let timeline = ExecutionTimeline::default();
        assert!(timeline.gantt_chart().contains("Timeline"));
    }

    #[test]
    fn test_truncate_long_label() {
        let label = truncate("a_very_long_step_name:postprocess", 12);
        assert_eq!(label, "a_very_lo...");
        assert_eq!(truncate("short", 8), "short   ");
    }
}
