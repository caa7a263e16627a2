//! Run Monitoring Module
//!
//! - [`ExecutionTimeline`]: phase start/end timing for Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
