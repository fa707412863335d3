//! Domain data types

pub mod definition;
pub mod event;
pub mod indicator;
pub mod result;
pub mod schedule;
pub mod status;

pub use definition::{IndicatorSpec, MetricDefinition, SinkSpec, SourceSpec};
pub use event::{EventKind, LabelFilter, Outcome, RawEvent, TimeRange};
pub use indicator::{Indicator, PerformanceLevel, Unit};
pub use result::{
    FailedChange, FailureCause, GroupValue, MetricError, MetricOutcome, MetricResult, MetricValue, PeriodValue,
    Summary, Trend,
};
pub use schedule::{EntryKey, ExecutionState, ScheduleEntryInfo};
pub use status::{DefinitionStatus, Health, IndicatorStatus, StatusRecord};
