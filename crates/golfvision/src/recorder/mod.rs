//! Error reports, stage timings and the retention sweep.

pub mod errors;
pub mod performance;
pub mod resources;
pub mod sweep;

pub use errors::{ErrorQuery, ErrorRecorder, ErrorReport, ErrorStats, ReportKind, Severity};
pub use performance::{Dashboard, DailyTrend, ErrorFrequency, PerformanceLog, PerformanceRecorder};
pub use resources::ResourceSnapshot;
pub use sweep::RetentionSweeper;
