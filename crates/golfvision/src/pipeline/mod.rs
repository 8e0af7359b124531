pub mod config;
pub mod context;
pub mod enrichment;
pub mod error;
pub mod retry;
pub mod runner;
pub mod storyboard;

pub use config::PipelineSettings;
pub use context::PipelineContext;
pub use error::{PipelineOutcome, StageError};
pub use retry::RetryPolicy;
pub use runner::Pipeline;
