//! Pipeline scheduling and orchestration for Trellis.

pub mod dag;
pub mod gate;
pub mod matrix;
pub mod report;
pub mod scheduler;
pub mod triggers;

pub use dag::{GraphBuilder, JobGraph};
pub use gate::GateEvaluator;
pub use matrix::MatrixExpander;
pub use report::Aggregator;
pub use scheduler::{RunParams, Scheduler};
pub use triggers::{TriggerEvent, TriggerMatcher};
