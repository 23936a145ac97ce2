//! Momentum scoring pipeline: resolve six snapshots, join by ISIN, score, filter and rank.

pub mod error;
pub mod pipeline;
pub mod progress;
pub mod resolver;
pub mod returns;
pub mod schedule;
pub mod score;

pub use error::MomentumError;
pub use pipeline::{run_momentum_pipeline, MomentumPipeline, MomentumReport};
pub use progress::ProgressSink;
pub use resolver::{ResolveContext, ResolverOptions};
pub use schedule::ResolvedSnapshots;
