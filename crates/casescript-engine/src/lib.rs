//! Thumbnail-to-script pipeline: heuristics, act handling, the patch loop,
//! document export, and the external services behind capability traits.

pub mod error;
pub mod export;
pub mod patch;
pub mod pipeline;
pub mod providers;
pub mod rubric;
pub mod run;
pub mod split;
pub mod thumbnail;

pub use error::PipelineError;
pub use pipeline::Pipeline;
pub use run::Run;
