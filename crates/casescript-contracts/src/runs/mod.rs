pub mod receipts;
pub mod store;
pub mod summary;

pub use store::{Artifact, RunStore, RUN_PREFIX};
