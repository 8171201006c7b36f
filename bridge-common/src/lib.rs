pub mod envelope;
pub mod error;
pub mod extract;
pub mod metrics;
pub mod pipeline;
pub mod reconciler;
pub mod store;
pub mod topic;
