pub mod dependency;
pub mod error;
pub mod pipeline;
pub mod processor;
pub mod retry;
pub mod task;
pub mod transform;
