pub mod chunk_store;
pub mod clock;
pub mod error;
pub mod metrics;
pub mod progress;
pub mod retry;
pub mod staging;
pub mod state;
pub mod transform_writer;
