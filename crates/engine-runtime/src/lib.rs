pub mod engine;
pub mod error;
pub mod migration;
pub mod uploads;
