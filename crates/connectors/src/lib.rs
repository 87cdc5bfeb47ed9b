pub mod error;
pub mod filter;
pub mod memory;
pub mod sql;
pub mod store;
