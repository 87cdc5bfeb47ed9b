pub mod core;
pub mod errors;
pub mod execution;
pub mod pagination;
pub mod records;
pub mod transfer;
