pub mod postgres;
pub mod query;
