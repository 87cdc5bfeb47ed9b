pub mod download;
pub mod error;
pub mod receiver;
