pub mod multipart;
pub mod pacer;
pub mod range;
pub mod server;
