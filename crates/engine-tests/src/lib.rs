#![allow(dead_code)]

pub mod migration;
pub mod utils;
