pub mod adapter;
mod coercion;
pub mod params;
pub mod row;
pub mod utils;
