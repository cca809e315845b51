//! Domain types and configuration shared by the geotrack crates.

pub mod config;
pub mod types;
