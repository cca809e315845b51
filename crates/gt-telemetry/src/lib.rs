//! Logging setup for geotrack services.
//!
//! Both initialisers sit on `tracing-subscriber` with an `EnvFilter`, so
//! `RUST_LOG` always wins over the configured default level.

pub mod logging;
