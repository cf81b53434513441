//! Shared tracing setup for the hostwatch binaries.

mod subscriber;

pub use subscriber::{LogFormat, init_tracing, init_tracing_with};
