//! Clock, telemetry, and host-metrics helpers.

pub mod clock;
pub mod sysmetrics;
pub mod telemetry;

pub use clock::*;
pub use sysmetrics::*;
pub use telemetry::*;
