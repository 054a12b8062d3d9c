//! Host metrics sampled once at pool construction.
//!
//! Collection failure is non-fatal; the pool logs a warning and continues.

use serde::Serialize;

use crate::core::AppResult;

/// A point-in-time sample of host-level figures.
#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    /// Number of logical CPUs.
    pub cpu_count: usize,
    /// 1/5/15 minute load averages, if the platform exposes them.
    pub load_average: Option<(f64, f64, f64)>,
}

/// Sample the host.
///
/// # Errors
///
/// Fails when the load-average source exists but cannot be parsed. A missing
/// source is not an error; `load_average` is simply `None`.
pub fn collect() -> AppResult<SystemMetrics> {
    Ok(SystemMetrics {
        cpu_count: num_cpus::get(),
        load_average: read_load_average()?,
    })
}

#[cfg(target_os = "linux")]
fn read_load_average() -> AppResult<Option<(f64, f64, f64)>> {
    use anyhow::Context;

    let raw = match std::fs::read_to_string("/proc/loadavg") {
        Ok(raw) => raw,
        Err(_) => return Ok(None),
    };
    let mut fields = raw.split_whitespace();
    let mut next = || -> AppResult<f64> {
        fields
            .next()
            .context("truncated /proc/loadavg")?
            .parse::<f64>()
            .context("malformed /proc/loadavg field")
    };
    Ok(Some((next()?, next()?, next()?)))
}

#[cfg(not(target_os = "linux"))]
fn read_load_average() -> AppResult<Option<(f64, f64, f64)>> {
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_reports_cpus() {
        let metrics = collect().unwrap();
        assert!(metrics.cpu_count >= 1);
    }
}
