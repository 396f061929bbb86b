//! Resource limits for sandboxed execution.
//!
//! Translates human-readable memory and CPU limit strings (as found in
//! configuration and problem metadata) into the container runtime's native
//! units: bytes for memory and nano-CPUs for CPU share.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LimitError;

/// Memory ceiling used when no limit string is given (128 MiB).
pub const DEFAULT_MEMORY_BYTES: i64 = 128 * 1024 * 1024;

/// CPU share used when no limit string is given (one logical core).
pub const DEFAULT_CPU_NANOS: i64 = 1_000_000_000;

const NANOS_PER_CPU: f64 = 1_000_000_000.0;

/// Parses a memory limit such as `"256m"`, `"1G"`, `"512k"` or `"1048576"` into bytes.
///
/// The suffix is case-insensitive; a bare number is taken as bytes. An
/// empty string yields [`DEFAULT_MEMORY_BYTES`].
///
/// # Example
///
/// ```
/// use elitecode_judge::execution::parse_memory;
///
/// assert_eq!(parse_memory("256m").unwrap(), 268_435_456);
/// assert_eq!(parse_memory("").unwrap(), 128 * 1024 * 1024);
/// ```
pub fn parse_memory(limit: &str) -> Result<i64, LimitError> {
    let limit = limit.trim();
    if limit.is_empty() {
        return Ok(DEFAULT_MEMORY_BYTES);
    }

    let (number, multiplier) = match limit.chars().last().map(|c| c.to_ascii_lowercase()) {
        Some('k') => (&limit[..limit.len() - 1], 1024_i64),
        Some('m') => (&limit[..limit.len() - 1], 1024 * 1024),
        Some('g') => (&limit[..limit.len() - 1], 1024 * 1024 * 1024),
        _ => (limit, 1),
    };

    let value: i64 = number
        .trim()
        .parse()
        .map_err(|_| LimitError::invalid(limit, "expected an integer with optional k/m/g suffix"))?;

    if value <= 0 {
        return Err(LimitError::invalid(limit, "memory limit must be positive"));
    }

    value
        .checked_mul(multiplier)
        .ok_or_else(|| LimitError::invalid(limit, "memory limit overflows"))
}

/// Parses a CPU limit given as a decimal fraction of one logical core
/// (`"0.5"`, `"2"`) into nano-CPUs. An empty string yields [`DEFAULT_CPU_NANOS`].
///
/// # Example
///
/// ```
/// use elitecode_judge::execution::parse_cpu;
///
/// assert_eq!(parse_cpu("0.5").unwrap(), 500_000_000);
/// ```
pub fn parse_cpu(limit: &str) -> Result<i64, LimitError> {
    let limit = limit.trim();
    if limit.is_empty() {
        return Ok(DEFAULT_CPU_NANOS);
    }

    let cores: f64 = limit
        .parse()
        .map_err(|_| LimitError::invalid(limit, "expected a decimal number of CPUs"))?;

    if !cores.is_finite() || cores <= 0.0 {
        return Err(LimitError::invalid(limit, "CPU limit must be a positive number"));
    }

    let nanos = (cores * NANOS_PER_CPU).round();
    if nanos < 1.0 || nanos > i64::MAX as f64 {
        return Err(LimitError::invalid(limit, "CPU limit out of range"));
    }

    Ok(nanos as i64)
}

/// Resource limits applied to every sandboxed run of one submission.
///
/// Derived once from problem metadata and configuration, then shared
/// read-only by every test case of that submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory ceiling in bytes.
    pub memory_bytes: i64,
    /// CPU share in nano-CPUs (1e9 = one core).
    pub cpu_nano_units: i64,
    /// Maximum real elapsed time for one run.
    pub wall_clock_limit: Duration,
}

impl ResourceLimits {
    /// Creates limits from already-translated values.
    pub fn new(memory_bytes: i64, cpu_nano_units: i64, wall_clock_limit: Duration) -> Self {
        Self {
            memory_bytes,
            cpu_nano_units,
            wall_clock_limit,
        }
    }

    /// Builds limits from the human-readable strings used in configuration.
    pub fn from_strings(
        memory: &str,
        cpu: &str,
        wall_clock_limit: Duration,
    ) -> Result<Self, LimitError> {
        Ok(Self::new(parse_memory(memory)?, parse_cpu(cpu)?, wall_clock_limit))
    }

    /// Memory ceiling in kilobytes.
    pub fn memory_kb(&self) -> u64 {
        (self.memory_bytes / 1024) as u64
    }

    /// Wall-clock limit in milliseconds.
    pub fn time_limit_ms(&self) -> u64 {
        self.wall_clock_limit.as_millis() as u64
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            cpu_nano_units: DEFAULT_CPU_NANOS,
            wall_clock_limit: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_memory_units() {
        assert_eq!(parse_memory("256m").unwrap(), 268_435_456);
        assert_eq!(parse_memory("256M").unwrap(), 268_435_456);
        assert_eq!(parse_memory("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_memory("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory("4096").unwrap(), 4096);
    }

    #[test]
    fn test_parse_memory_default() {
        assert_eq!(parse_memory("").unwrap(), DEFAULT_MEMORY_BYTES);
        assert_eq!(parse_memory("   ").unwrap(), DEFAULT_MEMORY_BYTES);
    }

    #[test]
    fn test_parse_memory_rejects_garbage() {
        assert!(matches!(
            parse_memory("lots"),
            Err(LimitError::InvalidLimitFormat { .. })
        ));
        assert!(parse_memory("m").is_err());
        assert!(parse_memory("12.5m").is_err());
        assert!(parse_memory("0m").is_err());
        assert!(parse_memory("-5m").is_err());
        assert!(parse_memory("99999999999999999g").is_err());
    }

    #[test]
    fn test_parse_cpu() {
        assert_eq!(parse_cpu("0.5").unwrap(), 500_000_000);
        assert_eq!(parse_cpu("1").unwrap(), 1_000_000_000);
        assert_eq!(parse_cpu("2.25").unwrap(), 2_250_000_000);
        assert_eq!(parse_cpu("").unwrap(), DEFAULT_CPU_NANOS);
    }

    #[test]
    fn test_parse_cpu_rejects_garbage() {
        assert!(parse_cpu("half").is_err());
        assert!(parse_cpu("0").is_err());
        assert!(parse_cpu("-1").is_err());
        assert!(parse_cpu("NaN").is_err());
        assert!(parse_cpu("inf").is_err());
    }

    #[test]
    fn test_parsing_is_idempotent() {
        assert_eq!(parse_memory("64m").unwrap(), parse_memory("64m").unwrap());
        assert_eq!(parse_cpu("1.5").unwrap(), parse_cpu("1.5").unwrap());
    }

    #[test]
    fn test_limits_from_strings() {
        let limits = ResourceLimits::from_strings("128m", "0.5", Duration::from_secs(2)).unwrap();
        assert_eq!(limits.memory_bytes, 134_217_728);
        assert_eq!(limits.cpu_nano_units, 500_000_000);
        assert_eq!(limits.memory_kb(), 131_072);
        assert_eq!(limits.time_limit_ms(), 2000);
    }
}
