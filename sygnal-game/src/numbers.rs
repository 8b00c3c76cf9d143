//! Numeric conversion helpers centralizing safe numeric casts.

use num_traits::cast::cast;

/// Floor a f64 and clamp it to the u64 range, returning 0 for non-finite or negative values.
#[must_use]
pub fn floor_f64_to_u64(value: f64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return 0;
    }
    let max = cast::<u64, f64>(u64::MAX).unwrap_or(f64::MAX);
    cast::<f64, u64>(value.min(max).floor()).unwrap_or(0)
}

/// Convert i64 to f64 while allowing precision loss in a single location.
#[must_use]
pub fn i64_to_f64(value: i64) -> f64 {
    cast::<i64, f64>(value).unwrap_or(0.0)
}

/// Convert an upgrade level into a `powi` exponent, saturating at `i32::MAX`.
#[must_use]
pub fn level_exponent(level: u32) -> i32 {
    i32::try_from(level).unwrap_or(i32::MAX)
}

/// Milliseconds expressed as fractional seconds.
#[must_use]
pub fn ms_to_secs(ms: f64) -> f64 {
    ms / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_to_u64_handles_edges() {
        assert_eq!(floor_f64_to_u64(3.9), 3);
        assert_eq!(floor_f64_to_u64(-1.0), 0);
        assert_eq!(floor_f64_to_u64(f64::NAN), 0);
        assert_eq!(floor_f64_to_u64(f64::INFINITY), 0);
    }

    #[test]
    fn level_exponent_saturates() {
        assert_eq!(level_exponent(3), 3);
        assert_eq!(level_exponent(u32::MAX), i32::MAX);
    }
}
