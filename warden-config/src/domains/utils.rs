//! Utility functions and helpers for configuration

use std::time::Duration;

/// Convert a millisecond setting into a `Duration`
pub fn millis(value: u64) -> Duration {
    Duration::from_millis(value)
}

/// Convert an optional fractional-seconds setting into a `Duration`.
///
/// Settings are validated before use, so a value that cannot be represented
/// is treated as unset.
pub fn optional_secs(value: Option<f64>) -> Option<Duration> {
    value.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_secs() {
        assert_eq!(optional_secs(Some(0.5)), Some(Duration::from_millis(500)));
        assert_eq!(optional_secs(None), None);
        assert_eq!(optional_secs(Some(-1.0)), None);
    }
}
