//! Bounded retry with exponential backoff for HTTP providers.

use std::time::Duration;

/// Delay before the given attempt (attempt 0 is the first try and has
/// no delay). Doubles from `base`, capped at `base * 32`.
pub fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    if attempt == 0 {
        Duration::ZERO
    } else {
        base * (1u32 << (attempt - 1).min(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_millis(250);
        assert_eq!(backoff_delay(0, base), Duration::ZERO);
        assert_eq!(backoff_delay(1, base), Duration::from_millis(250));
        assert_eq!(backoff_delay(2, base), Duration::from_millis(500));
        assert_eq!(backoff_delay(3, base), Duration::from_millis(1000));
        assert_eq!(backoff_delay(6, base), Duration::from_millis(8000));
        assert_eq!(backoff_delay(40, base), Duration::from_millis(8000));
    }
}
