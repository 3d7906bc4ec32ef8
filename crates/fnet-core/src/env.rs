//! Environment-variable configuration helpers

use std::str::FromStr;

/// Read `key` from the environment, parse it as `T`, or fall back to
/// `default` when unset or unparseable.
pub fn env_get<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        assert_eq!(env_get("FNET_TEST_SURELY_UNSET", 42usize), 42);
    }

    #[test]
    fn test_parse_and_fallback() {
        std::env::set_var("FNET_TEST_ENV_GET", "128");
        assert_eq!(env_get("FNET_TEST_ENV_GET", 0usize), 128);
        std::env::set_var("FNET_TEST_ENV_GET", "not-a-number");
        assert_eq!(env_get("FNET_TEST_ENV_GET", 7usize), 7);
        std::env::remove_var("FNET_TEST_ENV_GET");
    }
}
