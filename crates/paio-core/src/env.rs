//! Environment variable helpers for engine tunables.
//!
//! ```ignore
//! use paio_core::env::{env_get, env_get_bool};
//!
//! let depth: usize = env_get("PAIO_QUEUE_DEPTH", 1024);
//! let flush = env_get_bool("PAIO_FLUSH_EPRINT", false);
//! ```

use std::str::FromStr;

/// Parse an environment variable as `T`, falling back to `default` when
/// unset or unparsable.
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Boolean variant: "1", "true", "yes", "on" (case-insensitive) are true;
/// any other set value is false; unset returns the default.
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_when_unset() {
        let v: usize = env_get("__PAIO_TEST_UNSET__", 42);
        assert_eq!(v, 42);
        assert!(env_get_bool("__PAIO_TEST_UNSET__", true));
    }

    #[test]
    fn test_parse_and_fallback() {
        std::env::set_var("__PAIO_TEST_NUM__", "123");
        let v: u64 = env_get("__PAIO_TEST_NUM__", 0);
        assert_eq!(v, 123);

        std::env::set_var("__PAIO_TEST_NUM__", "not-a-number");
        let v: u64 = env_get("__PAIO_TEST_NUM__", 9);
        assert_eq!(v, 9);
        std::env::remove_var("__PAIO_TEST_NUM__");
    }

    #[test]
    fn test_bool_variants() {
        std::env::set_var("__PAIO_TEST_BOOL__", "on");
        assert!(env_get_bool("__PAIO_TEST_BOOL__", false));
        std::env::set_var("__PAIO_TEST_BOOL__", "0");
        assert!(!env_get_bool("__PAIO_TEST_BOOL__", true));
        std::env::remove_var("__PAIO_TEST_BOOL__");
    }
}
