//! Environment variable parsing with warn-level logging for invalid values.

/// Parse an environment variable with a default fallback.
///
/// - If the variable is not set: returns `default` silently (expected case).
/// - If the variable is set but cannot be parsed: logs a warning and returns `default`.
pub fn env_parse_with_default<T: std::str::FromStr + std::fmt::Display>(
    var: &str,
    default: T,
) -> T {
    match std::env::var(var) {
        Ok(v) => match v.parse() {
            Ok(n) => n,
            Err(_) => {
                tracing::warn!(
                    var,
                    value = %v,
                    default = %default,
                    "invalid env var value, using default"
                );
                default
            },
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_parse_valid_value() {
        let var_name = "OUTFLOW_TEST_ENV_PARSE_VALID_41927";
        std::env::set_var(var_name, "42");
        let result: u32 = env_parse_with_default(var_name, 10);
        assert_eq!(result, 42);
        std::env::remove_var(var_name);
    }

    #[test]
    fn test_env_parse_invalid_value() {
        let var_name = "OUTFLOW_TEST_ENV_PARSE_INVALID_41928";
        std::env::set_var(var_name, "banana");
        let result: u32 = env_parse_with_default(var_name, 10);
        assert_eq!(result, 10);
        std::env::remove_var(var_name);
    }

    #[test]
    fn test_env_parse_missing_var() {
        let var_name = "OUTFLOW_TEST_ENV_PARSE_MISSING_41929";
        std::env::remove_var(var_name);
        let result: u32 = env_parse_with_default(var_name, 10);
        assert_eq!(result, 10);
    }
}
