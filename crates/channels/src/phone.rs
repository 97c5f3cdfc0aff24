//! E.164 phone normalization.

/// Normalize a phone number to E.164 (`+` followed by up to 15 digits).
///
/// Accepts common human formats: punctuation and whitespace are stripped, a
/// leading `00` international prefix becomes `+`, and bare digit strings are
/// assumed to already carry a country code. Returns `None` when the result
/// is not a plausible E.164 number.
#[must_use]
pub fn normalize_e164(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    let has_plus = trimmed.starts_with('+');
    let digits: String = trimmed.chars().filter(char::is_ascii_digit).collect();

    let digits = if !has_plus && digits.starts_with("00") {
        digits[2..].to_owned()
    } else {
        digits
    };

    if digits.len() < 7 || digits.len() > 15 || digits.starts_with('0') {
        return None;
    }

    Some(format!("+{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_normalized() {
        assert_eq!(normalize_e164("+15550001111").as_deref(), Some("+15550001111"));
    }

    #[test]
    fn test_punctuation_stripped() {
        assert_eq!(normalize_e164("+1 (555) 000-1111").as_deref(), Some("+15550001111"));
        assert_eq!(normalize_e164("49 30 1234567").as_deref(), Some("+49301234567"));
    }

    #[test]
    fn test_double_zero_prefix() {
        assert_eq!(normalize_e164("0049301234567").as_deref(), Some("+49301234567"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(normalize_e164("").is_none());
        assert!(normalize_e164("12345").is_none());
        assert!(normalize_e164("not a phone").is_none());
        // National format without country code.
        assert!(normalize_e164("030 1234567").is_none());
    }
}
