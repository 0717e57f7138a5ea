//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Logs are shared when debugging routing problems; sender addresses and
//! full subjects stay out of span fields.

/// Masks the local part of an address: `jane.doe@cdcr.ca.gov` → `j***@cdcr.ca.gov`.
pub fn redact_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) => {
            let first = local.chars().next().map(String::from).unwrap_or_default();
            format!("{}***@{}", first, domain)
        }
        None if address.is_empty() => "<none>".to_string(),
        None => "***".to_string(),
    }
}

/// Truncates a subject to at most `max_chars` characters, appending `...`
/// when something was cut.
pub fn truncate_subject(subject: &str, max_chars: usize) -> String {
    let mut chars = subject.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", head)
    } else {
        head
    }
}

/// First twelve hex characters of a fingerprint, enough for log correlation.
pub fn short_fingerprint(fingerprint: &str) -> &str {
    fingerprint.get(..12).unwrap_or(fingerprint)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redact_address() {
        assert_eq!(redact_address("jane.doe@cdcr.ca.gov"), "j***@cdcr.ca.gov");
        assert_eq!(redact_address("@nowhere"), "***@nowhere");
        assert_eq!(redact_address(""), "<none>");
        assert_eq!(redact_address("not-an-address"), "***");
    }

    #[test]
    fn test_truncate_subject() {
        assert_eq!(truncate_subject("short", 10), "short");
        assert_eq!(truncate_subject("exactly10!", 10), "exactly10!");
        assert_eq!(truncate_subject("a longer subject", 8), "a longer...");
        assert_eq!(truncate_subject("Größe ändern", 5), "Größe...");
    }

    #[test]
    fn test_short_fingerprint() {
        assert_eq!(short_fingerprint("0123456789abcdef"), "0123456789ab");
        assert_eq!(short_fingerprint("abc"), "abc");
    }
}
