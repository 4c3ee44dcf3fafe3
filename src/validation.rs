//! Recipient address validation (syntax only, no DNS/MX lookups)

use validator::ValidateEmail;

/// Longest forward-path an SMTP server must accept (RFC 5321 §4.5.3.1.3 minus brackets)
const MAX_ADDRESS_LENGTH: usize = 254;

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressValidator;

impl AddressValidator {
    pub fn new() -> Self {
        Self
    }

    /// Check whether `address` is a syntactically valid mailbox address.
    pub fn is_valid(&self, address: &str) -> bool {
        if address.is_empty() || address.len() > MAX_ADDRESS_LENGTH {
            return false;
        }
        if address.trim() != address {
            return false;
        }
        address.validate_email()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_common_addresses() {
        let validator = AddressValidator::new();

        assert!(validator.is_valid("user@example.com"));
        assert!(validator.is_valid("first.last+tag@mail.example.org"));
    }

    #[test]
    fn test_rejects_malformed_addresses() {
        let validator = AddressValidator::new();

        assert!(!validator.is_valid("not-an-email"));
        assert!(!validator.is_valid(""));
        assert!(!validator.is_valid("@example.com"));
        assert!(!validator.is_valid("user@"));
        assert!(!validator.is_valid("user@@example.com"));
        assert!(!validator.is_valid(" user@example.com"));
        assert!(!validator.is_valid("user name@example.com"));
    }

    #[test]
    fn test_rejects_overlong_address() {
        let validator = AddressValidator::new();
        let address = format!("{}@example.com", "a".repeat(250));

        assert!(!validator.is_valid(&address));
    }

    #[test]
    fn test_verdict_is_deterministic() {
        let validator = AddressValidator::new();

        for _ in 0..3 {
            assert!(validator.is_valid("user@example.com"));
            assert!(!validator.is_valid("not-an-email"));
        }
    }
}
