use validator::Validate;

#[derive(Debug, Validate)]
struct RegistrationInput {
    #[validate(
        email(message = "Invalid email format"),
        length(max = 255, message = "Email must be at most 255 characters")
    )]
    email: String,
    #[validate(length(
        min = 8,
        max = 72,
        message = "Password must be between 8 and 72 characters"
    ))]
    password: String,
}

#[derive(Debug, Validate)]
struct PasswordInput {
    #[validate(length(
        min = 8,
        max = 72,
        message = "Password must be between 8 and 72 characters"
    ))]
    password: String,
}

/// Lowercased, trimmed form used for storage and lookups.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Email shape and length, plus password length counted in characters.
pub fn validate_registration(
    email: &str,
    password: &str,
) -> Result<(), validator::ValidationErrors> {
    RegistrationInput {
        email: email.to_string(),
        password: password.to_string(),
    }
    .validate()
}

pub fn validate_password(password: &str) -> Result<(), validator::ValidationErrors> {
    PasswordInput {
        password: password.to_string(),
    }
    .validate()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_bounds() {
        assert!(validate_password(&"a".repeat(7)).is_err());
        assert!(validate_password(&"a".repeat(8)).is_ok());
        assert!(validate_password(&"a".repeat(72)).is_ok());
        assert!(validate_password(&"a".repeat(73)).is_err());
    }

    #[test]
    fn test_password_length_counts_characters() {
        // 72 multi-byte characters is still within bounds
        assert!(validate_password(&"é".repeat(72)).is_ok());
    }

    #[test]
    fn test_registration_email_shape() {
        assert!(validate_registration("user@example.com", "password123").is_ok());
        assert!(validate_registration("not-an-email", "password123").is_err());
        assert!(validate_registration("", "password123").is_err());
    }

    #[test]
    fn test_registration_email_length() {
        let long_email = format!("{}@example.com", "a".repeat(250));
        assert!(long_email.len() > 255);
        assert!(validate_registration(&long_email, "password123").is_err());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  User@Example.COM "), "user@example.com");
    }
}
