pub mod password;
pub mod token;
pub mod validation;

pub use password::{Password, PasswordHashString, PasswordHasher};
pub use validation::{normalize_email, validate_password, validate_registration};
