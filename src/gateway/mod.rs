pub mod batch;
pub mod lister;
pub mod multipart;
pub mod signer;

use crate::errors::GatewayError;

/// Shared key validation. Keys are opaque identities, but a handful of
/// shapes can never address an object.
pub(crate) fn validate_key(key: &str) -> Result<(), GatewayError> {
    if key.is_empty() {
        return Err(GatewayError::validation("fileKey must not be empty"));
    }
    if key.len() > 1024 {
        return Err(GatewayError::validation(
            "fileKey must not exceed 1024 bytes",
        ));
    }
    if key.starts_with('/') {
        return Err(GatewayError::validation(
            "fileKey must not start with a slash",
        ));
    }
    if key.contains('\0') {
        return Err(GatewayError::validation(
            "fileKey must not contain NUL bytes",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("books/1/a.mp3").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("a\0b").is_err());
        assert!(validate_key(&"k".repeat(1025)).is_err());
    }
}
