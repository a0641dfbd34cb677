//! Validation helpers for DTOs.

use validator::ValidationError;

/// Longest display name accepted for users, tournaments and qualifiers.
pub const MAX_NAME_LENGTH: usize = 64;

/// Validates a name used as a file key inside the content directory.
///
/// Only ASCII alphanumerics, `-`, `_` and `.` are accepted, and the name may not
/// start with a dot, so `..`, absolute paths and separators are all rejected.
///
/// # Examples
///
/// ```ignore
/// validate_file_name("3f0c9a4e-2b7d-4a51-9b1e-1b7f2a1e9c11") // Ok
/// validate_file_name("../serverConfig.json")                 // Err - traversal
/// validate_file_name(".hidden")                              // Err - leading dot
/// ```
pub fn validate_file_name(name: &str) -> Result<(), ValidationError> {
    if name.is_empty() || name.len() > 128 {
        let mut err = ValidationError::new("file_name_length");
        err.message = Some(format!("File name must be 1 to 128 characters (got {})", name.len()).into());
        return Err(err);
    }

    if name.starts_with('.')
        || !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        let mut err = ValidationError::new("file_name_format");
        err.message = Some("File name contains forbidden characters".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a human readable name: non blank and bounded.
pub fn validate_display_name(name: &str) -> Result<(), ValidationError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        let mut err = ValidationError::new("name_blank");
        err.message = Some("Name must not be blank".into());
        return Err(err);
    }
    if trimmed.chars().count() > MAX_NAME_LENGTH {
        let mut err = ValidationError::new("name_length");
        err.message = Some(format!("Name must be at most {MAX_NAME_LENGTH} characters").into());
        return Err(err);
    }
    Ok(())
}
