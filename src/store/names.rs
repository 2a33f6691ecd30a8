use crate::error::{Error, Result};

pub const MAX_NAME_BYTES: usize = 255;

/// Checks a display name for a file or folder.
///
/// Names are a single segment: no separators, no control line breaks, and
/// never one of the relative path markers.
pub fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::validation("Name cannot be empty"));
    }

    if name.len() > MAX_NAME_BYTES {
        return Err(Error::validation(format!(
            "Name cannot exceed {MAX_NAME_BYTES} bytes"
        )));
    }

    if name == "." || name == ".." {
        return Err(Error::validation(format!("'{name}' is not a valid name")));
    }

    const INVALID_CHARS: &[char] = &['/', '\0', '\n', '\r'];
    if name.chars().any(|c| INVALID_CHARS.contains(&c)) {
        return Err(Error::validation("Name contains invalid characters"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name_accepts_ordinary_names() {
        assert!(validate_name("report.pdf").is_ok());
        assert!(validate_name("Quarterly numbers (final)").is_ok());
        assert!(validate_name(".hidden").is_ok());
        assert!(validate_name("résumé.txt").is_ok());
    }

    #[test]
    fn test_validate_name_empty_error() {
        assert!(matches!(validate_name(""), Err(Error::Validation(_))));
        assert!(matches!(validate_name("   "), Err(Error::Validation(_))));
    }

    #[test]
    fn test_validate_name_rejects_separators_and_control() {
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("nul\0byte").is_err());
        assert!(validate_name("two\nlines").is_err());
        assert!(validate_name("carriage\rreturn").is_err());
    }

    #[test]
    fn test_validate_name_rejects_relative_markers() {
        assert!(validate_name(".").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("...").is_ok());
    }

    #[test]
    fn test_validate_name_length_is_bytes() {
        assert!(validate_name(&"a".repeat(MAX_NAME_BYTES)).is_ok());
        assert!(validate_name(&"a".repeat(MAX_NAME_BYTES + 1)).is_err());
        // 128 two-byte characters
        assert!(validate_name(&"é".repeat(128)).is_err());
    }
}
