//! SQL identifier validation.
//!
//! Table and column names are interpolated into queries, so every name
//! derived from a record type or attachment passes through here first.

use attache_core::interpolation::{pluralize, underscore};
use attache_core::{Error, Result};

/// PostgreSQL identifier length limit.
const MAX_IDENTIFIER_LEN: usize = 63;

const RESERVED_KEYWORDS: &[&str] = &[
    "pg_catalog",
    "information_schema",
    "pg_toast",
    "select",
    "insert",
    "update",
    "delete",
    "drop",
    "create",
    "alter",
    "grant",
    "revoke",
    "truncate",
    "table",
    "user",
];

/// Validate a PostgreSQL table or column name.
///
/// Names must be non-empty, at most 63 bytes, start with a letter or
/// underscore, and contain only ASCII alphanumerics and underscores.
///
/// ```
/// use attache_db::validate_identifier;
///
/// assert!(validate_identifier("images").is_ok());
/// assert!(validate_identifier("photo_synced_to_s3").is_ok());
/// assert!(validate_identifier("1images").is_err());
/// assert!(validate_identifier("images; DROP TABLE x").is_err());
/// ```
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidInput(
            "Identifier cannot be empty".to_string(),
        ));
    }

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::InvalidInput(format!(
            "Identifier exceeds {} character limit: {} characters",
            MAX_IDENTIFIER_LEN,
            name.len()
        )));
    }

    if let Some(first) = name.chars().next() {
        if !first.is_ascii_alphabetic() && first != '_' {
            return Err(Error::InvalidInput(format!(
                "Identifier must start with a letter or underscore, found: '{}'",
                first
            )));
        }
    }

    if let Some(ch) = name.chars().find(|c| !c.is_ascii_alphanumeric() && *c != '_') {
        return Err(Error::InvalidInput(format!(
            "Identifier contains invalid character: '{}'. Only alphanumeric and underscore allowed",
            ch
        )));
    }

    if RESERVED_KEYWORDS.contains(&name.to_lowercase().as_str()) {
        return Err(Error::InvalidInput(format!(
            "Identifier '{}' is a reserved SQL keyword",
            name
        )));
    }

    Ok(())
}

/// Conventional table for a record type: `UserProfile` -> `user_profiles`,
/// `Admin::Image` -> `admin_images`.
pub fn table_name(record_type: &str) -> Result<String> {
    let table = pluralize(&underscore(record_type).replace('/', "_"));
    validate_identifier(&table)?;
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifiers() {
        assert!(validate_identifier("images").is_ok());
        assert!(validate_identifier("_private").is_ok());
        assert!(validate_identifier("photo_file_name").is_ok());
        assert!(validate_identifier("Avatar2").is_ok());
    }

    #[test]
    fn test_empty_identifier() {
        match validate_identifier("") {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("empty")),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_identifier_too_long() {
        let name = "a".repeat(64);
        match validate_identifier(&name) {
            Err(Error::InvalidInput(msg)) => assert!(msg.contains("63")),
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(validate_identifier(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_identifier_injection_attempts() {
        assert!(validate_identifier("images; DROP TABLE users").is_err());
        assert!(validate_identifier("images--").is_err());
        assert!(validate_identifier("\"images\"").is_err());
        assert!(validate_identifier("public.images").is_err());
    }

    #[test]
    fn test_reserved_keywords() {
        assert!(validate_identifier("select").is_err());
        assert!(validate_identifier("DROP").is_err());
        assert!(validate_identifier("user").is_err());
        assert!(validate_identifier("users").is_ok());
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("Image").unwrap(), "images");
        assert_eq!(table_name("UserProfile").unwrap(), "user_profiles");
        assert_eq!(table_name("Gallery").unwrap(), "galleries");
        assert_eq!(table_name("Admin::Image").unwrap(), "admin_images");
        assert!(table_name("Bad Name").is_err());
    }
}
