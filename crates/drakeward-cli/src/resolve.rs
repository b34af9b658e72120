//! Project ID parsing.
//!
//! A project is created once and its ID printed to stdout; there is no
//! TOML round trip to resolve an ID from (unlike the project export/import
//! registry format, which is keyed by an ID that already exists). Every
//! other command simply takes a UUID argument.

use anyhow::{Context, Result};
use uuid::Uuid;

/// Parse a project ID argument, producing a clear error message on failure.
pub fn resolve_project_id(input: &str) -> Result<Uuid> {
    Uuid::parse_str(input).with_context(|| format!("invalid project ID: {input:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_valid_uuid() {
        let id = "550e8400-e29b-41d4-a716-446655440000";
        let result = resolve_project_id(id).unwrap();
        assert_eq!(result.to_string(), id);
    }

    #[test]
    fn resolve_invalid_uuid() {
        let result = resolve_project_id("not-a-uuid");
        assert!(result.is_err());
    }

    #[test]
    fn resolve_empty_string() {
        let result = resolve_project_id("");
        assert!(result.is_err());
    }
}
