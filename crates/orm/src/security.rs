//! Identifier safety
//!
//! Every table and column name reaching SQL comes from a model definition; it
//! is validated once at registration and always emitted quoted. Values never
//! reach SQL text, they are bound parameters.

use crate::error::ModelError;

/// Characters allowed in SQL identifiers
const ALLOWED_IDENTIFIER_CHARS: &str = "abcdefghijklmnopqrstuvwxyz0123456789_";

/// Longest identifier PostgreSQL keeps without truncating
const MAX_IDENTIFIER_LEN: usize = 63;

/// Escape a SQL identifier (table name, column name, etc.)
///
/// ```
/// use oerp_orm::security::escape_identifier;
///
/// assert_eq!(escape_identifier("res_user"), "\"res_user\"");
/// assert_eq!(escape_identifier("table\"name"), "\"table\"\"name\"");
/// ```
pub fn escape_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Validate that an identifier is safe for use in SQL
pub fn validate_identifier(identifier: &str) -> Result<(), ModelError> {
    let first = identifier
        .chars()
        .next()
        .ok_or_else(|| ModelError::Programming("Identifier cannot be empty".to_string()))?;

    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(ModelError::Programming(format!(
            "Identifier '{}' is too long (max {} characters)",
            identifier, MAX_IDENTIFIER_LEN
        )));
    }

    if let Some(c) = identifier
        .chars()
        .find(|c| !ALLOWED_IDENTIFIER_CHARS.contains(*c))
    {
        return Err(ModelError::Programming(format!(
            "Identifier '{}' contains invalid character '{}'",
            identifier, c
        )));
    }

    if first.is_ascii_digit() {
        return Err(ModelError::Programming(format!(
            "Identifier '{}' cannot start with a number",
            identifier
        )));
    }

    Ok(())
}

/// Physical table of a model: dots become underscores
pub fn table_name(model: &str) -> String {
    model.replace('.', "_")
}

/// Reject CHECK expressions that could smuggle extra statements
pub fn validate_check_expression(expression: &str) -> Result<(), ModelError> {
    let forbidden = [";", "--", "/*", "*/"];
    if let Some(pattern) = forbidden.iter().find(|p| expression.contains(**p)) {
        return Err(ModelError::Programming(format!(
            "CHECK expression '{}' contains forbidden pattern '{}'",
            expression, pattern
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_identifier() {
        assert_eq!(escape_identifier("ir_model_access"), "\"ir_model_access\"");
        assert_eq!(escape_identifier("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("res_user").is_ok());
        assert!(validate_identifier("_left").is_ok());
        assert!(validate_identifier("field2").is_ok());

        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("2field").is_err());
        assert!(validate_identifier("res.user").is_err());
        assert!(validate_identifier("Name").is_err());
        assert!(validate_identifier(&"x".repeat(64)).is_err());
    }

    #[test]
    fn test_table_name() {
        assert_eq!(table_name("ir.model.access"), "ir_model_access");
        assert_eq!(table_name("test"), "test");
    }

    #[test]
    fn test_check_expression() {
        assert!(validate_check_expression("amount >= 0").is_ok());
        assert!(validate_check_expression("1=1); DROP TABLE x; --").is_err());
    }
}
