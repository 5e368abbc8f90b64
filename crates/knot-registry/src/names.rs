//! Type and field name validation.
//!
//! Valid type names:
//! - Must be non-empty
//! - Must not contain whitespace, `~`, `^`, `:`, `?`, `*`, `[`, `\`, `/`
//! - Must not contain `..`
//! - Must not start or end with `.`
//! - Dot-separated components must start with an ASCII letter
//!
//! Field names are plain identifiers: an ASCII letter or `_`, then ASCII
//! letters, digits, or `_`.

use crate::error::{RegistryError, RegistryResult};

/// Characters that are forbidden anywhere in a type name.
const FORBIDDEN_CHARS: &[char] = &[
    ' ', '\t', '\n', '\r', '~', '^', ':', '?', '*', '[', '\\', '/',
];

fn invalid(name: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::InvalidName {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Validate a semantic type name such as `knot.Note`.
///
/// # Examples
///
/// ```
/// use knot_registry::names::validate_type_name;
///
/// assert!(validate_type_name("knot.Note").is_ok());
/// assert!(validate_type_name("User").is_ok());
/// assert!(validate_type_name("").is_err());
/// assert!(validate_type_name("bad..name").is_err());
/// ```
pub fn validate_type_name(name: &str) -> RegistryResult<()> {
    if name.is_empty() {
        return Err(invalid(name, "type name must not be empty"));
    }

    for ch in FORBIDDEN_CHARS {
        if name.contains(*ch) {
            return Err(invalid(name, format!("contains forbidden character: {ch:?}")));
        }
    }

    if name.contains("..") {
        return Err(invalid(name, "must not contain '..'"));
    }

    if name.starts_with('.') || name.ends_with('.') {
        return Err(invalid(name, "must not start or end with '.'"));
    }

    for component in name.split('.') {
        match component.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => {
                return Err(invalid(
                    name,
                    format!("component must start with a letter: {component:?}"),
                ))
            }
        }
    }

    Ok(())
}

/// Validate a field name.
pub fn validate_field_name(name: &str) -> RegistryResult<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid(name, "field name must not be empty")),
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        Some(c) => return Err(invalid(name, format!("must not start with {c:?}"))),
    }
    if let Some(c) = chars.find(|c| !(c.is_ascii_alphanumeric() || *c == '_')) {
        return Err(invalid(name, format!("contains forbidden character: {c:?}")));
    }
    Ok(())
}
