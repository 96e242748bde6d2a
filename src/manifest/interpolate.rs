//! `${NAME}` expansion over the raw manifest text.
//!
//! Substitution happens before parsing so values may appear anywhere in
//! the document. Only the braced form is recognized; unresolved names
//! stay literal unless strict mode is requested.

use crate::error::{Error, Result};

/// How to treat `${NAME}` references with no matching variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Leave unresolved references literal
    #[default]
    Lenient,
    /// Fail with `Validation` on the first unresolved reference
    Strict,
}

/// Expand `${NAME}` references using the given lookup
///
/// # Errors
///
/// `Validation` in strict mode when a reference has no value.
pub fn expand_with<F>(input: &str, mode: Mode, lookup: F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) if is_var_name(&after[..end]) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => output.push_str(&value),
                    None if mode == Mode::Strict => {
                        return Err(Error::validation(
                            "manifest.interpolate",
                            format!("undefined variable ${{{name}}}"),
                        ));
                    }
                    None => {
                        output.push_str("${");
                        output.push_str(name);
                        output.push('}');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                // Not a well-formed reference; emit the `${` literally and
                // continue scanning after it.
                output.push_str("${");
                rest = after;
            }
        }
    }

    output.push_str(rest);
    Ok(output)
}

/// Expand `${NAME}` references from the process environment
///
/// # Errors
///
/// `Validation` in strict mode when a reference has no value.
pub fn expand(input: &str, mode: Mode) -> Result<String> {
    expand_with(input, mode, |name| std::env::var(name).ok())
}

fn is_var_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOST" => Some("db.internal".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn test_expands_known_variables() {
        let out = expand_with("host: ${HOST}:5432", Mode::Lenient, lookup).unwrap();
        assert_eq!(out, "host: db.internal:5432");
    }

    #[test]
    fn test_unresolved_stays_literal_in_lenient_mode() {
        let out = expand_with("token: ${SECRET}", Mode::Lenient, lookup).unwrap();
        assert_eq!(out, "token: ${SECRET}");
    }

    #[test]
    fn test_unresolved_fails_in_strict_mode() {
        let err = expand_with("token: ${SECRET}", Mode::Strict, lookup).unwrap_err();
        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn test_empty_value_is_not_unresolved() {
        let out = expand_with("x: [${EMPTY}]", Mode::Strict, lookup).unwrap();
        assert_eq!(out, "x: []");
    }

    #[test]
    fn test_malformed_references_pass_through() {
        assert_eq!(
            expand_with("a ${ b } c", Mode::Strict, lookup).unwrap(),
            "a ${ b } c"
        );
        assert_eq!(
            expand_with("tail ${", Mode::Strict, lookup).unwrap(),
            "tail ${"
        );
        assert_eq!(
            expand_with("${1BAD}", Mode::Strict, lookup).unwrap(),
            "${1BAD}"
        );
    }

    #[test]
    fn test_adjacent_references() {
        let out = expand_with("${HOST}${HOST}", Mode::Lenient, lookup).unwrap();
        assert_eq!(out, "db.internaldb.internal");
    }
}
