//! Transient value objects naming what an operation targets.
//!
//! Identifiers cannot travel as bound parameters, so they are checked here
//! structurally before any statement exists.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{TableError, TableResult};
use crate::value::Value;

/// Longest identifier accepted by any supported engine.
pub const MAX_IDENTIFIER_LENGTH: usize = 128;

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").expect("identifier pattern is valid"));

/// Check a table, schema or column name against the safe-identifier grammar.
///
/// Letters, digits and underscore only, not purely numeric.
pub fn validate_identifier(name: &str) -> TableResult<()> {
    if name.is_empty() {
        return Err(TableError::invalid("identifier must not be empty"));
    }
    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(TableError::invalid(format!(
            "identifier exceeds {MAX_IDENTIFIER_LENGTH} characters"
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(TableError::invalid(format!(
            "identifier `{}` contains characters outside [A-Za-z0-9_]",
            name.escape_debug()
        )));
    }
    if name.bytes().all(|b| b.is_ascii_digit()) {
        return Err(TableError::invalid(format!(
            "identifier `{name}` must not be purely numeric"
        )));
    }
    Ok(())
}

/// Target table, optionally qualified by schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    name: String,
    schema: Option<String>,
}

impl TableRef {
    /// Validates both parts. An empty or blank schema counts as absent.
    pub fn new(name: &str, schema: Option<&str>) -> TableResult<Self> {
        validate_identifier(name)?;
        let schema = match schema.map(str::trim) {
            None | Some("") => None,
            Some(schema) => {
                validate_identifier(schema)?;
                Some(schema.to_string())
            }
        };
        Ok(Self {
            name: name.to_string(),
            schema,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The explicit schema, if the caller gave one.
    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }
}

/// Equality filter on a single column. The value is only ever bound.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCriterion {
    pub column: String,
    pub value: Value,
}

impl FilterCriterion {
    pub fn new(column: &str, value: impl Into<Value>) -> TableResult<Self> {
        if column.trim().is_empty() {
            return Err(TableError::invalid("key column must not be empty"));
        }
        validate_identifier(column)?;
        Ok(Self {
            column: column.to_string(),
            value: value.into(),
        })
    }
}

/// Column names whose values pass through the field cipher.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EncryptableFieldSet {
    fields: BTreeSet<String>,
}

impl EncryptableFieldSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a comma-separated list such as `"email, phone"`.
    ///
    /// Blank entries are dropped and repeats collapse.
    pub fn parse(field_list: &str) -> TableResult<Self> {
        let mut fields = BTreeSet::new();
        for part in field_list.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            validate_identifier(part)?;
            fields.insert(part.to_string());
        }
        Ok(Self { fields })
    }

    /// `None` and blank lists both yield the empty set.
    pub fn from_option(field_list: Option<&str>) -> TableResult<Self> {
        field_list.map_or_else(|| Ok(Self::empty()), Self::parse)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for EncryptableFieldSet {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifiers_follow_safe_grammar() {
        for ok in ["usuarios", "Users_2024", "_tmp", "2fa_codes"] {
            assert!(validate_identifier(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", "123", "users;DROP", "a b", "name\"", "caf\u{e9}", "x-y"] {
            assert!(
                matches!(validate_identifier(bad), Err(TableError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
        assert!(validate_identifier(&"a".repeat(MAX_IDENTIFIER_LENGTH + 1)).is_err());
    }

    #[test]
    fn blank_schema_is_absent() {
        let table = TableRef::new("usuarios", Some("  ")).unwrap();
        assert_eq!(table.schema(), None);

        let err = TableRef::new("usuarios", Some("dbo;--")).unwrap_err();
        assert!(matches!(err, TableError::InvalidArgument(_)));
    }

    #[test]
    fn field_set_parses_comma_separated_list() {
        let set = EncryptableFieldSet::parse(" email, phone,,email ").unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["email", "phone"]);

        assert!(EncryptableFieldSet::from_option(None).unwrap().is_empty());
        assert!(EncryptableFieldSet::parse("email, bad name").is_err());
    }

    #[test]
    fn filter_requires_key_column() {
        assert!(matches!(
            FilterCriterion::new(" ", 1),
            Err(TableError::InvalidArgument(_))
        ));
    }
}
