//! Selective field encryption.
//!
//! The primitive is supplied by the host through [`FieldCipher`]; this module
//! only decides which values it touches.

use std::fmt;
use std::sync::Arc;

use crate::error::{TableError, TableResult};
use crate::table::EncryptableFieldSet;
use crate::value::{Row, Value};

/// Reversible text transform provided by the host application.
pub trait FieldCipher: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> TableResult<String>;
    fn decrypt(&self, ciphertext: &str) -> TableResult<String>;
}

/// Applies a [`FieldCipher`] to the named subset of a row.
///
/// Fields missing from the row, or not named, pass through untouched and the
/// row keeps its shape and order. `Null` is never transformed.
#[derive(Clone)]
pub struct FieldCipherAdapter {
    cipher: Arc<dyn FieldCipher>,
}

impl fmt::Debug for FieldCipherAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldCipherAdapter").finish_non_exhaustive()
    }
}

impl FieldCipherAdapter {
    pub fn new(cipher: Arc<dyn FieldCipher>) -> Self {
        Self { cipher }
    }

    pub fn encrypt_fields(&self, row: &Row, fields: &EncryptableFieldSet) -> TableResult<Row> {
        self.transform(row, fields, |text| self.cipher.encrypt(text))
    }

    pub fn decrypt_fields(&self, row: &Row, fields: &EncryptableFieldSet) -> TableResult<Row> {
        self.transform(row, fields, |text| self.cipher.decrypt(text))
    }

    fn transform<F>(&self, row: &Row, fields: &EncryptableFieldSet, apply: F) -> TableResult<Row>
    where
        F: Fn(&str) -> TableResult<String>,
    {
        if fields.is_empty() {
            return Ok(row.clone());
        }
        row.try_map(|name, value| {
            if !fields.contains(name) {
                return Ok(value.clone());
            }
            match value {
                Value::Null => Ok(Value::Null),
                Value::Text(text) => apply(text).map(Value::Text),
                other => Err(TableError::invalid(format!(
                    "field `{name}` holds a {} value; only text fields can be encrypted",
                    other.type_name()
                ))),
            }
        })
    }
}
