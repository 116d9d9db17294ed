//! Field classification of every entity table, and the DDL derived from it.
//!
//! # Responsibilities
//!
//! - Parse the schema file (YAML, falling back to JSON) that declares, per
//!   table, the primary key and the adapter kind of each column.
//! - Reject identifiers that cannot be interpolated into SQL safely.
//! - Keep the parsed tables in a [`SchemaRegistry`] for lock-free lookup.
//!
//! ```yaml
//! tables:
//!   borrowers:
//!     primary_key: id
//!     columns:
//!       full_name: { kind: scalar, max_length: 200 }
//!       ssn: { kind: scalar, max_length: 11 }
//!       notes: { kind: blob }
//!       profile: { kind: document }
//!       status: { kind: plain }
//! ```
//!
//! # Module invariants
//!
//! - **No crypto dependencies.** Classification is fixed at schema-design time
//!   and never depends on whether encryption is enabled.

pub mod registry;

pub use registry::SchemaRegistry;

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::column::{physical_type_for, ColumnKind, Dialect};

/// Errors from schema parsing and lookup.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The document is neither valid YAML nor valid JSON for the schema shape.
    #[error("failed to parse schema: {0}")]
    Parse(String),

    /// A table or column name is not a plain SQL identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A scalar column was declared with a zero length bound.
    #[error("column {table}.{column} must declare max_length > 0")]
    ZeroLength { table: String, column: String },

    /// The primary key is also listed as an encrypted column.
    #[error("primary key {table}.{column} cannot be encrypted")]
    EncryptedPrimaryKey { table: String, column: String },

    /// The requested table has no entry in the registry.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("failed to read schema file: {0}")]
    Io(#[from] std::io::Error),
}

/// Primary key representation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    #[default]
    Integer,
    Text,
}

/// One entity table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableSchema {
    /// Filled in from the key of the `tables` map.
    #[serde(skip)]
    pub name: String,
    pub primary_key: String,
    #[serde(default)]
    pub key_type: KeyType,
    pub columns: BTreeMap<String, ColumnKind>,
}

impl TableSchema {
    /// Columns that go through an adapter, in name order.
    pub fn encrypted_columns(&self) -> impl Iterator<Item = (&str, &ColumnKind)> {
        self.columns
            .iter()
            .filter(|(_, kind)| kind.is_encrypted())
            .map(|(name, kind)| (name.as_str(), kind))
    }

    /// Whether any column is encrypted.
    pub fn has_encrypted_columns(&self) -> bool {
        self.encrypted_columns().next().is_some()
    }

    /// `CREATE TABLE` statement for `dialect`.
    ///
    /// Encrypted columns get the type chosen by the storage-type selector;
    /// plain columns are `TEXT`.
    pub fn create_table_sql(&self, dialect: Dialect) -> String {
        let key_type = match (self.key_type, dialect) {
            (KeyType::Integer, Dialect::Sqlite) => "INTEGER",
            (KeyType::Integer, Dialect::Postgres | Dialect::Mysql) => "BIGINT",
            (KeyType::Text, Dialect::Sqlite | Dialect::Postgres) => "TEXT",
            (KeyType::Text, Dialect::Mysql) => "VARCHAR(255)",
        };
        let mut defs = vec![format!("{} {key_type} PRIMARY KEY", self.primary_key)];
        for (name, kind) in &self.columns {
            if *name == self.primary_key {
                continue;
            }
            defs.push(format!("{name} {}", physical_type_for(kind, dialect).sql_name()));
        }
        format!("CREATE TABLE IF NOT EXISTS {} ({})", self.name, defs.join(", "))
    }

    fn validate(&self) -> Result<(), SchemaError> {
        check_identifier(&self.name)?;
        check_identifier(&self.primary_key)?;
        for (column, kind) in &self.columns {
            check_identifier(column)?;
            if *column == self.primary_key && kind.is_encrypted() {
                return Err(SchemaError::EncryptedPrimaryKey {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
            if let ColumnKind::Scalar { max_length: 0 } = kind {
                return Err(SchemaError::ZeroLength {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaDocument {
    tables: BTreeMap<String, TableSchema>,
}

/// Whether `s` matches `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn check_identifier(s: &str) -> Result<(), SchemaError> {
    if is_identifier(s) {
        Ok(())
    } else {
        Err(SchemaError::InvalidIdentifier(s.to_owned()))
    }
}

/// Parse a schema document, YAML first, then JSON.
///
/// # Errors
///
/// Returns [`SchemaError::Parse`] if the text is neither, and a validation
/// error for bad identifiers or bounds.
pub fn parse_schema(text: &str) -> Result<BTreeMap<String, TableSchema>, SchemaError> {
    let doc: SchemaDocument = match serde_yaml::from_str(text) {
        Ok(parsed) => parsed,
        Err(yaml_err) => serde_json::from_str(text)
            .map_err(|_| SchemaError::Parse(yaml_err.to_string()))?,
    };

    let mut tables = BTreeMap::new();
    for (name, mut table) in doc.tables {
        table.name = name.clone();
        table.validate()?;
        tables.insert(name, table);
    }
    Ok(tables)
}

/// Read the schema file at `path` and atomically replace the registry.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed; the registry keeps
/// its previous contents in that case.
pub async fn load_file(path: &Path, registry: &SchemaRegistry) -> Result<(), SchemaError> {
    let text = tokio::fs::read_to_string(path).await?;
    let tables = parse_schema(&text)?;
    registry.replace_all(tables);
    info!(
        path = %path.display(),
        tables = registry.len(),
        "schema loaded"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
tables:
  borrowers:
    primary_key: id
    columns:
      full_name: { kind: scalar, max_length: 200 }
      notes: { kind: blob }
      profile: { kind: document }
      status: { kind: plain }
  audit_log:
    primary_key: id
    columns:
      message: { kind: plain }
"#;

    #[test]
    fn parses_yaml_and_names_tables() {
        let tables = parse_schema(YAML).unwrap();
        let borrowers = &tables["borrowers"];
        assert_eq!(borrowers.name, "borrowers");
        assert_eq!(borrowers.key_type, KeyType::Integer);
        let encrypted: Vec<&str> = borrowers.encrypted_columns().map(|(n, _)| n).collect();
        assert_eq!(encrypted, ["full_name", "notes", "profile"]);
        assert!(!tables["audit_log"].has_encrypted_columns());
    }

    #[test]
    fn falls_back_to_json() {
        let json = r#"{"tables": {"docs": {"primary_key": "doc_id", "key_type": "text",
            "columns": {"body": {"kind": "document"}}}}}"#;
        let tables = parse_schema(json).unwrap();
        assert_eq!(tables["docs"].key_type, KeyType::Text);
    }

    #[test]
    fn scalar_requires_max_length() {
        let yaml = "tables:\n  t:\n    primary_key: id\n    columns:\n      c: { kind: scalar }\n";
        assert!(matches!(parse_schema(yaml), Err(SchemaError::Parse(_))));
        let yaml =
            "tables:\n  t:\n    primary_key: id\n    columns:\n      c: { kind: scalar, max_length: 0 }\n";
        assert!(matches!(parse_schema(yaml), Err(SchemaError::ZeroLength { .. })));
    }

    #[test]
    fn rejects_unsafe_identifiers() {
        let yaml = "tables:\n  \"t; drop\":\n    primary_key: id\n    columns: {}\n";
        assert!(matches!(parse_schema(yaml), Err(SchemaError::InvalidIdentifier(_))));
        let yaml = "tables:\n  t:\n    primary_key: id\n    columns:\n      1col: { kind: blob }\n";
        assert!(matches!(parse_schema(yaml), Err(SchemaError::InvalidIdentifier(_))));
    }

    #[test]
    fn rejects_encrypted_primary_key() {
        let yaml = "tables:\n  t:\n    primary_key: id\n    columns:\n      id: { kind: blob }\n";
        assert!(matches!(
            parse_schema(yaml),
            Err(SchemaError::EncryptedPrimaryKey { .. })
        ));
    }

    #[test]
    fn identifier_rules() {
        assert!(is_identifier("borrower_profiles"));
        assert!(is_identifier("_x1"));
        assert!(!is_identifier(""));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier("name-with-dash"));
    }

    #[test]
    fn create_table_uses_selected_types() {
        let tables = parse_schema(YAML).unwrap();
        let b = &tables["borrowers"];
        assert_eq!(
            b.create_table_sql(Dialect::Postgres),
            "CREATE TABLE IF NOT EXISTS borrowers (id BIGINT PRIMARY KEY, full_name TEXT, \
             notes TEXT, profile JSONB, status TEXT)"
        );
        assert!(b.create_table_sql(Dialect::Mysql).contains("notes LONGBLOB"));
        assert!(b.create_table_sql(Dialect::Sqlite).starts_with(
            "CREATE TABLE IF NOT EXISTS borrowers (id INTEGER PRIMARY KEY"
        ));
    }

    #[tokio::test]
    async fn load_file_replaces_registry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.yaml");
        std::fs::write(&path, YAML).unwrap();

        let registry = SchemaRegistry::new();
        load_file(&path, &registry).await.unwrap();
        assert_eq!(registry.len(), 2);

        std::fs::write(&path, "tables: [not, a, map]").unwrap();
        assert!(load_file(&path, &registry).await.is_err());
        assert_eq!(registry.len(), 2);
    }
}
