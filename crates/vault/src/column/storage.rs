//! Storage-Type Selector: physical column types per database dialect.
//!
//! The physical type depends only on the column classification and the
//! dialect, never on whether encryption is enabled, so toggling encryption
//! needs no schema migration.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::ColumnKind;

/// Target database dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Sqlite,
    Postgres,
    Mysql,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::Mysql),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

/// Physical column type chosen for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Native unbounded text.
    Text,
    /// Native binary large object.
    LongBlob,
    /// JSON-capable text type.
    Json,
    /// PostgreSQL binary JSON.
    Jsonb,
}

impl ColumnType {
    /// DDL spelling of the type.
    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Text => "TEXT",
            ColumnType::LongBlob => "LONGBLOB",
            ColumnType::Json => "JSON",
            ColumnType::Jsonb => "JSONB",
        }
    }

    /// Whether values round-trip through the database as raw bytes.
    pub fn is_binary(self) -> bool {
        matches!(self, ColumnType::LongBlob)
    }

    /// Whether the database treats the column as structured JSON.
    pub fn is_json(self) -> bool {
        matches!(self, ColumnType::Json | ColumnType::Jsonb)
    }
}

/// Pick the physical type for a column of `kind` in `dialect`.
pub fn physical_type_for(kind: &ColumnKind, dialect: Dialect) -> ColumnType {
    match (kind, dialect) {
        (ColumnKind::Plain | ColumnKind::Scalar { .. }, _) => ColumnType::Text,
        (ColumnKind::Blob, Dialect::Sqlite | Dialect::Postgres) => ColumnType::Text,
        (ColumnKind::Blob, Dialect::Mysql) => ColumnType::LongBlob,
        (ColumnKind::Document, Dialect::Postgres) => ColumnType::Jsonb,
        (ColumnKind::Document, Dialect::Sqlite | Dialect::Mysql) => ColumnType::Json,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_is_text_everywhere() {
        let kind = ColumnKind::Scalar { max_length: 11 };
        for d in [Dialect::Sqlite, Dialect::Postgres, Dialect::Mysql] {
            assert_eq!(physical_type_for(&kind, d), ColumnType::Text);
        }
    }

    #[test]
    fn blob_is_binary_on_mysql() {
        assert_eq!(physical_type_for(&ColumnKind::Blob, Dialect::Mysql), ColumnType::LongBlob);
        assert!(physical_type_for(&ColumnKind::Blob, Dialect::Mysql).is_binary());
        assert_eq!(physical_type_for(&ColumnKind::Blob, Dialect::Postgres), ColumnType::Text);
    }

    #[test]
    fn document_stays_json_typed() {
        assert_eq!(physical_type_for(&ColumnKind::Document, Dialect::Postgres), ColumnType::Jsonb);
        assert_eq!(physical_type_for(&ColumnKind::Document, Dialect::Mysql), ColumnType::Json);
        assert_eq!(physical_type_for(&ColumnKind::Document, Dialect::Sqlite), ColumnType::Json);
        assert!(ColumnType::Jsonb.is_json());
    }

    #[test]
    fn dialect_parses_aliases() {
        assert_eq!("PostgreSQL".parse::<Dialect>().unwrap(), Dialect::Postgres);
        assert_eq!("mariadb".parse::<Dialect>().unwrap(), Dialect::Mysql);
        assert_eq!("sqlite".parse::<Dialect>().unwrap(), Dialect::Sqlite);
        assert!("oracle".parse::<Dialect>().is_err());
    }

    #[test]
    fn sql_names() {
        assert_eq!(ColumnType::Text.sql_name(), "TEXT");
        assert_eq!(ColumnType::Jsonb.sql_name(), "JSONB");
    }
}
