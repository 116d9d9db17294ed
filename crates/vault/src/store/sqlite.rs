//! [`RecordStore`] over a single SQLite database file.
//!
//! rusqlite is synchronous, so every call runs on the blocking pool with the
//! connection behind a mutex.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::types::{Value as SqlValue, ValueRef};
use rusqlite::{params_from_iter, Connection};
use tokio::task;

use super::{check_identifier, Record, RecordId, RecordStore, RecordUpdate, StoreError};
use crate::column::StoredValue;

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    /// A private in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Run one or more `;`-separated statements, typically DDL.
    pub async fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let sql = sql.to_owned();
        self.with_conn(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
    }

    /// Insert one row. Used to seed tables and by tests.
    pub async fn insert(
        &self,
        table: &str,
        primary_key: &str,
        id: RecordId,
        values: Vec<(String, StoredValue)>,
    ) -> Result<(), StoreError> {
        check_identifier(table)?;
        check_identifier(primary_key)?;
        for (column, _) in &values {
            check_identifier(column)?;
        }
        let mut columns = vec![primary_key.to_owned()];
        let mut params = vec![record_id_to_sql(&id)];
        for (column, value) in values {
            columns.push(column);
            params.push(to_sql(value));
        }
        let placeholders: Vec<String> = (1..=columns.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            columns.join(", "),
            placeholders.join(", ")
        );
        self.with_conn(move |conn| {
            conn.execute(&sql, params_from_iter(params))?;
            Ok(())
        })
        .await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Worker("connection mutex poisoned".into()))?;
            f(&mut *guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn load_batch(
        &self,
        table: &str,
        primary_key: &str,
        columns: &[String],
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        check_identifier(table)?;
        check_identifier(primary_key)?;
        for column in columns {
            check_identifier(column)?;
        }

        let mut select = vec![primary_key.to_owned()];
        select.extend(columns.iter().cloned());
        let mut sql = format!("SELECT {} FROM {table}", select.join(", "));
        let mut params = Vec::new();
        if let Some(after) = after {
            sql.push_str(&format!(" WHERE {primary_key} > ?1"));
            params.push(record_id_to_sql(after));
        }
        sql.push_str(&format!(" ORDER BY {primary_key} LIMIT {limit}"));

        let columns = columns.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params_from_iter(params))?;
            let mut out = Vec::new();
            while let Some(row) = rows.next()? {
                let id = match row.get_ref(0)? {
                    ValueRef::Integer(i) => RecordId::Int(i),
                    other => RecordId::Text(value_ref_to_string(other)),
                };
                let mut values = std::collections::BTreeMap::new();
                for (i, column) in columns.iter().enumerate() {
                    values.insert(column.clone(), from_sql(row.get_ref(i + 1)?));
                }
                out.push(Record { id, values });
            }
            Ok(out)
        })
        .await
    }

    async fn write_batch(
        &self,
        table: &str,
        primary_key: &str,
        updates: &[RecordUpdate],
    ) -> Result<(), StoreError> {
        check_identifier(table)?;
        check_identifier(primary_key)?;
        for update in updates {
            for column in update.values.keys() {
                check_identifier(column)?;
            }
        }

        let table = table.to_owned();
        let primary_key = primary_key.to_owned();
        let updates = updates.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for update in updates {
                if update.values.is_empty() {
                    continue;
                }
                let assignments: Vec<String> = update
                    .values
                    .keys()
                    .enumerate()
                    .map(|(i, c)| format!("{c} = ?{}", i + 1))
                    .collect();
                let sql = format!(
                    "UPDATE {table} SET {} WHERE {primary_key} = ?{}",
                    assignments.join(", "),
                    assignments.len() + 1
                );
                let mut params: Vec<SqlValue> = update.values.into_values().map(to_sql).collect();
                params.push(record_id_to_sql(&update.id));
                let changed = tx.execute(&sql, params_from_iter(params))?;
                if changed == 0 {
                    // Dropping the transaction rolls back.
                    return Err(StoreError::MissingRecord {
                        table: table.clone(),
                        id: update.id,
                    });
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

fn record_id_to_sql(id: &RecordId) -> SqlValue {
    match id {
        RecordId::Int(i) => SqlValue::Integer(*i),
        RecordId::Text(s) => SqlValue::Text(s.clone()),
    }
}

/// JSON values are stored as their text; SQLite has no native JSON type.
fn to_sql(value: StoredValue) -> SqlValue {
    match value {
        StoredValue::Null => SqlValue::Null,
        StoredValue::Text(s) => SqlValue::Text(s),
        StoredValue::Bytes(b) => SqlValue::Blob(b),
        StoredValue::Json(v) => SqlValue::Text(v.to_string()),
    }
}

fn from_sql(value: ValueRef<'_>) -> StoredValue {
    match value {
        ValueRef::Null => StoredValue::Null,
        ValueRef::Blob(b) => StoredValue::Bytes(b.to_vec()),
        other => StoredValue::Text(value_ref_to_string(other)),
    }
}

fn value_ref_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) | ValueRef::Blob(t) => String::from_utf8_lossy(t).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store_with_rows(n: i64) -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .execute_batch("CREATE TABLE borrowers (id INTEGER PRIMARY KEY, ssn TEXT, profile JSON, scan BLOB)")
            .await
            .unwrap();
        for i in 1..=n {
            store
                .insert(
                    "borrowers",
                    "id",
                    RecordId::Int(i),
                    vec![("ssn".into(), StoredValue::Text(format!("000-00-{i:04}")))],
                )
                .await
                .unwrap();
        }
        store
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn pages_by_primary_key() {
        let store = store_with_rows(7).await;
        let columns = cols(&["ssn", "profile"]);
        let first = store.load_batch("borrowers", "id", &columns, None, 3).await.unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].values["ssn"], StoredValue::Text("000-00-0001".into()));
        assert_eq!(first[0].values["profile"], StoredValue::Null);

        let rest = store
            .load_batch("borrowers", "id", &columns, Some(&RecordId::Int(3)), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 4);
        assert_eq!(rest[0].id, RecordId::Int(4));
    }

    #[tokio::test]
    async fn write_batch_round_trips_values() {
        let store = store_with_rows(2).await;
        let update = RecordUpdate {
            id: RecordId::Int(2),
            values: [
                ("profile".to_owned(), StoredValue::Json(json!({"k": "v"}))),
                ("scan".to_owned(), StoredValue::Bytes(vec![0, 159, 146, 150])),
            ]
            .into(),
        };
        store.write_batch("borrowers", "id", &[update]).await.unwrap();

        let rows = store
            .load_batch("borrowers", "id", &cols(&["profile", "scan"]), Some(&RecordId::Int(1)), 1)
            .await
            .unwrap();
        assert_eq!(rows[0].values["profile"], StoredValue::Text(r#"{"k":"v"}"#.into()));
        assert_eq!(rows[0].values["scan"], StoredValue::Bytes(vec![0, 159, 146, 150]));
    }

    #[tokio::test]
    async fn failed_update_rolls_back_whole_batch() {
        let store = store_with_rows(1).await;
        let updates = vec![
            RecordUpdate {
                id: RecordId::Int(1),
                values: [("ssn".to_owned(), StoredValue::Text("changed".into()))].into(),
            },
            RecordUpdate {
                id: RecordId::Int(404),
                values: [("ssn".to_owned(), StoredValue::Text("x".into()))].into(),
            },
        ];
        let err = store.write_batch("borrowers", "id", &updates).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingRecord { .. }));

        let rows = store.load_batch("borrowers", "id", &cols(&["ssn"]), None, 1).await.unwrap();
        assert_eq!(rows[0].values["ssn"], StoredValue::Text("000-00-0001".into()));
    }

    #[tokio::test]
    async fn rejects_injected_identifiers() {
        let store = store_with_rows(0).await;
        let err = store
            .load_batch("borrowers; DROP TABLE borrowers", "id", &[], None, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidIdentifier(_)));
    }

    #[tokio::test]
    async fn persists_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loans.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store
                .execute_batch("CREATE TABLE notes (id TEXT PRIMARY KEY, body TEXT)")
                .await
                .unwrap();
            store
                .insert(
                    "notes",
                    "id",
                    RecordId::from("n-1"),
                    vec![("body".into(), StoredValue::Text("hello".into()))],
                )
                .await
                .unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        let rows = reopened.load_batch("notes", "id", &cols(&["body"]), None, 5).await.unwrap();
        assert_eq!(rows[0].id, RecordId::Text("n-1".into()));
    }
}
