//! In-process [`RecordStore`] backed by ordered maps.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Record, RecordId, RecordStore, RecordUpdate, StoreError};
use crate::column::StoredValue;

type Row = BTreeMap<String, StoredValue>;

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, BTreeMap<RecordId, Row>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a row, creating the table on first use.
    pub async fn insert(
        &self,
        table: &str,
        id: impl Into<RecordId>,
        values: impl IntoIterator<Item = (String, StoredValue)>,
    ) {
        self.tables
            .write()
            .await
            .entry(table.to_owned())
            .or_default()
            .insert(id.into(), values.into_iter().collect());
    }

    /// One column of one row, if present.
    pub async fn get(&self, table: &str, id: &RecordId, column: &str) -> Option<StoredValue> {
        self.tables
            .read()
            .await
            .get(table)?
            .get(id)?
            .get(column)
            .cloned()
    }

    /// Number of rows in `table`.
    pub async fn len(&self, table: &str) -> usize {
        self.tables.read().await.get(table).map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load_batch(
        &self,
        table: &str,
        _primary_key: &str,
        columns: &[String],
        after: Option<&RecordId>,
        limit: usize,
    ) -> Result<Vec<Record>, StoreError> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;

        let lower = match after {
            Some(id) => Bound::Excluded(id.clone()),
            None => Bound::Unbounded,
        };
        Ok(rows
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(id, row)| Record {
                id: id.clone(),
                values: columns
                    .iter()
                    .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(StoredValue::Null)))
                    .collect(),
            })
            .collect())
    }

    async fn write_batch(
        &self,
        table: &str,
        _primary_key: &str,
        updates: &[RecordUpdate],
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_owned()))?;

        // Validate first so a bad id leaves the batch unapplied.
        if let Some(missing) = updates.iter().find(|u| !rows.contains_key(&u.id)) {
            return Err(StoreError::MissingRecord {
                table: table.to_owned(),
                id: missing.id.clone(),
            });
        }
        for update in updates {
            if let Some(row) = rows.get_mut(&update.id) {
                row.extend(update.values.clone());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> StoredValue {
        StoredValue::Text(s.into())
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        for i in 1..=5i64 {
            store
                .insert("notes", i, [("body".to_owned(), text(&format!("n{i}")))])
                .await;
        }
        store
    }

    #[tokio::test]
    async fn keyset_paging() {
        let store = seeded().await;
        let cols = vec!["body".to_owned(), "missing".to_owned()];
        let first = store.load_batch("notes", "id", &cols, None, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].id, RecordId::Int(2));
        assert_eq!(first[0].values["missing"], StoredValue::Null);

        let next = store
            .load_batch("notes", "id", &cols, Some(&first[1].id), 10)
            .await
            .unwrap();
        let ids: Vec<_> = next.iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, [RecordId::Int(3), RecordId::Int(4), RecordId::Int(5)]);
    }

    #[tokio::test]
    async fn write_batch_is_all_or_nothing() {
        let store = seeded().await;
        let updates = vec![
            RecordUpdate {
                id: RecordId::Int(1),
                values: [("body".to_owned(), text("changed"))].into(),
            },
            RecordUpdate {
                id: RecordId::Int(99),
                values: [("body".to_owned(), text("nope"))].into(),
            },
        ];
        let err = store.write_batch("notes", "id", &updates).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingRecord { .. }));
        assert_eq!(
            store.get("notes", &RecordId::Int(1), "body").await,
            Some(text("n1"))
        );

        store.write_batch("notes", "id", &updates[..1]).await.unwrap();
        assert_eq!(
            store.get("notes", &RecordId::Int(1), "body").await,
            Some(text("changed"))
        );
    }

    #[tokio::test]
    async fn unknown_table() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.load_batch("nope", "id", &[], None, 1).await,
            Err(StoreError::UnknownTable(_))
        ));
        assert_eq!(store.len("nope").await, 0);
    }
}
