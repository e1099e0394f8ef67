use super::rows::Row;
use crate::transaction::RowChange;
use std::collections::BTreeMap;

/// Committed rows of one table, ordered by primary key.
#[derive(Debug, Clone)]
pub struct Table<R: Row> {
    rows: BTreeMap<R::Key, R>,
}

impl<R: Row> Table<R> {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        R::TABLE
    }

    pub fn get(&self, key: &R::Key) -> Option<&R> {
        self.rows.get(key)
    }

    pub fn contains(&self, key: &R::Key) -> bool {
        self.rows.contains_key(key)
    }

    pub fn scan(&self) -> impl Iterator<Item = &R> {
        self.rows.values()
    }

    pub fn scan_where<F>(&self, predicate: F) -> Vec<R>
    where
        F: Fn(&R) -> bool,
    {
        self.rows
            .values()
            .filter(|row| predicate(row))
            .cloned()
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Applies a committed change. The owning transaction already holds the
    /// row lock and validated existence, so inserts and updates both upsert.
    pub fn apply(&mut self, change: &RowChange<R>) {
        match change {
            RowChange::Insert(row) | RowChange::Update(row) => {
                self.rows.insert(row.key(), row.clone());
            }
            RowChange::Delete(key) => {
                self.rows.remove(key);
            }
        }
    }
}

impl<R: Row> Default for Table<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::rows::DomainRow;

    fn domain(name: &str) -> DomainRow {
        DomainRow {
            name: name.to_string(),
            expire_time: None,
        }
    }

    #[test]
    fn test_apply_changes() {
        let mut table: Table<DomainRow> = Table::new();
        table.apply(&RowChange::Insert(domain("apps")));
        table.apply(&RowChange::Insert(domain("tasks")));
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.name(), "domains");

        table.apply(&RowChange::Delete("apps".to_string()));
        assert!(!table.contains(&"apps".to_string()));
        assert_eq!(table.scan_where(|row| row.name.starts_with('t')).len(), 1);
    }
}
