use std::sync::Arc;

use crate::types::RowValues;

/// A row from a query result, sharing its column names with the rest of the result set.
#[derive(Debug, Clone)]
pub struct CustomDbRow {
    pub column_names: Arc<Vec<String>>,
    pub rows: Vec<RowValues>,
}

impl CustomDbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, rows: Vec<RowValues>) -> Self {
        Self { column_names, rows }
    }

    #[must_use]
    pub fn get_column_index(&self, column_name: &str) -> Option<usize> {
        self.column_names.iter().position(|col| col == column_name)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.get_column_index(column_name)
            .and_then(|idx| self.rows.get(idx))
    }

    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.rows.get(index)
    }
}

/// Rows returned by a query.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub results: Vec<CustomDbRow>,
    column_names: Arc<Vec<String>>,
}

impl ResultSet {
    #[must_use]
    pub fn with_columns(column_names: Vec<String>, capacity: usize) -> ResultSet {
        ResultSet {
            results: Vec::with_capacity(capacity),
            column_names: Arc::new(column_names),
        }
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    pub fn add_row_values(&mut self, row_values: Vec<RowValues>) {
        self.results
            .push(CustomDbRow::new(Arc::clone(&self.column_names), row_values));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.results.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// First column of the first row, the shape of every scalar lookup.
    #[must_use]
    pub fn scalar(&self) -> Option<&RowValues> {
        self.results.first().and_then(|row| row.get_by_index(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_share_columns() {
        let mut rs = ResultSet::with_columns(vec!["id".into(), "data".into()], 2);
        rs.add_row_values(vec![RowValues::Int(1), RowValues::Blob(vec![1])]);
        rs.add_row_values(vec![RowValues::Int(2), RowValues::Null]);
        assert_eq!(rs.len(), 2);
        assert_eq!(rs.results[1].get("id"), Some(&RowValues::Int(2)));
        assert_eq!(rs.results[0].get("missing"), None);
        assert_eq!(rs.scalar(), Some(&RowValues::Int(1)));
        assert!(ResultSet::default().scalar().is_none());
    }
}
